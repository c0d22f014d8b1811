mod grid;
mod host_grid;

pub use grid::{GridLayout, GridPartition};
pub use host_grid::HostGrid;
