use thiserror::Error;

use crate::simulation::Lifecycle;

pub type Result<T> = std::result::Result<T, SimulationError>;

#[derive(Debug, Error)]
pub enum SimulationError {
    /// operation attempted in a lifecycle state that does not allow it
    #[error("cannot {operation} while the simulation is {state:?}")]
    Lifecycle {
        operation: &'static str,
        state: Lifecycle,
    },
    /// particle or grid capacity exceeded at setup time
    #[error("{what} capacity exceeded: requested {requested}, available {available}")]
    Capacity {
        what: &'static str,
        requested: u64,
        available: u64,
    },
    /// rejected configuration, reported before activation
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    #[error("failed to request device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("failed to map buffer: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
    #[error("buffer mapping was cancelled")]
    MapCancelled,
    #[error("failed to encode uniform block: {0}")]
    Encode(#[from] encase::internal::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

impl SimulationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SimulationError::Configuration(message.into())
    }
}
