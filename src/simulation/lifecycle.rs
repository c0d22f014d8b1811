use crate::error::{Result, SimulationError};

/// Uninitialized → Seeded → Stepping → Disposed. There is no way back out of `Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Seeded,
    Stepping,
    Disposed,
}

impl Lifecycle {
    fn reject(self, operation: &'static str) -> SimulationError {
        SimulationError::Lifecycle {
            operation,
            state: self,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Lifecycle::Seeded | Lifecycle::Stepping)
    }

    /// store contents exist and may be read or rebuilt
    pub fn require_live(self, operation: &'static str) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(self.reject(operation))
        }
    }

    pub fn seed(&mut self) -> Result<()> {
        match *self {
            Lifecycle::Uninitialized => {
                *self = Lifecycle::Seeded;
                Ok(())
            }
            state => Err(state.reject("seed")),
        }
    }

    pub fn step(&mut self) -> Result<()> {
        self.require_live("step")?;
        *self = Lifecycle::Stepping;
        Ok(())
    }

    pub fn dispose(&mut self) -> Result<()> {
        match *self {
            Lifecycle::Disposed => Err(self.reject("dispose")),
            _ => {
                *self = Lifecycle::Disposed;
                Ok(())
            }
        }
    }
}
