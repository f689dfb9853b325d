//! Fatal errors that abort a run.

use crate::config::ConfigError;
use crate::persistence::WriterError;
use crate::telemetry_reader::ReadError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Threshold file missing or invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Log file could not be opened or read
    #[error("telemetry error: {0}")]
    Read(#[from] ReadError),

    /// Storage became unusable
    #[error("persistence error: {0}")]
    Writer(#[from] WriterError),

    /// An analysis worker went away before returning its result
    #[error("analysis worker stopped unexpectedly")]
    WorkerLost,
}
