//! Engine error type.

use thiserror::Error;
use tessel_core::MapId;

/// Errors from building or driving the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A worker thread could not be started.
    #[error("cannot spawn worker thread {index}: {source}")]
    WorkerSpawn {
        /// Index of the worker that failed.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// A pool was requested with zero workers.
    #[error("worker pool needs at least one thread")]
    NoWorkers,
    /// The map already has a runtime.
    #[error("map {0} is already loaded")]
    MapLoaded(MapId),
}
