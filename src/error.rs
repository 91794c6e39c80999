//! Error types

use thiserror::Error;

/// Errors produced while loading or validating a cluster configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("unknown scheduling policy: {0}")]
    UnknownPolicy(String),
}

/// Errors produced while placing a job onto the topology.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("job requires {requested} machines but only {available} are free")]
    InsufficientCapacity { requested: u32, available: u32 },
    #[error("machine {0} does not exist")]
    UnknownMachine(u32),
}

/// Errors produced by the scheduler's public operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} is already known to the scheduler")]
    DuplicateJob(i32),
    #[error("job {0} is not known to the scheduler")]
    UnknownJob(i32),
    #[error(transparent)]
    Placement(#[from] PlacementError),
}

/// Errors produced by the outbound resource-manager client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("resource manager request failed: {0}")]
    Request(String),
    #[error("resource manager returned an error status: {0}")]
    Status(String),
}

/// Top-level error type returned from the HTTP API layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
