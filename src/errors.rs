use std::path::PathBuf;

use thiserror::Error;

/// Every failure the supervisor can surface. Registry and fuser kinds are
/// recoverable; transport kinds tear the supervisor down.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid packet length: {0} bytes")]
    InvalidPacketLength(usize),

    #[error("invalid station")]
    InvalidStation,

    #[error("unknown station type: {0}")]
    UnknownStationType(u32),

    #[error("base station is already set")]
    BaseAlreadySet,

    #[error("the specified rover already exists")]
    StationExists,

    #[error("station is registered as the base")]
    StationIsBase,

    #[error("station is registered as a rover")]
    StationIsRover,

    #[error("the specified station was not found")]
    StationNotFound,

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("no IF bias in front-end-cal output")]
    IfBiasNotFound,

    #[error("no base station")]
    NoBaseStation,

    #[error("RTK engine returned no solution")]
    RtkFailure,

    #[error("supervisor is already running")]
    AlreadyRunning,

    #[error("shared map {name} is full ({capacity} entries)")]
    SharedMapFull { name: String, capacity: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
