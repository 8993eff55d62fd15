use thiserror::Error;

use sparsedb_cctdb::CctDbError;
use sparsedb_profiledb::{FormatError, ProfileDbError};
use sparsedb_tracedb::TraceDbError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AssembleError {
    #[error(transparent)]
    ProfileDb(#[from] ProfileDbError),
    #[error(transparent)]
    CctDb(#[from] CctDbError),
    #[error(transparent)]
    TraceDb(#[from] TraceDbError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("wavefront_complete called with no threads registered")]
    EmptyWavefront,
    #[error("operation on unregistered profile index {0}")]
    UnknownThread(u32),
    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, AssembleError>;
