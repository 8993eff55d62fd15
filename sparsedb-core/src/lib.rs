//! Facade crate: wires the sparse-database assembly core's three
//! per-rank writers — `profile.db`, `cct.db`, `trace.db` — behind a
//! single [`ProfileSink`] the measurement layer drives (spec §6).

mod config;
mod error;
mod formats;
mod sink;
mod writer;

pub use config::WriterConfig;
pub use error::AssembleError;
pub use sink::{ProfileSink, ThreadAccumulators, ThreadStart};
pub use writer::{SparseDbPaths, SparseDbWriter};

pub use sparsedb_tracedb::CtxRefResolver;
