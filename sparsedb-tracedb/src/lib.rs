//! Per-thread timeline writer for `trace.db`: reserves each thread's
//! sample window at wavefront-complete, streams timepoints into it, and
//! finalizes headers and footer (spec §4.6).

mod ctx_cache;
mod layout;
mod writer;

pub use layout::{compute_layout, TraceLayout};
pub use writer::{CtxRefResolver, TraceDbError, TraceDbWriter};
