//! Sparse-metric formatter and `profile.db` writer (spec §4.1, §4.4).
//!
//! Combines [`sparsedb_codec`]'s record layouts, [`sparsedb_model`]'s
//! accumulator and id types, [`sparsedb_collective`]'s `Cohort` for
//! collective section layout, and [`sparsedb_iobuf`]'s double-buffered
//! append writer into the component that turns a thread's finished
//! `Accumulator` into bytes on disk.

mod format;
mod idtuple;
mod writer;

pub use format::{format_thread, FormatError, FormattedThread, MetricScopeIds};
pub use idtuple::to_wire_id_tuple;
pub use writer::{ProfileDbError, ProfileDbWriter};
