//! Transpose engine and `cct.db` writer: re-parses a finalized
//! `profile.db` and merges its per-thread sparse metric vectors into
//! the context-indexed layout `cct.db` stores (spec §4.5).

mod layout;
mod profile_source;
mod transpose;
mod writer;

pub use layout::{compute_ctx_offsets, compute_groups, split_group_for_threads};
pub use profile_source::{load_profiles, ProfileRecord, ProfileSourceError};
pub use transpose::write_context_range;
pub use writer::{CctDbError, CctDbWriter};
