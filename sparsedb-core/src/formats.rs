use std::path::Path;

const FORMATS_MD: &str = "\
# sparsedb file formats

This rank's output directory holds three sparse-database files:

- `profile.db` — one data block per thread, addressed by a
  context-index array sorted by context id.
- `cct.db` — the same data transposed so each context's values across
  every thread are contiguous, addressed by a metric-index table.
- `trace.db` — per-thread timelines of `(timestamp, context)` samples.

See the project's format specification for the exact byte layouts.
";

/// Writes a short description of the three on-disk formats alongside
/// them. Failure here is informational only (spec §7): it is logged
/// and otherwise ignored, never propagated to [`crate::SparseDbWriter::write`]'s
/// caller.
pub fn write_formats_doc(path: &Path) {
    if let Err(err) = std::fs::write(path, FORMATS_MD) {
        log::warn!("sparsedb-core: could not write format documentation to {path:?}: {err}");
    }
}
