/// Peak and crest extraction for the tide peak cache.
///
/// Everything here is a pure function over in-memory slices: no I/O, no
/// clock, no logging. The pipeline logs what these functions report.
///
/// Submodules:
/// - `series` — datum conversion, ordering and duplicate resolution.
/// - `peaks`  — local-maxima detection with prominence and separation rules.
/// - `crests` — observed maxima around externally predicted crest times.

pub mod crests;
pub mod peaks;
pub mod series;
