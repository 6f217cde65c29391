/// Severity classification for detected peaks.
///
/// Submodules:
/// - `thresholds` — maps a peak value onto the site's minor/moderate/major ladder.

pub mod thresholds;
