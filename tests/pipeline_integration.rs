/// End-to-end tests for a single-site run
///
/// These tests drive `run_site` with in-memory providers and a temporary
/// cache directory. They cover:
/// 1. Local-maxima and crest-anchored detection through to the saved document
/// 2. Idempotent reruns and keep-best updates
/// 3. Method-change resets
/// 4. Failures (configuration, upstream, lock) leaving the cache untouched
/// 5. Watermark handling for incremental and backfill runs
///
/// No network access is needed. Run with: cargo test --test pipeline_integration

use std::cell::Cell;
use std::fs;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use tidepeak_service::analysis::crests::CrestWindows;
use tidepeak_service::analysis::peaks::PeakConfig;
use tidepeak_service::analysis::series::DuplicatePolicy;
use tidepeak_service::cache::merge::TieBreak;
use tidepeak_service::cache::store::{CacheError, CacheStore};
use tidepeak_service::ingest::replay::ReplayProvider;
use tidepeak_service::ingest::{CrestProvider, IngestError, ObservationProvider};
use tidepeak_service::logging::DataSource;
use tidepeak_service::model::{Category, CrestMark, Datum, Sample, SourceTag, Thresholds};
use tidepeak_service::pipeline::{PipelineConfig, PipelineError, Providers, RunStatus, run_site};
use tidepeak_service::stations::{DetectionMethod, SiteConfig};
use tidepeak_service::window::{RunMode, TimeWindow, WindowConfig};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Two tides on 2024-04-30: a moderate one at 06:00 and a minor one at 18:00.
const TIDE_DAY: [f64; 24] = [
    0.0, 0.5, 1.0, 1.5, 2.0, 2.3, 2.5, 2.3, 2.0, 1.5, 1.0, 0.5, //
    0.0, 0.4, 0.8, 1.1, 1.3, 1.4, 1.5, 1.4, 1.2, 0.9, 0.6, 0.3,
];

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap()
}

fn at(hours: i64) -> DateTime<Utc> {
    day_start() + Duration::hours(hours)
}

/// Hourly samples starting at `start`.
fn hourly(start: DateTime<Utc>, values: &[f64]) -> Vec<Sample> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Sample::new(start + Duration::hours(i as i64), *v))
        .collect()
}

fn site(method: DetectionMethod) -> SiteConfig {
    SiteConfig {
        site_id: "test-harbor".to_string(),
        name: "Test Harbor".to_string(),
        observation_station: "9999001".to_string(),
        crest_station: Some("9999001".to_string()),
        source_datum: "MLLW".to_string(),
        datum: Datum::new("MLLW", 0.0),
        thresholds: Thresholds::new(1.0, 2.0, 3.0).unwrap(),
        method,
    }
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        peaks: PeakConfig {
            min_separation: Duration::hours(6),
            min_prominence: 0.3,
            neighborhood_radius: 3,
        },
        crest_windows: CrestWindows::new(Duration::minutes(120), Duration::minutes(60)).unwrap(),
        window: WindowConfig {
            buffer: Duration::hours(36),
            initial_lookback: Duration::days(30),
        },
        duplicate_policy: DuplicatePolicy::FirstSeen,
        tie_break: TieBreak::HigherValue,
    }
}

/// In-memory provider. Counts calls so tests can assert nothing was fetched.
#[derive(Default)]
struct FakeProvider {
    samples: Vec<Sample>,
    crests: Vec<CrestMark>,
    fail: bool,
    calls: Cell<usize>,
}

impl FakeProvider {
    fn with_samples(samples: Vec<Sample>) -> Self {
        Self { samples, ..Default::default() }
    }

    fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }
}

impl ObservationProvider for FakeProvider {
    fn fetch_observations(&self, _station: &str, _window: &TimeWindow) -> Result<Vec<Sample>, IngestError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err(IngestError::Status { status: 503, url: "http://fake".to_string() });
        }
        Ok(self.samples.clone())
    }
}

impl CrestProvider for FakeProvider {
    fn fetch_crests(&self, _station: &str, _window: &TimeWindow) -> Result<Vec<CrestMark>, IngestError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err(IngestError::Status { status: 503, url: "http://fake".to_string() });
        }
        Ok(self.crests.clone())
    }
}

fn providers(fake: &FakeProvider) -> Providers<'_> {
    Providers {
        observations: fake,
        crests: fake,
        source: DataSource::Replay,
    }
}

fn run(
    site: &SiteConfig,
    mode: RunMode,
    fake: &FakeProvider,
    store: &CacheStore,
) -> Result<tidepeak_service::pipeline::RunSummary, PipelineError> {
    run_site(site, mode, now(), &pipeline_config(), &providers(fake), store)
}

// ---------------------------------------------------------------------------
// Detection through to the saved document
// ---------------------------------------------------------------------------

#[test]
fn test_first_incremental_run_creates_cache() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));

    let summary = run(&site, RunMode::Incremental, &fake, &store).unwrap();
    assert_eq!(summary.status, RunStatus::Saved);
    assert_eq!(summary.window.start, now() - Duration::days(30));
    assert_eq!(summary.detected, 2);
    assert_eq!(summary.merge.added, 2);
    assert_eq!(summary.last_processed_time, Some(at(23)));

    let cache = store.load(&site.site_id, TieBreak::HigherValue).unwrap().expect("cache was saved");
    let events = cache.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].observed_time, at(6));
    assert_eq!(events[0].value, 2.5);
    assert_eq!(events[0].category, Category::Moderate);
    assert_eq!(events[0].source_tag, Some(SourceTag::Observed));
    assert_eq!(events[1].observed_time, at(18));
    assert_eq!(events[1].category, Category::Minor);
    assert_eq!(cache.method_tag, "local-maxima-v1");
}

#[test]
fn test_crest_anchored_run_keys_events_by_crest() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::CrestAnchored);
    let fake = FakeProvider {
        samples: hourly(day_start(), &TIDE_DAY),
        crests: vec![
            CrestMark::new(at(6) + Duration::minutes(10)),
            CrestMark::new(at(18)),
            // No observations on the 29th: dropped by the coverage gate.
            CrestMark::new(at(-12)),
        ],
        ..Default::default()
    };

    let summary = run(&site, RunMode::Incremental, &fake, &store).unwrap();
    assert_eq!(summary.status, RunStatus::Saved);
    assert_eq!(summary.detected, 2);
    assert_eq!(summary.uncovered_crests, 1);

    let cache = store.load(&site.site_id, TieBreak::HigherValue).unwrap().unwrap();
    let first = cache.get(&(at(6) + Duration::minutes(10))).expect("keyed by crest time");
    assert_eq!(first.observed_time, at(6));
    assert_eq!(first.value, 2.5);
    let second = cache.get(&at(18)).unwrap();
    assert_eq!(second.value, 1.5);
    assert!(cache.get(&at(-12)).is_none());
    assert_eq!(cache.method_tag, "crest-window-v1");
}

#[test]
fn test_crest_site_without_crests_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::CrestAnchored);
    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));

    let summary = run(&site, RunMode::Incremental, &fake, &store).unwrap();
    assert_eq!(summary.status, RunStatus::NoCrests);
    assert!(!store.cache_path(&site.site_id).exists());
}

#[test]
fn test_empty_window_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    // All data predates the incremental window.
    let old = Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap();
    let fake = FakeProvider::with_samples(hourly(old, &TIDE_DAY));

    let summary = run(&site, RunMode::Incremental, &fake, &store).unwrap();
    assert_eq!(summary.status, RunStatus::NoObservations);
    assert_eq!(summary.series.outside_window, TIDE_DAY.len());
    assert!(!store.cache_path(&site.site_id).exists());
}

#[test]
fn test_datum_offset_applies_before_classification() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let mut site = site(DetectionMethod::LocalMaxima);
    site.datum = Datum::new("NAVD88", 0.6);
    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));

    run(&site, RunMode::Incremental, &fake, &store).unwrap();
    let cache = store.load(&site.site_id, TieBreak::HigherValue).unwrap().unwrap();
    assert_eq!(cache.datum, "NAVD88");
    let first = cache.get(&at(6)).unwrap();
    assert!((first.value - 3.1).abs() < 1e-9);
    assert_eq!(first.category, Category::Major);
}

// ---------------------------------------------------------------------------
// Reruns
// ---------------------------------------------------------------------------

#[test]
fn test_rerun_with_same_data_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));

    run(&site, RunMode::Incremental, &fake, &store).unwrap();
    let before = fs::read_to_string(store.cache_path(&site.site_id)).unwrap();

    let summary = run(&site, RunMode::Incremental, &fake, &store).unwrap();
    assert_eq!(summary.window.start, at(23) - Duration::hours(36));
    assert!(!summary.merge.changed());
    assert_eq!(summary.merge.unchanged, 2);

    let after = fs::read_to_string(store.cache_path(&site.site_id)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_rerun_keeps_the_higher_value() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);

    let mut revised = TIDE_DAY;
    revised[6] = 3.2;
    run(&site, RunMode::Incremental, &FakeProvider::with_samples(hourly(day_start(), &revised)), &store).unwrap();

    // Original, lower values arrive later: the stored event must not regress.
    let summary = run(&site, RunMode::Incremental, &FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY)), &store)
        .unwrap();
    assert_eq!(summary.merge.updated, 0);

    let cache = store.load(&site.site_id, TieBreak::HigherValue).unwrap().unwrap();
    let event = cache.get(&at(6)).unwrap();
    assert_eq!(event.value, 3.2);
    assert_eq!(event.category, Category::Major);
}

#[test]
fn test_method_change_resets_events_but_keeps_watermark() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let samples = hourly(day_start(), &TIDE_DAY);

    run(&site(DetectionMethod::LocalMaxima), RunMode::Incremental, &FakeProvider::with_samples(samples.clone()), &store)
        .unwrap();

    let fake = FakeProvider {
        samples,
        crests: vec![CrestMark::new(at(18) + Duration::minutes(20))],
        ..Default::default()
    };
    let summary = run(&site(DetectionMethod::CrestAnchored), RunMode::Incremental, &fake, &store).unwrap();
    assert!(summary.merge.reset);
    assert_eq!(summary.merge.discarded, 2);
    assert_eq!(summary.total_events, 1);
    assert_eq!(summary.last_processed_time, Some(at(23)));

    let cache = store.load("test-harbor", TieBreak::HigherValue).unwrap().unwrap();
    assert_eq!(cache.method_tag, "crest-window-v1");
    assert!(cache.get(&at(6)).is_none());
    assert!(cache.get(&(at(18) + Duration::minutes(20))).is_some());
}

#[test]
fn test_document_naming_another_site_is_saved_back_to_its_own_file() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    // Older caches recorded the station id rather than the site id.
    let document = r#"{
        "site": "9999001",
        "datum": "MLLW",
        "thresholds": {"minor": 1.0, "moderate": 2.0, "major": 3.0},
        "methodTag": "local-maxima-v1",
        "events": []
    }"#;
    fs::write(store.cache_path(&site.site_id), document).unwrap();

    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));
    let summary = run(&site, RunMode::Incremental, &fake, &store).unwrap();
    assert_eq!(summary.saved_to, Some(store.cache_path(&site.site_id)));
    assert!(!store.cache_path("9999001").exists());

    let cache = store.load(&site.site_id, TieBreak::HigherValue).unwrap().unwrap();
    assert_eq!(cache.site, "test-harbor");
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.last_processed_time, Some(at(23)));
}

// ---------------------------------------------------------------------------
// Failures leave the cache untouched
// ---------------------------------------------------------------------------

#[test]
fn test_upstream_failure_leaves_cache_untouched() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);

    run(&site, RunMode::Incremental, &FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY)), &store).unwrap();
    let before = fs::read_to_string(store.cache_path(&site.site_id)).unwrap();

    let err = run(&site, RunMode::Incremental, &FakeProvider::failing(), &store).unwrap_err();
    assert!(matches!(err, PipelineError::Ingest(IngestError::Status { status: 503, .. })));
    assert!(!err.is_configuration());

    let after = fs::read_to_string(store.cache_path(&site.site_id)).unwrap();
    assert_eq!(before, after);
    assert!(!store.tmp_path(&site.site_id).exists());
}

#[test]
fn test_cache_without_thresholds_is_fatal() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    let document = r#"{"site":"test-harbor","datum":"MLLW","methodTag":"local-maxima-v1","events":[]}"#;
    fs::write(store.cache_path(&site.site_id), document).unwrap();

    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));
    let err = run(&site, RunMode::Incremental, &fake, &store).unwrap_err();
    assert!(matches!(err, PipelineError::Cache(CacheError::MissingThresholds { .. })));
    assert!(err.is_configuration());
    assert_eq!(fake.calls.get(), 0, "nothing is fetched for a broken cache");
    assert_eq!(fs::read_to_string(store.cache_path(&site.site_id)).unwrap(), document);
}

#[test]
fn test_bad_backfill_year_is_rejected_before_fetching() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));

    let err = run(&site, RunMode::BackfillRange { start: 2024, end: 2020 }, &fake, &store).unwrap_err();
    assert!(err.is_configuration());
    let err = run(&site, RunMode::BackfillYear(2030), &fake, &store).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(fake.calls.get(), 0);
    assert!(!store.cache_path(&site.site_id).exists());
}

#[test]
fn test_locked_site_fails_fast() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));

    let held = store.lock(&site.site_id).unwrap();
    let err = run(&site, RunMode::Incremental, &fake, &store).unwrap_err();
    assert!(matches!(err, PipelineError::Cache(CacheError::Locked { .. })));
    assert_eq!(fake.calls.get(), 0);

    drop(held);
    assert!(run(&site, RunMode::Incremental, &fake, &store).is_ok());
}

// ---------------------------------------------------------------------------
// Watermarks
// ---------------------------------------------------------------------------

#[test]
fn test_backfill_sets_watermark_to_window_end() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    let summer = Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap();
    let fake = FakeProvider::with_samples(hourly(summer, &TIDE_DAY));

    let summary = run(&site, RunMode::BackfillYear(2023), &fake, &store).unwrap();
    assert_eq!(summary.status, RunStatus::Saved);
    assert_eq!(summary.detected, 2);
    assert!(!summary.window.end_inclusive);
    assert_eq!(summary.last_processed_time, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
}

#[test]
fn test_backfill_of_current_year_stops_at_now() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    let fake = FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY));

    let summary = run(&site, RunMode::BackfillYear(2024), &fake, &store).unwrap();
    assert_eq!(summary.last_processed_time, Some(now()));
}

/// A backfill over a year with no data is a skip like any empty window: the
/// watermark is not advanced to the window end and nothing is written.
#[test]
fn test_backfill_without_observations_keeps_watermark() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);

    run(&site, RunMode::Incremental, &FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY)), &store).unwrap();
    let before = fs::read_to_string(store.cache_path(&site.site_id)).unwrap();

    let summary = run(&site, RunMode::BackfillYear(2022), &FakeProvider::default(), &store).unwrap();
    assert_eq!(summary.status, RunStatus::NoObservations);
    assert_eq!(summary.last_processed_time, Some(at(23)));
    assert_eq!(fs::read_to_string(store.cache_path(&site.site_id)).unwrap(), before);
}

#[test]
fn test_backfill_keeps_events_from_incremental_runs() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::new(dir.path());
    let site = site(DetectionMethod::LocalMaxima);
    let summer = Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap();

    run(&site, RunMode::Incremental, &FakeProvider::with_samples(hourly(day_start(), &TIDE_DAY)), &store).unwrap();
    let summary =
        run(&site, RunMode::BackfillYear(2023), &FakeProvider::with_samples(hourly(summer, &TIDE_DAY)), &store).unwrap();

    assert_eq!(summary.merge.added, 2);
    assert_eq!(summary.total_events, 4);
    let cache = store.load(&site.site_id, TieBreak::HigherValue).unwrap().unwrap();
    let times: Vec<_> = cache.events().iter().map(|e| e.observed_time).collect();
    let mut sorted = times.clone();
    sorted.sort();
    assert_eq!(times, sorted, "events are stored in time order");
}

// ---------------------------------------------------------------------------
// Replay provider end to end
// ---------------------------------------------------------------------------

#[test]
fn test_replay_directory_drives_a_run() {
    let data = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let site = site(DetectionMethod::CrestAnchored);

    let replay = ReplayProvider::new(data.path());
    let samples = hourly(day_start(), &TIDE_DAY);
    fs::write(replay.observations_path("9999001"), serde_json::to_string(&samples).unwrap()).unwrap();
    let crests = vec![CrestMark::new(at(6)), CrestMark::new(at(18))];
    fs::write(replay.crests_path("9999001"), serde_json::to_string(&crests).unwrap()).unwrap();

    let store = CacheStore::new(cache_dir.path());
    let providers = Providers {
        observations: &replay,
        crests: &replay,
        source: DataSource::Replay,
    };
    let summary = run_site(&site, RunMode::Incremental, now(), &pipeline_config(), &providers, &store).unwrap();
    assert_eq!(summary.status, RunStatus::Saved);
    assert_eq!(summary.total_events, 2);
    assert_eq!(summary.saved_to, Some(store.cache_path(&site.site_id)));
}
