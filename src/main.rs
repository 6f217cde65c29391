use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use tidepeak_service::cache::store::CacheStore;
use tidepeak_service::config::{CONFIG_ENV, Settings};
use tidepeak_service::ingest::coops::CoopsClient;
use tidepeak_service::ingest::replay::ReplayProvider;
use tidepeak_service::logging::{self, DataSource};
use tidepeak_service::pipeline::{PipelineConfig, Providers, RunStatus, run_site};
use tidepeak_service::window::{RunMode, compute_window};

#[derive(Parser, Debug)]
#[command(author, version, about = "Maintain per-site flood peak caches for the tide dashboard", long_about = None)]
struct Args {
    /// Settings file (TOML). Falls back to $TIDEPEAK_CONFIG, then built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only run these sites (repeatable). Default: every configured site.
    #[arg(long = "site")]
    sites: Vec<String>,

    /// Backfill one calendar year instead of running incrementally.
    #[arg(long, conflicts_with = "years")]
    year: Option<i32>,

    /// Backfill an inclusive range of calendar years, e.g. 2019-2023.
    #[arg(long, value_parser = parse_year_range)]
    years: Option<RunMode>,

    /// Mirror log output into this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Prefix log lines with a UTC timestamp.
    #[arg(long, default_value_t = false)]
    timestamps: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn mode(&self) -> RunMode {
        match (self.year, self.years) {
            (Some(year), _) => RunMode::BackfillYear(year),
            (None, Some(range)) => range,
            (None, None) => RunMode::Incremental,
        }
    }
}

fn parse_year_range(s: &str) -> Result<RunMode, String> {
    let (start, end) = s
        .split_once(['-', ':'])
        .ok_or_else(|| format!("expected START-END, got '{}'", s))?;
    let start: i32 = start.trim().parse().map_err(|_| format!("bad start year '{}'", start))?;
    let end: i32 = end.trim().parse().map_err(|_| format!("bad end year '{}'", end))?;
    Ok(RunMode::BackfillRange { start, end })
}

fn run() -> Result<bool> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    logging::init_logger(args.verbose, args.log_file.as_deref(), args.timestamps)
        .context("Failed to open log file")?;

    let config_path = args.config.clone().or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from));
    let mut settings = Settings::load(config_path.as_deref())?;
    settings.apply_env(|key| env::var(key).ok());

    let mode = args.mode();
    let now = Utc::now();
    let config = PipelineConfig::from_settings(&settings)?;
    // Reject bad backfill years before any site is touched.
    compute_window(mode, None, now, &config.window)?;
    let sites = settings.select_sites(&args.sites)?;

    let store = CacheStore::new(&settings.cache_dir);
    let http = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(settings.http_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;
    let replay = settings.replay_dir.as_ref().map(ReplayProvider::new);

    logging::info(
        DataSource::System,
        None,
        &format!("{} run for {} site(s), cache at {}", mode, sites.len(), store.dir().display()),
    );

    let mut successful = 0;
    let mut failed = 0;
    for site in &sites {
        let coops = CoopsClient::new(http.clone(), site.source_datum.clone(), settings.application.clone());
        let providers = match &replay {
            Some(replay) => Providers {
                observations: replay,
                crests: replay,
                source: DataSource::Replay,
            },
            None => Providers {
                observations: &coops,
                crests: &coops,
                source: DataSource::Noaa,
            },
        };

        match run_site(site, mode, now, &config, &providers, &store) {
            Ok(summary) => {
                successful += 1;
                if summary.status == RunStatus::Saved {
                    logging::debug(
                        DataSource::System,
                        Some(&site.site_id),
                        &format!("watermark now {:?}", summary.last_processed_time.map(|t| t.to_rfc3339())),
                    );
                }
            }
            Err(e) => {
                failed += 1;
                let kind = if e.is_configuration() { "configuration" } else { "run" };
                logging::error(DataSource::System, Some(&site.site_id), &format!("{} failed: {}", kind, e));
            }
        }
    }

    logging::log_run_summary(sites.len(), successful, failed);
    Ok(failed == 0)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
