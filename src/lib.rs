//! Tide peak cache service.
//!
//! Maintains a per-site cache of flood peak events derived from water level
//! observations, optionally anchored to predicted high tides, for a
//! tide/flood dashboard. Runs as a periodic batch job: each run extends the
//! cache incrementally or backfills explicit calendar years.

pub mod alert;
pub mod analysis;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod stations;
pub mod window;
