/// NOAA CO-OPS (Tides & Currents) Data API client
///
/// Retrieves verified/preliminary six-minute water levels and high/low tide
/// predictions for a tide station.
///
/// API Documentation: https://api.tidesandcurrents.noaa.gov/api/prod/
///
/// The API caps how much data a single request may cover (31 days for
/// six-minute water levels, one year for hi/lo predictions), so longer
/// windows are split into consecutive requests. Chunk boundaries overlap by
/// one timestamp; series normalization removes the duplicate.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::Url;
use serde::Deserialize;

use super::{CrestProvider, IngestError, ObservationProvider};
use crate::model::{CrestMark, Sample};
use crate::window::TimeWindow;

pub const COOPS_BASE_URL: &str = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";

/// Longest span accepted by one six-minute water level request.
pub const WATER_LEVEL_MAX_SPAN_DAYS: i64 = 31;

/// Longest span accepted by one hi/lo prediction request.
pub const HILO_MAX_SPAN_DAYS: i64 = 365;

const COOPS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const REQUEST_TIME_FORMAT: &str = "%Y%m%d %H:%M";

// ============================================================================
// CO-OPS Response Structures
// ============================================================================

/// Either a data payload or an `error` object; CO-OPS returns HTTP 200 for both.
#[derive(Debug, Deserialize)]
pub struct CoopsWaterLevelResponse {
    #[serde(default)]
    pub data: Option<Vec<CoopsValue>>,
    #[serde(default)]
    pub error: Option<CoopsApiError>,
}

#[derive(Debug, Deserialize)]
pub struct CoopsPredictionResponse {
    #[serde(default)]
    pub predictions: Option<Vec<CoopsPrediction>>,
    #[serde(default)]
    pub error: Option<CoopsApiError>,
}

#[derive(Debug, Deserialize)]
pub struct CoopsApiError {
    pub message: String,
}

/// Single water level value. `v` is an empty string when the sensor had no
/// reading for that interval.
#[derive(Debug, Deserialize)]
pub struct CoopsValue {
    pub t: String,
    pub v: String,
}

/// Single hi/lo prediction. `type` is "H" or "L" (or "HH"/"LL" for the
/// higher high and lower low of a mixed tide day).
#[derive(Debug, Deserialize)]
pub struct CoopsPrediction {
    pub t: String,
    pub v: String,
    #[serde(rename = "type")]
    pub kind: String,
}

// ============================================================================
// URL construction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    WaterLevel,
    HiloPredictions,
}

impl Product {
    fn max_span(&self) -> Duration {
        match self {
            Product::WaterLevel => Duration::days(WATER_LEVEL_MAX_SPAN_DAYS),
            Product::HiloPredictions => Duration::days(HILO_MAX_SPAN_DAYS),
        }
    }
}

/// Builds a datagetter URL for one request span.
pub fn build_url(
    base_url: &str,
    station: &str,
    product: Product,
    datum: &str,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    application: &str,
) -> Result<Url, IngestError> {
    let begin = begin.format(REQUEST_TIME_FORMAT).to_string();
    let end = end.format(REQUEST_TIME_FORMAT).to_string();
    let mut params = vec![
        ("begin_date", begin.as_str()),
        ("end_date", end.as_str()),
        ("station", station),
        ("datum", datum),
        ("units", "english"),
        ("time_zone", "gmt"),
        ("format", "json"),
        ("application", application),
    ];
    match product {
        Product::WaterLevel => params.push(("product", "water_level")),
        Product::HiloPredictions => {
            params.push(("product", "predictions"));
            params.push(("interval", "hilo"));
        }
    }
    Url::parse_with_params(base_url, &params).map_err(|e| IngestError::Parse(format!("bad CO-OPS URL: {}", e)))
}

/// Splits a window into spans no longer than `max_span`.
pub fn request_spans(window: &TimeWindow, max_span: Duration) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut spans = Vec::new();
    let mut begin = window.start;
    while begin < window.end {
        let end = (begin + max_span).min(window.end);
        spans.push((begin, end));
        begin = end;
    }
    spans
}

// ============================================================================
// Payload parsing
// ============================================================================

fn parse_time(t: &str) -> Result<DateTime<Utc>, IngestError> {
    NaiveDateTime::parse_from_str(t, COOPS_TIME_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|e| IngestError::Parse(format!("bad CO-OPS timestamp '{}': {}", t, e)))
}

/// CO-OPS reports an empty window as an error message rather than an empty
/// array; that case is "no data", not a failure.
fn is_no_data(err: &CoopsApiError) -> bool {
    err.message.to_ascii_lowercase().contains("no data was found")
}

/// Parses a water_level JSON body. Blank values are skipped.
pub fn parse_water_level_response(body: &str) -> Result<Vec<Sample>, IngestError> {
    let response: CoopsWaterLevelResponse =
        serde_json::from_str(body).map_err(|e| IngestError::Parse(e.to_string()))?;

    if let Some(err) = response.error {
        return if is_no_data(&err) { Ok(Vec::new()) } else { Err(IngestError::Api(err.message)) };
    }

    let mut samples = Vec::new();
    for value in response.data.unwrap_or_default() {
        if value.v.trim().is_empty() {
            continue;
        }
        let level: f64 = value
            .v
            .trim()
            .parse()
            .map_err(|_| IngestError::Parse(format!("bad CO-OPS value '{}' at {}", value.v, value.t)))?;
        samples.push(Sample::new(parse_time(&value.t)?, level));
    }
    Ok(samples)
}

/// Parses a hi/lo predictions JSON body, keeping only high tides.
pub fn parse_hilo_response(body: &str) -> Result<Vec<CrestMark>, IngestError> {
    let response: CoopsPredictionResponse =
        serde_json::from_str(body).map_err(|e| IngestError::Parse(e.to_string()))?;

    if let Some(err) = response.error {
        return if is_no_data(&err) { Ok(Vec::new()) } else { Err(IngestError::Api(err.message)) };
    }

    response
        .predictions
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p.kind.trim().starts_with('H'))
        .map(|p| parse_time(&p.t).map(CrestMark::new))
        .collect()
}

// ============================================================================
// API Client
// ============================================================================

/// Blocking CO-OPS client bound to the datum values are requested in.
pub struct CoopsClient {
    http: reqwest::blocking::Client,
    base_url: String,
    datum: String,
    application: String,
}

impl CoopsClient {
    pub fn new(http: reqwest::blocking::Client, datum: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            http,
            base_url: COOPS_BASE_URL.to_string(),
            datum: datum.into(),
            application: application.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn get_text(&self, url: Url) -> Result<String, IngestError> {
        let response = self.http.get(url.clone()).header("Accept", "application/json").send()?;
        if !response.status().is_success() {
            return Err(IngestError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text()?)
    }

    fn fetch_spans<T>(
        &self,
        station: &str,
        window: &TimeWindow,
        product: Product,
        parse: fn(&str) -> Result<Vec<T>, IngestError>,
    ) -> Result<Vec<T>, IngestError> {
        let mut out = Vec::new();
        for (begin, end) in request_spans(window, product.max_span()) {
            let url = build_url(&self.base_url, station, product, &self.datum, begin, end, &self.application)?;
            out.extend(parse(&self.get_text(url)?)?);
        }
        Ok(out)
    }
}

impl ObservationProvider for CoopsClient {
    fn fetch_observations(&self, station: &str, window: &TimeWindow) -> Result<Vec<Sample>, IngestError> {
        self.fetch_spans(station, window, Product::WaterLevel, parse_water_level_response)
    }
}

impl CrestProvider for CoopsClient {
    fn fetch_crests(&self, station: &str, window: &TimeWindow) -> Result<Vec<CrestMark>, IngestError> {
        self.fetch_spans(station, window, Product::HiloPredictions, parse_hilo_response)
    }
}

// ============================================================================
// Tests
// ============================================================================
