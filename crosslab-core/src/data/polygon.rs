//! Polygon.io data provider.
//!
//! Fetches daily aggregate bars from the v2 aggregates endpoint (following
//! `next_url` pagination) and ticker reference data from the v3 reference
//! endpoint. Retries with exponential backoff on rate limiting, server errors
//! and transport failures.
//!
//! The API key travels in an explicit [`PolygonCredentials`] value owned by
//! the provider. It is never logged.

use std::time::Duration;

use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use crate::domain::Bar;

pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

/// Environment variable read by [`PolygonCredentials::from_env`].
pub const API_KEY_ENV: &str = "POLYGON_API_KEY";

/// Polygon API credentials.
#[derive(Debug)]
pub struct PolygonCredentials {
    key: SecretString,
}

impl PolygonCredentials {
    pub fn new(key: impl Into<String>) -> Self {
        let key: String = key.into();
        Self {
            key: SecretString::new(key.into_boxed_str()),
        }
    }

    pub fn from_env() -> Result<Self, DataError> {
        std::env::var(API_KEY_ENV)
            .map(Self::new)
            .map_err(|_| DataError::MissingCredentials(format!("{API_KEY_ENV} is not set")))
    }

    fn key(&self) -> &str {
        self.key.expose_secret()
    }
}

/// v2 aggregates response.
#[derive(Debug, Deserialize)]
struct AggsResponse {
    status: Option<String>,
    results: Option<Vec<AggBar>>,
    next_url: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    vw: Option<f64>,
    n: Option<u64>,
    /// Window start, Unix milliseconds.
    t: i64,
}

/// v3 ticker details response.
#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    status: Option<String>,
    results: Option<TickerResults>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerResults {
    name: String,
    market_cap: Option<f64>,
    description: Option<String>,
    homepage_url: Option<String>,
    branding: Option<Branding>,
}

#[derive(Debug, Deserialize)]
struct Branding {
    icon_url: Option<String>,
}

/// Reference metadata for a ticker. Only `name` is guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerDetails {
    pub symbol: String,
    pub name: String,
    pub market_cap: Option<f64>,
    pub description: Option<String>,
    pub homepage_url: Option<String>,
    pub icon_url: Option<String>,
}

/// Polygon.io provider.
pub struct PolygonProvider {
    client: reqwest::blocking::Client,
    credentials: PolygonCredentials,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl PolygonProvider {
    pub fn new(credentials: PolygonCredentials) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::NetworkUnreachable(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Aggregates URL without the API key.
    fn aggs_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/v2/aggs/ticker/{symbol}/range/1/day/{start}/{end}\
             ?adjusted=true&sort=asc&limit=50000",
            self.base_url
        )
    }

    fn ticker_url(&self, symbol: &str) -> String {
        format!("{}/v3/reference/tickers/{symbol}", self.base_url)
    }

    fn with_key(&self, url: &str) -> String {
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}apiKey={}", self.credentials.key())
    }

    /// GET a JSON document with retry and backoff.
    fn get_json<T: DeserializeOwned>(&self, symbol: &str, url: &str) -> Result<T, DataError> {
        let keyed = self.with_key(url);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                debug!(symbol, attempt, ?delay, "retrying request");
                std::thread::sleep(delay);
            }

            let resp = match self.client.get(&keyed).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.without_url().to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.without_url().to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(DataError::AuthenticationRequired(format!(
                    "Polygon rejected the API key (HTTP {})",
                    status.as_u16()
                )));
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(DataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!(symbol, retry_after, "rate limited by Polygon");
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }
            if status.is_server_error() {
                last_error = Some(DataError::Http {
                    status: status.as_u16(),
                    symbol: symbol.to_string(),
                });
                continue;
            }
            if !status.is_success() {
                return Err(DataError::Http {
                    status: status.as_u16(),
                    symbol: symbol.to_string(),
                });
            }

            return resp.json::<T>().map_err(|e| {
                DataError::ResponseFormatChanged(format!(
                    "failed to parse response for {symbol}: {}",
                    e.without_url()
                ))
            });
        }

        Err(last_error.unwrap_or_else(|| DataError::NetworkUnreachable("max retries exceeded".into())))
    }

    /// Fetch all pages of daily aggregates.
    pub fn fetch_aggregates(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, DataError> {
        let mut bars = Vec::new();
        let mut next = Some(self.aggs_url(symbol, start, end));
        let mut pages = 0usize;

        while let Some(url) = next {
            let resp: AggsResponse = self.get_json(symbol, &url)?;
            let (page, next_url) = parse_aggs(symbol, resp)?;
            pages += 1;
            debug!(symbol, page = pages, bars = page.len(), "fetched aggregates page");
            bars.extend(page);
            next = next_url;
        }

        if bars.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// Fetch reference metadata (name, market cap, description, links).
    pub fn ticker_details(&self, symbol: &str) -> Result<TickerDetails, DataError> {
        let resp: TickerDetailsResponse = self.get_json(symbol, &self.ticker_url(symbol))?;
        parse_ticker_details(symbol, resp)
    }
}

impl DataProvider for PolygonProvider {
    fn name(&self) -> &str {
        "polygon"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let bars = self.fetch_aggregates(symbol, start, end)?;
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars,
            source: DataSource::Polygon,
        })
    }
}

fn api_error(status: Option<String>, error: Option<String>, message: Option<String>) -> String {
    error
        .or(message)
        .unwrap_or_else(|| format!("status {}", status.unwrap_or_else(|| "unknown".into())))
}

/// Convert one aggregates page into bars plus the next page URL.
fn parse_aggs(symbol: &str, resp: AggsResponse) -> Result<(Vec<Bar>, Option<String>), DataError> {
    if matches!(resp.status.as_deref(), Some("ERROR") | Some("NOT_AUTHORIZED")) {
        let detail = api_error(resp.status, resp.error, resp.message);
        return Err(DataError::ResponseFormatChanged(format!("{symbol}: {detail}")));
    }

    let results = resp.results.unwrap_or_default();
    let mut bars = Vec::with_capacity(results.len());
    for agg in results {
        let date = chrono::DateTime::from_timestamp_millis(agg.t)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| {
                DataError::ResponseFormatChanged(format!("invalid timestamp: {}", agg.t))
            })?;
        bars.push(Bar {
            date,
            open: agg.o,
            high: agg.h,
            low: agg.l,
            close: agg.c,
            volume: agg.v.max(0.0).round() as u64,
            vwap: agg.vw,
            transactions: agg.n,
        });
    }

    Ok((bars, resp.next_url))
}

fn parse_ticker_details(
    symbol: &str,
    resp: TickerDetailsResponse,
) -> Result<TickerDetails, DataError> {
    let Some(results) = resp.results else {
        if resp.status.as_deref() == Some("NOT_FOUND") {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let detail = api_error(resp.status, resp.error, resp.message);
        return Err(DataError::ResponseFormatChanged(format!("{symbol}: {detail}")));
    };

    Ok(TickerDetails {
        symbol: symbol.to_string(),
        name: results.name,
        market_cap: results.market_cap,
        description: results.description,
        homepage_url: results.homepage_url,
        icon_url: results.branding.and_then(|b| b.icon_url),
    })
}
