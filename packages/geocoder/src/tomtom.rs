//! TomTom fallback geocoder client.
//!
//! An ArcGIS `findAddressCandidates` endpoint backed by TomTom street
//! data. Used for records AIS could not match and for addresses outside
//! the city, which skip AIS entirely. Candidates come back ranked by
//! score; the top candidate is authoritative and no ZIP tiebreak is
//! applied.
//!
//! TomTom returns full one-line addresses, so the accepted candidate is
//! re-tagged and re-classified: a city-scoped query can still come back
//! with an out-of-city address, and the output flags must say so.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use address_enrich_limiter::RateLimiter;
use address_enrich_parser::AddressParser;
use address_enrich_parser::locality::classify_full_address;
use async_trait::async_trait;
use serde_json::Value;

use crate::retry::{RetryPolicy, with_retries};
use crate::{
    CrsSelection, GEOGRAPHIC_SRID, GeocodeError, GeocodeResolver, GeocodeResult, MatchType,
    PROJECTED_SRID, Resolution, ResolveRequest, check_status,
};

/// Fixed per-call timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One ranked candidate from a `findAddressCandidates` response.
#[derive(Debug, Clone, PartialEq)]
pub struct TomTomCandidate {
    /// Full one-line address text.
    pub address: Option<String>,
    /// `(x, y)` in the requested output SRID.
    pub location: Option<(f64, f64)>,
    /// Match score; candidates arrive ranked by it.
    pub score: Option<f64>,
}

/// TomTom service client.
pub struct TomTomClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    crs: CrsSelection,
    parser: Arc<dyn AddressParser>,
}

impl TomTomClient {
    /// Creates a client. `parser` standardizes candidate address text
    /// into the output address form.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        limiter: Arc<RateLimiter>,
        crs: CrsSelection,
        parser: Arc<dyn AddressParser>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
            retry: RetryPolicy::with_attempts(5),
            crs,
            parser,
        }
    }

    /// Overrides the default retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Searches for ranked candidates in the given SRID, with rate
    /// limiting and bounded retries.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] on transport or parse failure, or when
    /// retries are exhausted.
    pub async fn search(
        &self,
        address: &str,
        srid: u32,
    ) -> Result<Vec<TomTomCandidate>, GeocodeError> {
        with_retries(self.retry, || self.search_once(address, srid)).await
    }

    async fn search_once(
        &self,
        address: &str,
        srid: u32,
    ) -> Result<Vec<TomTomCandidate>, GeocodeError> {
        self.limiter.acquire().await;

        let url = format!("{}/findAddressCandidates", self.base_url);
        let srid_param = srid.to_string();
        let response = self
            .http
            .get(&url)
            .query(&[
                ("Address", address),
                ("f", "pjson"),
                ("outSR", srid_param.as_str()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        check_status(response.status())?;

        let body: Value = response.json().await?;
        parse_candidates(&body)
    }
}

#[async_trait]
impl GeocodeResolver for TomTomClient {
    async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, GeocodeError> {
        let primary_srid = self.crs.primary_srid();
        let candidates = self.search(&request.query_address, primary_srid).await?;

        let Some(top) = candidates.first() else {
            return Ok(Resolution::no_match(request, &[]));
        };

        let address_text = top
            .address
            .clone()
            .unwrap_or_else(|| request.query_address.clone());

        // TomTom may answer a city-scoped query with an address outside
        // the city; re-derive the locality from the returned text.
        let is_philly_addr = classify_full_address(Some(&address_text)).is_local;

        let parsed = self.parser.parse(&address_text);
        let output_address = if parsed.output_address.trim().is_empty() {
            address_text.clone()
        } else {
            parsed.output_address
        };

        let mut coordinates = GeocodeResult::default();
        if primary_srid == GEOGRAPHIC_SRID {
            if self.crs.geographic {
                coordinates.geographic = top.location.map(|(x, y)| (y, x));
            }
            if self.crs.projected {
                let projected = self.search(&request.query_address, PROJECTED_SRID).await?;
                coordinates.projected = projected.first().and_then(|c| c.location);
            }
        } else {
            coordinates.projected = top.location;
        }

        Ok(Resolution {
            output_address,
            is_addr: true,
            is_philly_addr,
            is_multiple_match: false,
            match_type: Some(MatchType::TomTom),
            coordinates,
            enrichment: HashMap::new(),
        })
    }
}

/// Parses a `findAddressCandidates` body into ranked candidates.
///
/// # Errors
///
/// Returns [`GeocodeError::Parse`] when the body lacks a `candidates`
/// array.
pub fn parse_candidates(body: &Value) -> Result<Vec<TomTomCandidate>, GeocodeError> {
    let candidates = body
        .get("candidates")
        .and_then(Value::as_array)
        .ok_or_else(|| GeocodeError::Parse {
            message: "TomTom response missing 'candidates' array".to_string(),
        })?;

    Ok(candidates
        .iter()
        .map(|candidate| TomTomCandidate {
            address: candidate
                .get("address")
                .and_then(Value::as_str)
                .map(String::from)
                .filter(|s| !s.is_empty()),
            location: candidate.get("location").and_then(|location| {
                let x = location.get("x")?.as_f64()?;
                let y = location.get("y")?.as_f64()?;
                Some((x, y))
            }),
            score: candidate.get("score").and_then(Value::as_f64),
        })
        .collect())
}
