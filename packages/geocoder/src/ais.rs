//! AIS (Address Information System) search client.
//!
//! AIS is the city's authoritative geocoder. The search endpoint returns
//! a feature collection whose shape varies by query: a single address
//! candidate, several candidates needing a ZIP tiebreak, or an
//! intersection whose candidates must each be reverse-geocoded. Responses
//! are reduced to the closed [`SearchOutcome`] set at the boundary so the
//! resolution logic never touches raw JSON.
//!
//! Coordinates are fetched once per requested SRID: the initial search
//! runs in the primary SRID and, when both systems are selected, a second
//! search for the accepted candidate's street address fetches the other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use address_enrich_limiter::RateLimiter;
use async_trait::async_trait;
use serde_json::Value;

use crate::retry::{RetryPolicy, with_retries};
use crate::{
    CrsSelection, GEOGRAPHIC_SRID, GeocodeError, GeocodeResolver, GeocodeResult, MatchType,
    PROJECTED_SRID, Resolution, ResolveRequest, check_status,
};

/// Fixed per-call timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One feature from an AIS search or reverse-geocode response.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Canonical street address from the feature properties.
    pub street_address: Option<String>,
    /// ZIP code from the feature properties, used for tiebreaks.
    pub zip_code: Option<String>,
    /// Geometry coordinates as returned: `(lon, lat)` for the geographic
    /// SRID, `(x, y)` for the projected one.
    pub coordinates: Option<(f64, f64)>,
    /// Full properties object, for enrichment field extraction.
    pub properties: serde_json::Map<String, Value>,
}

/// An AIS search response, validated into a closed set of cases.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// 404 or an empty candidate list.
    NotFound,
    /// Exactly one candidate: accepted directly.
    Single(Candidate),
    /// Multiple candidates; only search type `"address"` is tiebroken.
    Multiple {
        /// The response's `search_type`.
        search_type: String,
        /// The service's normalized form of the query, when present.
        normalized: Option<String>,
        /// The candidates.
        candidates: Vec<Candidate>,
    },
    /// An intersection result; candidates resolve via reverse geocoding.
    Intersection {
        /// The service's normalized form of the query, when present.
        normalized: Option<String>,
        /// The candidates.
        candidates: Vec<Candidate>,
    },
}

/// AIS service client.
///
/// Constructed once per run and shared by reference across the worker
/// pool; the rate limiter is the single shared instance for this service.
pub struct AisClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    crs: CrsSelection,
    enrichment_fields: Vec<String>,
}

impl AisClient {
    /// Creates a client.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: &str,
        limiter: Arc<RateLimiter>,
        crs: CrsSelection,
        enrichment_fields: Vec<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            limiter,
            retry: RetryPolicy::default(),
            crs,
            enrichment_fields,
        }
    }

    /// Overrides the default retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Searches AIS for an address in the given SRID, with rate limiting
    /// and bounded retries.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] on transport, authentication, or parse
    /// failure, or when retries are exhausted.
    pub async fn search(&self, address: &str, srid: u32) -> Result<SearchOutcome, GeocodeError> {
        with_retries(self.retry, || self.search_once(address, srid)).await
    }

    async fn search_once(&self, address: &str, srid: u32) -> Result<SearchOutcome, GeocodeError> {
        self.limiter.acquire().await;

        let url = format!("{}/v1/search/{}", self.base_url, encode_path_segment(address));
        let srid_param = srid.to_string();
        let response = self
            .http
            .get(&url)
            .query(&[
                ("gatekeeperKey", self.api_key.as_str()),
                ("srid", srid_param.as_str()),
                ("max_range", "0"),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(SearchOutcome::NotFound);
        }
        check_status(response.status())?;

        let body: Value = response.json().await?;
        parse_search_response(&body)
    }

    async fn reverse_once(&self, lon: f64, lat: f64) -> Result<Vec<Candidate>, GeocodeError> {
        self.limiter.acquire().await;

        let url = format!("{}/v1/reverse_geocode/{lon},{lat}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("gatekeeperKey", self.api_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        check_status(response.status())?;

        let body: Value = response.json().await?;
        let features = body
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| GeocodeError::Parse {
                message: "AIS reverse response missing 'features' array".to_string(),
            })?;
        Ok(features.iter().map(parse_candidate).collect())
    }

    /// Reverse-geocodes every intersection candidate geometry and applies
    /// the ZIP tiebreak to the combined reverse results.
    async fn resolve_intersection(
        &self,
        candidates: &[Candidate],
        zip: Option<&str>,
    ) -> Result<Option<Candidate>, GeocodeError> {
        let mut reverse_candidates = Vec::new();
        for candidate in candidates {
            let Some((lon, lat)) = candidate.coordinates else {
                continue;
            };
            let results = with_retries(self.retry, || self.reverse_once(lon, lat)).await?;
            reverse_candidates.extend(results);
        }
        Ok(tiebreak_reverse(&reverse_candidates, zip))
    }

    /// Fetches the accepted candidate's coordinates in the other SRID by
    /// re-searching its street address.
    async fn fetch_other_srid(
        &self,
        address: &str,
        srid: u32,
    ) -> Result<Option<(f64, f64)>, GeocodeError> {
        match self.search(address, srid).await? {
            SearchOutcome::NotFound => Ok(None),
            SearchOutcome::Single(candidate) => Ok(candidate.coordinates),
            SearchOutcome::Multiple { candidates, .. }
            | SearchOutcome::Intersection { candidates, .. } => {
                let preferred = candidates
                    .iter()
                    .find(|c| c.street_address.as_deref() == Some(address));
                Ok(preferred
                    .or_else(|| candidates.first())
                    .and_then(|c| c.coordinates))
            }
        }
    }

    /// The failed-tiebreak terminal state: still flagged as a city
    /// address, but invalid and multiply matched, with null coordinates.
    fn multiple_match(&self, request: &ResolveRequest, normalized: Option<String>) -> Resolution {
        Resolution {
            output_address: normalized.unwrap_or_else(|| request.query_address.clone()),
            is_addr: false,
            is_philly_addr: true,
            is_multiple_match: true,
            match_type: Some(MatchType::Ais),
            coordinates: GeocodeResult::default(),
            enrichment: self
                .enrichment_fields
                .iter()
                .map(|f| (f.clone(), None))
                .collect(),
        }
    }
}

#[async_trait]
impl GeocodeResolver for AisClient {
    async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, GeocodeError> {
        let primary_srid = self.crs.primary_srid();
        let outcome = self.search(&request.query_address, primary_srid).await?;

        let (accepted, normalized) = match outcome {
            SearchOutcome::NotFound => {
                return Ok(Resolution::no_match(request, &self.enrichment_fields));
            }
            SearchOutcome::Single(candidate) => (Some(candidate), None),
            SearchOutcome::Multiple {
                search_type,
                normalized,
                candidates,
            } => {
                let accepted = if search_type == "address" {
                    tiebreak(&candidates, request.zip.as_deref())
                } else {
                    None
                };
                (accepted, normalized)
            }
            SearchOutcome::Intersection {
                normalized,
                candidates,
            } => (
                self.resolve_intersection(&candidates, request.zip.as_deref())
                    .await?,
                normalized,
            ),
        };

        let Some(candidate) = accepted else {
            return Ok(self.multiple_match(request, normalized));
        };

        let accepted_address = candidate
            .street_address
            .clone()
            .unwrap_or_else(|| request.query_address.clone());

        let mut coordinates = GeocodeResult::default();
        if primary_srid == GEOGRAPHIC_SRID {
            if self.crs.geographic {
                coordinates.geographic = candidate.coordinates.map(|(lon, lat)| (lat, lon));
            }
            if self.crs.projected {
                coordinates.projected = self
                    .fetch_other_srid(&accepted_address, PROJECTED_SRID)
                    .await?;
            }
        } else {
            coordinates.projected = candidate.coordinates;
        }

        Ok(Resolution {
            output_address: candidate
                .street_address
                .clone()
                .unwrap_or_else(|| request.output_address.clone()),
            is_addr: true,
            is_philly_addr: true,
            is_multiple_match: false,
            match_type: Some(MatchType::Ais),
            coordinates,
            enrichment: extract_enrichment(&candidate.properties, &self.enrichment_fields),
        })
    }
}

/// Reduces a 200-status search body to a [`SearchOutcome`].
///
/// # Errors
///
/// Returns [`GeocodeError::Parse`] when the body lacks a `features`
/// array.
pub fn parse_search_response(body: &Value) -> Result<SearchOutcome, GeocodeError> {
    let features = body
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| GeocodeError::Parse {
            message: "AIS response missing 'features' array".to_string(),
        })?;

    let mut candidates: Vec<Candidate> = features.iter().map(parse_candidate).collect();
    let search_type = body
        .get("search_type")
        .and_then(Value::as_str)
        .unwrap_or("address")
        .to_string();
    let normalized = body
        .get("normalized")
        .and_then(Value::as_str)
        .map(String::from)
        .filter(|s| !s.is_empty());

    if search_type == "intersection" {
        return Ok(SearchOutcome::Intersection {
            normalized,
            candidates,
        });
    }

    match candidates.len() {
        0 => Ok(SearchOutcome::NotFound),
        1 => Ok(SearchOutcome::Single(candidates.remove(0))),
        _ => Ok(SearchOutcome::Multiple {
            search_type,
            normalized,
            candidates,
        }),
    }
}

/// Extracts one feature into a [`Candidate`].
fn parse_candidate(feature: &Value) -> Candidate {
    let properties = feature
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let street_address = properties
        .get("street_address")
        .and_then(Value::as_str)
        .map(String::from)
        .filter(|s| !s.is_empty());
    let zip_code = properties
        .get("zip_code")
        .and_then(Value::as_str)
        .map(String::from);

    let coordinates = feature
        .pointer("/geometry/coordinates")
        .and_then(Value::as_array)
        .and_then(|coords| {
            let first = coords.first()?.as_f64()?;
            let second = coords.get(1)?.as_f64()?;
            Some((first, second))
        });

    Candidate {
        street_address,
        zip_code,
        coordinates,
        properties,
    }
}

/// ZIP tiebreak for multi-candidate address responses: exactly one
/// candidate whose ZIP equals the input ZIP wins. No input ZIP, or zero
/// or several survivors, fails the tiebreak.
#[must_use]
pub fn tiebreak(candidates: &[Candidate], zip: Option<&str>) -> Option<Candidate> {
    let zip = zip?;
    let survivors: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.zip_code.as_deref() == Some(zip))
        .collect();
    if survivors.len() == 1 {
        Some(survivors[0].clone())
    } else {
        None
    }
}

/// Tiebreak for reverse-geocode results: a missing input ZIP accepts
/// every candidate; the first survivor wins.
#[must_use]
pub fn tiebreak_reverse(candidates: &[Candidate], zip: Option<&str>) -> Option<Candidate> {
    candidates
        .iter()
        .find(|c| zip.is_none_or(|z| c.zip_code.as_deref() == Some(z)))
        .cloned()
}

/// Copies requested enrichment properties off a candidate.
///
/// Absence is checked explicitly: a missing key, null, empty string, or
/// empty collection all yield `None` (some fields, like property owners,
/// come back as an empty array rather than being omitted).
fn extract_enrichment(
    properties: &serde_json::Map<String, Value>,
    fields: &[String],
) -> HashMap<String, Option<String>> {
    fields
        .iter()
        .map(|field| {
            let value = properties.get(field).and_then(|v| match v {
                Value::Null => None,
                Value::String(s) if s.is_empty() => None,
                Value::String(s) => Some(s.clone()),
                Value::Array(a) if a.is_empty() => None,
                other => Some(other.to_string()),
            });
            (field.clone(), value)
        })
        .collect()
}

/// Percent-encodes an address for use as a URL path segment.
fn encode_path_segment(s: &str) -> String {
    s.replace('%', "%25")
        .replace(' ', "%20")
        .replace('#', "%23")
        .replace('&', "%26")
        .replace('?', "%3F")
        .replace('/', "%2F")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(street: &str, zip: &str, lon: f64, lat: f64) -> Value {
        serde_json::json!({
            "properties": { "street_address": street, "zip_code": zip },
            "geometry": { "coordinates": [lon, lat] }
        })
    }

    #[test]
    fn parses_single_candidate() {
        let body = serde_json::json!({
            "search_type": "address",
            "features": [feature("1234 MARKET ST", "19107", -75.16, 39.95)]
        });
        let outcome = parse_search_response(&body).unwrap();
        match outcome {
            SearchOutcome::Single(candidate) => {
                assert_eq!(candidate.street_address.as_deref(), Some("1234 MARKET ST"));
                assert_eq!(candidate.zip_code.as_deref(), Some("19107"));
                assert_eq!(candidate.coordinates, Some((-75.16, 39.95)));
            }
            other => panic!("expected Single, got {other:?}"),
        }
    }

    #[test]
    fn parses_multiple_address_candidates() {
        let body = serde_json::json!({
            "search_type": "address",
            "normalized": "1234 MARKET ST",
            "features": [
                feature("1234 N MARKET ST", "19107", -75.16, 39.95),
                feature("1234 S MARKET ST", "11111", -75.16, 39.95),
            ]
        });
        match parse_search_response(&body).unwrap() {
            SearchOutcome::Multiple {
                search_type,
                normalized,
                candidates,
            } => {
                assert_eq!(search_type, "address");
                assert_eq!(normalized.as_deref(), Some("1234 MARKET ST"));
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn parses_intersection() {
        let body = serde_json::json!({
            "search_type": "intersection",
            "features": [
                feature("12TH ST & MARKET ST", "19107", -75.1609, 39.9523),
            ]
        });
        assert!(matches!(
            parse_search_response(&body).unwrap(),
            SearchOutcome::Intersection { .. }
        ));
    }

    #[test]
    fn empty_features_is_not_found() {
        let body = serde_json::json!({ "search_type": "address", "features": [] });
        assert_eq!(
            parse_search_response(&body).unwrap(),
            SearchOutcome::NotFound
        );
    }

    #[test]
    fn missing_features_is_a_parse_error() {
        let body = serde_json::json!({ "status": "weird" });
        assert!(matches!(
            parse_search_response(&body),
            Err(GeocodeError::Parse { .. })
        ));
    }

    #[test]
    fn candidate_without_geometry_has_no_coordinates() {
        let body = serde_json::json!({
            "features": [{ "properties": { "street_address": "1 MAIN ST" } }]
        });
        match parse_search_response(&body).unwrap() {
            SearchOutcome::Single(candidate) => assert_eq!(candidate.coordinates, None),
            other => panic!("expected Single, got {other:?}"),
        }
    }

    fn two_candidates() -> Vec<Candidate> {
        match parse_search_response(&serde_json::json!({
            "search_type": "address",
            "features": [
                feature("1234 N MARKET ST", "19107", -75.16, 39.95),
                feature("1234 S MARKET ST", "11111", -75.16, 39.95),
            ]
        }))
        .unwrap()
        {
            SearchOutcome::Multiple { candidates, .. } => candidates,
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn tiebreak_accepts_single_zip_survivor() {
        let accepted = tiebreak(&two_candidates(), Some("19107")).expect("one survivor");
        assert_eq!(accepted.street_address.as_deref(), Some("1234 N MARKET ST"));
    }

    #[test]
    fn tiebreak_fails_with_no_survivor() {
        assert!(tiebreak(&two_candidates(), Some("19104")).is_none());
    }

    #[test]
    fn tiebreak_fails_with_two_survivors() {
        let mut candidates = two_candidates();
        candidates[1].zip_code = Some("19107".to_string());
        assert!(tiebreak(&candidates, Some("19107")).is_none());
    }

    #[test]
    fn tiebreak_fails_without_input_zip() {
        assert!(tiebreak(&two_candidates(), None).is_none());
    }

    #[test]
    fn reverse_tiebreak_accepts_first_when_no_zip() {
        let accepted = tiebreak_reverse(&two_candidates(), None).expect("first");
        assert_eq!(accepted.street_address.as_deref(), Some("1234 N MARKET ST"));
    }

    #[test]
    fn reverse_tiebreak_filters_on_zip() {
        let accepted = tiebreak_reverse(&two_candidates(), Some("11111")).expect("match");
        assert_eq!(accepted.street_address.as_deref(), Some("1234 S MARKET ST"));
    }

    #[test]
    fn enrichment_checks_absence_explicitly() {
        let properties = serde_json::json!({
            "census_tract_2020": "9891",
            "opa_owners": [],
            "police_district": "",
            "council_district_2024": ["7"]
        });
        let Value::Object(properties) = properties else {
            unreachable!()
        };
        let fields = vec![
            "census_tract_2020".to_string(),
            "opa_owners".to_string(),
            "police_district".to_string(),
            "council_district_2024".to_string(),
            "ward".to_string(),
        ];
        let enrichment = extract_enrichment(&properties, &fields);
        assert_eq!(
            enrichment.get("census_tract_2020"),
            Some(&Some("9891".to_string()))
        );
        assert_eq!(enrichment.get("opa_owners"), Some(&None));
        assert_eq!(enrichment.get("police_district"), Some(&None));
        assert_eq!(
            enrichment.get("council_district_2024"),
            Some(&Some("[\"7\"]".to_string()))
        );
        assert_eq!(enrichment.get("ward"), Some(&None));
    }

    #[test]
    fn encodes_path_segments() {
        assert_eq!(encode_path_segment("1234 mkt st"), "1234%20mkt%20st");
        assert_eq!(encode_path_segment("12th & market"), "12th%20%26%20market");
    }
}
