#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding service clients for the address enrichment pipeline.
//!
//! Two services resolve addresses that miss the city address file:
//!
//! 1. **AIS**, the city's Address Information System, authoritative for
//!    Philadelphia. Multi-candidate responses are tiebroken on ZIP code;
//!    intersection results are resolved through reverse geocoding.
//! 2. **TomTom**, a general-purpose `findAddressCandidates` endpoint,
//!    used for AIS misses and for addresses outside the city. The
//!    top-ranked candidate is trusted as-is.
//!
//! Both clients share the same operational contract: every network call
//! first acquires the service's shared [`RateLimiter`], runs with a fixed
//! timeout, and is wrapped in the bounded exponential-backoff helper in
//! [`retry`]. Authentication failures abort the batch; everything else a
//! service can do wrong degrades to a no-match outcome for the record.
//!
//! [`RateLimiter`]: address_enrich_limiter::RateLimiter

pub mod ais;
pub mod retry;
pub mod tomtom;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// SRID of the geographic (longitude/latitude) output system.
pub const GEOGRAPHIC_SRID: u32 = 4326;

/// SRID of the projected (Pennsylvania South state plane) output system.
pub const PROJECTED_SRID: u32 = 2272;

/// Which coordinate systems a run wants populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrsSelection {
    /// Fetch longitude/latitude (EPSG:4326).
    pub geographic: bool,
    /// Fetch state-plane x/y (EPSG:2272).
    pub projected: bool,
}

impl Default for CrsSelection {
    fn default() -> Self {
        Self {
            geographic: true,
            projected: true,
        }
    }
}

impl CrsSelection {
    /// The SRID sent on the initial search call. Geographic wins when
    /// both systems are selected; a run that selects neither still
    /// searches (for match metadata) using the geographic SRID.
    #[must_use]
    pub const fn primary_srid(self) -> u32 {
        if self.geographic || !self.projected {
            GEOGRAPHIC_SRID
        } else {
            PROJECTED_SRID
        }
    }
}

/// Coordinates for one resolved address.
///
/// The pairs are independent: either, both, or neither may be populated,
/// but a pair is never half-populated.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeocodeResult {
    /// `(lat, lon)` in EPSG:4326.
    pub geographic: Option<(f64, f64)>,
    /// `(x, y)` in EPSG:2272.
    pub projected: Option<(f64, f64)>,
}

/// Which source matched a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// The city address file.
    AddressFile,
    /// The AIS search service.
    Ais,
    /// The TomTom fallback service.
    TomTom,
}

impl MatchType {
    /// The value written to the output `match_type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddressFile => "address_file",
            Self::Ais => "ais",
            Self::TomTom => "tomtom",
        }
    }
}

/// Per-record input to a resolver.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// The text sent to the service. May carry a locality suffix appended
    /// upstream for addresses whose locality could not be determined.
    pub query_address: String,
    /// The standardized address to fall back to on no-match.
    pub output_address: String,
    /// ZIP code from the input record, when configured.
    pub zip: Option<String>,
    /// Prior address-validity flag, preserved on no-match.
    pub is_addr: bool,
    /// Prior city-address flag, preserved on no-match.
    pub is_philly_addr: bool,
}

/// What a resolver produced for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Standardized output address.
    pub output_address: String,
    /// Whether the record is a valid address.
    pub is_addr: bool,
    /// Whether the record is a Philadelphia address.
    pub is_philly_addr: bool,
    /// True when a multi-candidate response could not be tiebroken.
    pub is_multiple_match: bool,
    /// The source that matched, if any.
    pub match_type: Option<MatchType>,
    /// Resolved coordinates.
    pub coordinates: GeocodeResult,
    /// Requested enrichment values keyed by field name. Fields the
    /// service did not supply are present with `None`.
    pub enrichment: HashMap<String, Option<String>>,
}

impl Resolution {
    /// The no-match terminal state: prior flags preserved, coordinates
    /// null, no match source, every requested field null.
    #[must_use]
    pub fn no_match(request: &ResolveRequest, fields: &[String]) -> Self {
        Self {
            output_address: request.output_address.clone(),
            is_addr: request.is_addr,
            is_philly_addr: request.is_philly_addr,
            is_multiple_match: false,
            match_type: None,
            coordinates: GeocodeResult::default(),
            enrichment: fields.iter().map(|f| (f.clone(), None)).collect(),
        }
    }
}

/// A geocoding service that resolves one record at a time.
///
/// Implemented by [`ais::AisClient`] and [`tomtom::TomTomClient`], and by
/// fakes in pipeline tests. Clients are constructed once per run and
/// shared by reference across the worker pool.
#[async_trait]
pub trait GeocodeResolver: Send + Sync {
    /// Resolves one record.
    ///
    /// A failed lookup is not an error: it comes back as a no-match
    /// [`Resolution`]. Errors are reserved for conditions that abort the
    /// batch or degrade the record (see [`GeocodeError`]).
    async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, GeocodeError>;
}

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP transport failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// The service rejected the call with an explicit rate-limit signal.
    #[error("Rate limit exceeded (HTTP 429)")]
    RateLimited,

    /// Server-side fault (5xx or other unexpected status).
    #[error("Service error: HTTP {status}")]
    Service {
        /// The HTTP status code.
        status: u16,
    },

    /// Authentication failure. Never retried; aborts the batch.
    #[error("Authentication failure: HTTP {status}. Check the API key.")]
    Auth {
        /// The HTTP status code.
        status: u16,
    },

    /// A retryable error survived every attempt. Aborts the batch.
    #[error("Giving up after {attempts} attempts: {source}")]
    RetryExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The last error observed.
        #[source]
        source: Box<GeocodeError>,
    },
}

impl GeocodeError {
    /// Whether the bounded-retry wrapper should try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::RateLimited | Self::Service { .. }
        )
    }

    /// Whether this error must abort the whole batch.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::RetryExhausted { .. })
    }
}

/// Maps an HTTP status to the error taxonomy. `Ok(())` for 2xx; the
/// caller handles 404 itself before calling this.
pub(crate) fn check_status(status: reqwest::StatusCode) -> Result<(), GeocodeError> {
    let code = status.as_u16();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(GeocodeError::Auth { status: code });
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }
    if !status.is_success() {
        return Err(GeocodeError::Service { status: code });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_taxonomy() {
        assert!(check_status(reqwest::StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(reqwest::StatusCode::UNAUTHORIZED),
            Err(GeocodeError::Auth { status: 401 })
        ));
        assert!(matches!(
            check_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            Err(GeocodeError::RateLimited)
        ));
        assert!(matches!(
            check_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            Err(GeocodeError::Service { status: 500 })
        ));
        assert!(matches!(
            check_status(reqwest::StatusCode::IM_A_TEAPOT),
            Err(GeocodeError::Service { status: 418 })
        ));
    }

    #[test]
    fn primary_srid_prefers_geographic() {
        assert_eq!(CrsSelection::default().primary_srid(), GEOGRAPHIC_SRID);
        let projected_only = CrsSelection {
            geographic: false,
            projected: true,
        };
        assert_eq!(projected_only.primary_srid(), PROJECTED_SRID);
        let neither = CrsSelection {
            geographic: false,
            projected: false,
        };
        assert_eq!(neither.primary_srid(), GEOGRAPHIC_SRID);
    }

    #[test]
    fn no_match_preserves_prior_flags() {
        let request = ResolveRequest {
            query_address: "123 FAKE ST".to_string(),
            output_address: "123 fake st".to_string(),
            zip: None,
            is_addr: false,
            is_philly_addr: true,
        };
        let resolution = Resolution::no_match(&request, &["zip_code".to_string()]);
        assert_eq!(resolution.output_address, "123 fake st");
        assert!(!resolution.is_addr);
        assert!(resolution.is_philly_addr);
        assert_eq!(resolution.match_type, None);
        assert_eq!(resolution.coordinates, GeocodeResult::default());
        assert_eq!(resolution.enrichment.get("zip_code"), Some(&None));
    }

    #[test]
    fn auth_and_exhaustion_are_fatal() {
        assert!(GeocodeError::Auth { status: 401 }.is_fatal());
        let exhausted = GeocodeError::RetryExhausted {
            attempts: 3,
            source: Box::new(GeocodeError::Service { status: 503 }),
        };
        assert!(exhausted.is_fatal());
        assert!(!GeocodeError::RateLimited.is_fatal());
        assert!(!exhausted.is_retryable());
    }
}
