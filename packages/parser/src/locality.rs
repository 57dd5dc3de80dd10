//! Locality tagging and jurisdiction classification.
//!
//! [`tag_full_address`] pulls city/state/ZIP substrings out of a one-line
//! address; [`classify`] decides whether the tagged locality is
//! Philadelphia. City/state evidence always overrides the ZIP: a matching
//! city+state pair is Philadelphia no matter what the ZIP says, and a
//! contradicting city or state is non-Philadelphia no matter what the ZIP
//! says. The ZIP is consulted only when city and state are silent, and an
//! address with no locality evidence at all defaults to Philadelphia with
//! the `is_undetermined` flag set.

use std::sync::LazyLock;

use regex::Regex;

use crate::zips::is_philly_zip;

/// City/state/ZIP substrings extracted from an address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalityTag {
    /// City / place name, if one could be identified.
    pub city: Option<String>,
    /// State name or two-letter abbreviation, if present.
    pub state: Option<String>,
    /// ZIP5 or ZIP+4, if present.
    pub zip: Option<String>,
}

/// The jurisdiction decision for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Whether the address belongs to Philadelphia.
    pub is_local: bool,
    /// True when no city/state/ZIP evidence was available and the record
    /// defaulted to local. Such addresses get a locality suffix appended
    /// before being sent to the geocoding services.
    pub is_undetermined: bool,
}

impl Classification {
    const LOCAL: Self = Self {
        is_local: true,
        is_undetermined: false,
    };
    const LOCAL_UNDETERMINED: Self = Self {
        is_local: true,
        is_undetermined: true,
    };
    const NON_LOCAL: Self = Self {
        is_local: false,
        is_undetermined: false,
    };
}

/// Accepted spellings of the city name.
const CITY_NAMES: &[&str] = &["PHILADELPHIA", "PHILA", "PHILLY"];

/// Accepted spellings of the state.
const STATE_NAMES: &[&str] = &["PENNSYLVANIA", "PA", "PENN"];

/// Two-letter USPS state abbreviations (plus DC).
const STATE_ABBREVS: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DC", "DE", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY",
];

/// One-word state names that show up spelled out in address data.
const ONE_WORD_STATES: &[&str] = &["PENNSYLVANIA", "PENN", "DELAWARE", "MARYLAND", "VIRGINIA"];

/// Two-word state names that show up spelled out in address data.
const TWO_WORD_STATES: &[&str] = &["NEW JERSEY", "NEW YORK"];

/// Trailing ZIP5 / ZIP+4.
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{5})(?:-\d{4})?\s*$").expect("valid regex"));

/// Extracts city/state/ZIP substrings from a one-line address.
///
/// The ZIP is matched at the end of the string; the city and state are
/// recovered from the trailing comma-separated segments. A bare street
/// address with no commas and no state token yields an empty tag.
#[must_use]
pub fn tag_full_address(address: &str) -> LocalityTag {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return LocalityTag::default();
    }

    let (rest, zip) = ZIP_RE.captures(trimmed).map_or_else(
        || (trimmed.to_string(), None),
        |caps| {
            let full = caps.get(0).map_or(0..0, |m| m.range());
            (
                trimmed[..full.start].trim_end_matches([',', ' ']).to_string(),
                caps.get(1).map(|m| m.as_str().to_string()),
            )
        },
    );

    let segments: Vec<&str> = rest
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let (city, state) = match segments.len() {
        0 => (None, None),
        // No commas: a state token can still be recognized at the end,
        // but the city boundary is unknowable.
        1 => (None, split_state(segments[0]).1),
        n => {
            let (city_in_last, state) = split_state(segments[n - 1]);
            let city = city_in_last.or_else(|| {
                if state.is_some() {
                    // "street, city, ST": city is its own segment.
                    (n >= 3).then(|| segments[n - 2].to_string())
                } else {
                    // "street, city": the last segment is the city.
                    Some(segments[n - 1].to_string())
                }
            });
            (city, state)
        }
    };

    LocalityTag { city, state, zip }
}

/// Splits a trailing state token off a segment, returning any leading
/// city text plus the state.
fn split_state(segment: &str) -> (Option<String>, Option<String>) {
    let tokens: Vec<&str> = segment.split_whitespace().collect();
    if tokens.is_empty() {
        return (None, None);
    }

    let upper: Vec<String> = tokens.iter().map(|t| t.to_uppercase()).collect();

    if upper.len() >= 2 {
        let two_word = format!("{} {}", upper[upper.len() - 2], upper[upper.len() - 1]);
        if TWO_WORD_STATES.contains(&two_word.as_str()) {
            let city = (tokens.len() > 2).then(|| tokens[..tokens.len() - 2].join(" "));
            return (city, Some(two_word));
        }
    }

    let last = &upper[upper.len() - 1];
    if STATE_ABBREVS.contains(&last.as_str()) || ONE_WORD_STATES.contains(&last.as_str()) {
        let city = (tokens.len() > 1).then(|| tokens[..tokens.len() - 1].join(" "));
        return (city, Some(last.clone()));
    }

    (None, None)
}

/// Classifies a tagged locality against Philadelphia.
#[must_use]
pub fn classify(tag: &LocalityTag) -> Classification {
    let city = tag.city.as_deref().map(|c| c.trim().to_uppercase());
    let state = tag.state.as_deref().map(|s| s.trim().to_uppercase());
    let zip = tag.zip.as_deref().map(str::trim).filter(|z| !z.is_empty());

    let city_matches = city
        .as_deref()
        .is_some_and(|c| CITY_NAMES.contains(&c));
    let state_matches = state
        .as_deref()
        .is_some_and(|s| STATE_NAMES.contains(&s));

    // Matching city and state beat everything, including a foreign ZIP.
    if city_matches && state_matches {
        return Classification::LOCAL;
    }

    // A contradicting city or state beats the ZIP too.
    if city.is_some() && !city_matches {
        return Classification::NON_LOCAL;
    }
    if state.is_some() && !state_matches {
        return Classification::NON_LOCAL;
    }

    // City/state silent or non-contradicting: the ZIP decides. No ZIP at
    // all defaults to local, flagged undetermined.
    match zip {
        None => Classification::LOCAL_UNDETERMINED,
        Some(z) if is_philly_zip(z) => Classification::LOCAL,
        Some(_) => Classification::NON_LOCAL,
    }
}

/// Classifies a free-text address, tolerating missing input.
///
/// A null/empty address is not auto-excluded from local processing: it
/// classifies local with `is_undetermined` set.
#[must_use]
pub fn classify_full_address(address: Option<&str>) -> Classification {
    match address {
        None => Classification::LOCAL_UNDETERMINED,
        Some(a) if a.trim().is_empty() => Classification::LOCAL_UNDETERMINED,
        Some(a) => classify(&tag_full_address(a)),
    }
}

/// Classifies discrete city/state/ZIP field values.
#[must_use]
pub fn classify_fields(
    city: Option<&str>,
    state: Option<&str>,
    zip: Option<&str>,
) -> Classification {
    classify(&LocalityTag {
        city: city.map(str::to_string),
        state: state.map(str::to_string),
        zip: zip.map(str::to_string),
    })
}
