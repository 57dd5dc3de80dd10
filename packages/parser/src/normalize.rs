//! Rules-based street address standardization.
//!
//! Addresses arrive in assorted shapes:
//! - Abbreviation soup: `"1234 mkt st"`
//! - Spelled-out suffixes: `"1001 Loney Street"`
//! - Intersections: `"12th and mkt"`
//!
//! [`StreetParser`] uppercases, strips punctuation noise, canonicalizes
//! directionals and street-type suffixes, expands known street-name
//! aliases, and resolves the street against a directory of known city
//! streets. Only addresses whose street resolves to a directory code get
//! the standardized form back; everything else passes through unchanged
//! so downstream services see the user's original text.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::{AddressParser, ParseError, ParsedAddress};

/// House number: digits with an optional range or unit letter
/// (`"1234"`, `"1234-36"`, `"1234A"`).
static HOUSE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:-\d+)?[A-Z]?$").expect("valid regex"));

/// Characters that never carry address meaning.
static PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.;#@!?]").expect("valid regex"));

/// Street-type suffixes and their canonical abbreviations.
const SUFFIXES: &[(&str, &str)] = &[
    ("ALLEY", "ALY"),
    ("ALY", "ALY"),
    ("AV", "AVE"),
    ("AVE", "AVE"),
    ("AVENUE", "AVE"),
    ("BLVD", "BLVD"),
    ("BOULEVARD", "BLVD"),
    ("CIR", "CIR"),
    ("CIRCLE", "CIR"),
    ("COURT", "CT"),
    ("CT", "CT"),
    ("DR", "DR"),
    ("DRIVE", "DR"),
    ("LANE", "LN"),
    ("LN", "LN"),
    ("PARKWAY", "PKWY"),
    ("PIKE", "PIKE"),
    ("PKWY", "PKWY"),
    ("PL", "PL"),
    ("PLACE", "PL"),
    ("RD", "RD"),
    ("ROAD", "RD"),
    ("ROW", "ROW"),
    ("SQ", "SQ"),
    ("SQUARE", "SQ"),
    ("ST", "ST"),
    ("STR", "ST"),
    ("STREET", "ST"),
    ("TER", "TER"),
    ("TERRACE", "TER"),
    ("WALK", "WALK"),
    ("WAY", "WAY"),
];

/// Directional prefixes and their canonical abbreviations.
const DIRECTIONALS: &[(&str, &str)] = &[
    ("E", "E"),
    ("EAST", "E"),
    ("N", "N"),
    ("NORTH", "N"),
    ("S", "S"),
    ("SOUTH", "S"),
    ("W", "W"),
    ("WEST", "W"),
];

/// Common alternate spellings of street names.
const NAME_ALIASES: &[(&str, &str)] = &[
    ("GTN", "GERMANTOWN"),
    ("JFK", "JOHN F KENNEDY"),
    ("MKT", "MARKET"),
    ("PSYK", "PASSYUNK"),
    ("WASH", "WASHINGTON"),
];

/// Embedded default street directory.
const DEFAULT_DIRECTORY: &str = include_str!("../data/streets.txt");

/// A parsed street portion: house number, directional, name, suffix.
struct StreetParts {
    number: Option<String>,
    predir: Option<String>,
    name: String,
    suffix: Option<String>,
}

impl StreetParts {
    /// The directory lookup key: name plus suffix, no house number or
    /// directional.
    fn directory_key(&self) -> String {
        match &self.suffix {
            Some(suffix) => format!("{} {suffix}", self.name),
            None => self.name.clone(),
        }
    }

    /// The full standardized street text.
    fn canonical(&self) -> String {
        let mut out = String::new();
        for part in [
            self.number.as_deref(),
            self.predir.as_deref(),
            Some(self.name.as_str()),
            self.suffix.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(part);
        }
        out
    }
}

/// Rules-based [`AddressParser`] backed by a street directory.
#[derive(Debug)]
pub struct StreetParser {
    /// Street name (+ suffix) → street code.
    directory: HashMap<String, String>,
}

impl Default for StreetParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreetParser {
    /// Creates a parser with the embedded default street directory.
    ///
    /// # Panics
    ///
    /// Panics if the embedded directory is malformed (a compile-time
    /// guarantee, exercised by tests).
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: parse_directory(DEFAULT_DIRECTORY)
                .unwrap_or_else(|e| panic!("embedded street directory invalid: {e}")),
        }
    }

    /// Creates a parser from a street directory file.
    ///
    /// Each non-comment line is `street_code <space> street name`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the file cannot be read or a line is
    /// malformed.
    pub fn from_directory_file(path: &Path) -> Result<Self, ParseError> {
        let content = std::fs::read_to_string(path)?;
        let directory = parse_directory(&content)?;
        log::debug!(
            "Loaded {} streets from {}",
            directory.len(),
            path.display()
        );
        Ok(Self { directory })
    }

    /// Creates a parser from street directory text.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if a line is malformed.
    pub fn from_directory_text(content: &str) -> Result<Self, ParseError> {
        Ok(Self {
            directory: parse_directory(content)?,
        })
    }

    /// Resolves a street against the directory, trying the key as given,
    /// without its suffix, and with the default `ST` suffix.
    fn lookup(&self, parts: &StreetParts) -> Option<String> {
        let key = parts.directory_key();
        if let Some(code) = self.directory.get(&key) {
            return Some(code.clone());
        }
        if parts.suffix.is_none() {
            if let Some(code) = self.directory.get(&format!("{} ST", parts.name)) {
                return Some(code.clone());
            }
        }
        self.directory.get(&parts.name).cloned()
    }
}

impl AddressParser for StreetParser {
    fn parse(&self, raw: &str) -> ParsedAddress {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ParsedAddress::passthrough(raw);
        }

        // City/state/ZIP live after the first comma; the street is before.
        let street_portion = trimmed.split(',').next().unwrap_or(trimmed);
        let cleaned = PUNCT_RE.replace_all(street_portion, " ").to_uppercase();

        // Intersections: "A / B", "A & B", "A AND B".
        for sep in [" / ", " & ", " AND "] {
            if let Some(idx) = cleaned.find(sep) {
                let first = &cleaned[..idx];
                let second = &cleaned[idx + sep.len()..];
                if !first.trim().is_empty() && !second.trim().is_empty() {
                    return self.parse_intersection(raw, first, second);
                }
            }
        }

        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        let Some((first, rest)) = tokens.split_first() else {
            return ParsedAddress::passthrough(raw);
        };

        if !HOUSE_NUMBER_RE.is_match(first) || rest.is_empty() {
            return ParsedAddress::passthrough(raw);
        }

        let mut parts = normalize_street(rest);
        parts.number = Some((*first).to_string());

        if parts.name.is_empty() {
            return ParsedAddress::passthrough(raw);
        }

        let street_code = self.lookup(&parts);
        let output_address = if street_code.is_some() {
            parts.canonical()
        } else {
            raw.to_string()
        };

        ParsedAddress {
            output_address,
            is_addr: true,
            street_code,
        }
    }
}

impl StreetParser {
    /// Parses an intersection. Both legs must resolve in the directory
    /// for the intersection to count as a city address; the standardized
    /// form joins the legs with `&`.
    fn parse_intersection(&self, raw: &str, first: &str, second: &str) -> ParsedAddress {
        let first_parts = normalize_street(&first.split_whitespace().collect::<Vec<_>>());
        let second_parts = normalize_street(&second.split_whitespace().collect::<Vec<_>>());

        if first_parts.name.is_empty() || second_parts.name.is_empty() {
            return ParsedAddress::passthrough(raw);
        }

        let first_code = self.lookup(&first_parts);
        let second_code = self.lookup(&second_parts);

        if let (Some(code), Some(_)) = (&first_code, &second_code) {
            // Surface each leg with its directory suffix so the output
            // reads "12TH ST & MARKET ST" even for "12th and mkt".
            let leg = |parts: &StreetParts| {
                if parts.suffix.is_some() {
                    parts.canonical()
                } else {
                    format!("{} ST", parts.canonical())
                }
            };
            ParsedAddress {
                output_address: format!("{} & {}", leg(&first_parts), leg(&second_parts)),
                is_addr: false,
                street_code: Some(code.clone()),
            }
        } else {
            ParsedAddress::passthrough(raw)
        }
    }
}

/// Canonicalizes the street tokens after the house number.
fn normalize_street(tokens: &[&str]) -> StreetParts {
    let mut expanded: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match NAME_ALIASES.iter().find(|(from, _)| from == token) {
            Some((_, to)) => expanded.extend(to.split_whitespace().map(String::from)),
            None => expanded.push((*token).to_string()),
        }
    }

    let predir = if expanded.len() > 1 {
        DIRECTIONALS
            .iter()
            .find(|(from, _)| Some(*from) == expanded.first().map(String::as_str))
            .map(|(_, canon)| (*canon).to_string())
    } else {
        None
    };
    if predir.is_some() {
        expanded.remove(0);
    }

    let suffix = if expanded.len() > 1 {
        SUFFIXES
            .iter()
            .find(|(from, _)| Some(*from) == expanded.last().map(String::as_str))
            .map(|(_, canon)| (*canon).to_string())
    } else {
        None
    };
    if suffix.is_some() {
        expanded.pop();
    }

    StreetParts {
        number: None,
        predir,
        name: expanded.join(" "),
        suffix,
    }
}

/// Parses `street_code <space> street name` directory lines.
fn parse_directory(content: &str) -> Result<HashMap<String, String>, ParseError> {
    let mut directory = HashMap::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((code, name)) = line.split_once(' ') else {
            return Err(ParseError::MalformedDirectoryLine {
                line: idx + 1,
                content: line.to_string(),
            });
        };
        let name = name.trim();
        if code.trim().is_empty() || name.is_empty() {
            return Err(ParseError::MalformedDirectoryLine {
                line: idx + 1,
                content: line.to_string(),
            });
        }
        directory.insert(name.to_uppercase(), code.trim().to_string());
    }
    Ok(directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> StreetParser {
        StreetParser::new()
    }

    #[test]
    fn standardizes_suffix_and_case() {
        let parsed = parser().parse("1001 Loney Street");
        assert_eq!(parsed.output_address, "1001 LONEY ST");
        assert!(parsed.is_addr);
        assert!(parsed.is_philly_addr());
    }

    #[test]
    fn expands_street_name_alias() {
        let parsed = parser().parse("1234 mkt st");
        assert_eq!(parsed.output_address, "1234 MARKET ST");
        assert!(parsed.is_addr);
        assert!(parsed.is_philly_addr());
    }

    #[test]
    fn keeps_directional_prefix() {
        let parsed = parser().parse("1100 w godfrey avenue");
        assert_eq!(parsed.output_address, "1100 W GODFREY AVE");
        assert!(parsed.is_philly_addr());
    }

    #[test]
    fn strips_city_tail_after_comma() {
        let parsed = parser().parse("1234 Market St, Philadelphia, PA 19107");
        assert_eq!(parsed.output_address, "1234 MARKET ST");
    }

    #[test]
    fn unknown_street_passes_input_through() {
        let parsed = parser().parse("100 Zzyzx Blvd");
        assert!(parsed.is_addr);
        assert!(!parsed.is_philly_addr());
        assert_eq!(parsed.output_address, "100 Zzyzx Blvd");
    }

    #[test]
    fn garbage_is_not_an_address() {
        let parsed = parser().parse("dfdfa sdhl; dort@");
        assert!(!parsed.is_addr);
        assert!(!parsed.is_philly_addr());
        assert_eq!(parsed.output_address, "dfdfa sdhl; dort@");
    }

    #[test]
    fn empty_input_passes_through() {
        let parsed = parser().parse("");
        assert!(!parsed.is_addr);
        assert_eq!(parsed.output_address, "");
    }

    #[test]
    fn house_number_alone_is_not_an_address() {
        let parsed = parser().parse("1234");
        assert!(!parsed.is_addr);
    }

    #[test]
    fn resolves_intersection_with_aliases() {
        let parsed = parser().parse("12th and mkt");
        assert_eq!(parsed.output_address, "12TH ST & MARKET ST");
        assert!(!parsed.is_addr);
        assert!(parsed.is_philly_addr());
    }

    #[test]
    fn intersection_with_unknown_leg_passes_through() {
        let parsed = parser().parse("Zzyzx and Market");
        assert!(!parsed.is_philly_addr());
        assert_eq!(parsed.output_address, "Zzyzx and Market");
    }

    #[test]
    fn house_number_range_is_accepted() {
        let parsed = parser().parse("1234-36 market st");
        assert_eq!(parsed.output_address, "1234-36 MARKET ST");
        assert!(parsed.is_addr);
    }

    #[test]
    fn custom_directory_text_overrides_default() {
        let custom = StreetParser::from_directory_text("11111 ELM ST\n").expect("valid");
        assert!(custom.parse("10 Elm Street").is_philly_addr());
        assert!(!custom.parse("1234 Market St").is_philly_addr());
    }

    #[test]
    fn malformed_directory_line_is_rejected() {
        let err = StreetParser::from_directory_text("not-a-line\n").unwrap_err();
        assert!(matches!(
            err,
            ParseError::MalformedDirectoryLine { line: 1, .. }
        ));
    }

    #[test]
    fn embedded_directory_loads() {
        assert!(!parser().directory.is_empty());
    }
}
