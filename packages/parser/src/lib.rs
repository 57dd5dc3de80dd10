#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Address normalization and jurisdiction classification.
//!
//! Input files carry street addresses in many shapes:
//! - Bare street addresses: `"1234 Market St"`
//! - Full one-line addresses: `"1234 Market St, Philadelphia, PA 19107"`
//! - Intersections: `"12th and Market"`
//! - Garbage: `"dfdfa sdhl; dort@"`
//!
//! The [`AddressParser`] trait is the seam for the parsing capability:
//! given raw text it produces the standardized form plus validity flags,
//! with no network access. [`StreetParser`] is the rules-based
//! implementation backed by a street directory (street name → street
//! code); an address that resolves to a known street code is a
//! Philadelphia address.
//!
//! The [`locality`] module decides whether an address belongs to
//! Philadelphia at all, from a tagged full address or from discrete
//! city/state/ZIP fields.

pub mod locality;
pub mod normalize;
pub mod zips;

pub use normalize::StreetParser;

use thiserror::Error;

/// Errors from parser construction.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Street directory file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Street directory line was malformed.
    #[error("Malformed street directory line {line}: {content:?}")]
    MalformedDirectoryLine {
        /// 1-based line number.
        line: usize,
        /// The offending line content.
        content: String,
    },
}

/// The output of parsing one raw address string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Standardized address text. For addresses that resolve to a known
    /// street code this is the canonical form; otherwise the raw input is
    /// passed through unchanged.
    pub output_address: String,
    /// Whether the input is structured like a street address.
    pub is_addr: bool,
    /// The resolved street code, when the street is in the directory.
    pub street_code: Option<String>,
}

impl ParsedAddress {
    /// True when the parsed street resolved to a known street code,
    /// meaning the address is on a Philadelphia street.
    #[must_use]
    pub const fn is_philly_addr(&self) -> bool {
        self.street_code.is_some()
    }

    /// Pass-through result for null/empty/unparseable input.
    #[must_use]
    pub fn passthrough(raw: &str) -> Self {
        Self {
            output_address: raw.to_string(),
            is_addr: false,
            street_code: None,
        }
    }
}

/// The address-parsing capability.
///
/// Implementations are pure text processing: no network, no blocking I/O
/// at parse time. Null/empty input must come back unchanged with
/// `is_addr = false`.
pub trait AddressParser: Send + Sync {
    /// Parses one raw address string.
    fn parse(&self, raw: &str) -> ParsedAddress;
}
