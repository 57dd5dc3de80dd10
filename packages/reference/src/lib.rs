#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! City address file loading and the enrichment field registry.
//!
//! The address file is the first-tier, highest-confidence match source: a
//! precomputed table mapping every known canonical street address to its
//! coordinates (in both output coordinate systems) and civic attributes.
//! [`table::ReferenceTable`] loads it into memory keyed by canonical
//! address for the pipeline's left match.
//!
//! [`fields`] is the allow-list of enrichment fields users may request,
//! embedded at compile time; requesting anything else is a configuration
//! error raised before processing starts.

pub mod fields;
pub mod table;

use thiserror::Error;

/// Errors from address file loading and field validation.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// Address file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Address file is not valid CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A required column is missing from the address file header.
    #[error("Address file is missing required column {column:?}")]
    MissingColumn {
        /// The absent column name.
        column: String,
    },

    /// Requested enrichment fields are not in the allow-list.
    #[error("The following fields are not available: {}. Please correct these and try again.", names.join(", "))]
    UnknownFields {
        /// The offending field names.
        names: Vec<String>,
    },
}
