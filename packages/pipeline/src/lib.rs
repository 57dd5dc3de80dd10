#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch address enrichment pipeline.
//!
//! Cascades a stream of tabular records through three match sources,
//! highest confidence first:
//!
//! 1. The city address file (exact canonical-address match).
//! 2. AIS, for city addresses the file missed.
//! 3. TomTom, for AIS misses and for addresses outside the city.
//!
//! Records are annotated in place, split by outcome at each stage, and
//! merged back in ingestion order, so the output stream is the input
//! stream plus the enrichment columns. Per-record lookups run on a
//! deliberately small worker pool: the external services' rate contracts
//! matter more than throughput.

pub mod config;
pub mod frame;
pub mod progress;
pub mod stages;

use std::sync::Arc;

use address_enrich_geocoder::{GeocodeError, GeocodeResolver};
use address_enrich_parser::{AddressParser, ParseError};
use address_enrich_reference::ReferenceError;
use address_enrich_reference::fields::resolve_fields;
use address_enrich_reference::table::ReferenceTable;
use thiserror::Error;

use crate::config::{AddressFields, Config};
use crate::frame::Frame;
use crate::progress::ProgressCallback;
use crate::stages::{
    INTERNAL_COLUMNS, IS_MULTIPLE_MATCH_COLUMN, JOINED_ADDRESS_COLUMN, MATCH_TYPE_COLUMN,
    OUTPUT_ADDRESS_COLUMN, build_query_address_stage, classify_stage, normalize_stage,
    reference_stage, resolve_stage, split_geos, split_non_philly,
};

/// Errors from pipeline runs.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration; raised before any record is processed.
    #[error("Configuration error: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Config file TOML failure.
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Address file or enrichment field failure.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Street directory failure.
    #[error(transparent)]
    Parser(#[from] ParseError),

    /// Fatal geocoding failure; the batch is aborted.
    #[error(transparent)]
    Geocode(#[from] GeocodeError),
}

/// Outcome counts for one enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Total records processed (equals the input row count).
    pub rows: usize,
    /// Records matched by the city address file.
    pub reference_matches: usize,
    /// Records matched by AIS.
    pub ais_matches: usize,
    /// Records matched by TomTom.
    pub tomtom_matches: usize,
    /// Records that failed a multi-candidate tiebreak.
    pub multiple_matches: usize,
    /// Records no source matched.
    pub unmatched: usize,
}

/// Runs the full enrichment pipeline.
///
/// The resolvers are constructed once by the caller and passed in (with
/// their shared rate limiters inside), so tests can substitute fakes.
///
/// # Errors
///
/// Returns [`PipelineError`] on configuration problems (all raised
/// before the first record), I/O and CSV failures, and fatal geocoding
/// errors. Per-record lookup failures do not error; they leave the
/// record unmatched.
pub async fn run(
    config: &Config,
    parser: &dyn AddressParser,
    primary: &Arc<dyn GeocodeResolver>,
    secondary: &Arc<dyn GeocodeResolver>,
    progress: Option<&Arc<dyn ProgressCallback>>,
) -> Result<RunSummary, PipelineError> {
    // ── Pre-flight: every configuration error fires before row one ──
    let address_fields = config.address_fields()?;
    let fields = resolve_fields(&config.enrichment_fields)?;
    let crs = config.crs;

    let table = ReferenceTable::load(
        &config.geography_file,
        crs.geographic,
        crs.projected,
        &fields,
    )?;

    let mut frame = Frame::read_csv(&config.input_file)?;
    validate_input_columns(&frame, &address_fields)?;

    let input_rows = frame.len();
    if let Some(p) = progress {
        p.set_total(input_rows as u64);
    }

    // ── Normalize and classify ──────────────────────────────────────
    log::info!("Standardizing addresses...");
    normalize_stage(&mut frame, parser, address_fields.parse_column());
    build_query_address_stage(&mut frame, &address_fields);

    log::info!("Identifying non-Philadelphia addresses...");
    classify_stage(&mut frame, &address_fields);
    let (mut philly, non_philly) = split_non_philly(frame);

    // ── Tier 1: address file join ───────────────────────────────────
    log::info!("Joining addresses to the address file...");
    reference_stage(&mut philly, &table, &fields, crs, progress);
    let (has_geo, needs_geo) = split_geos(philly, crs);

    // ── Tier 2: AIS ─────────────────────────────────────────────────
    log::info!("Resolving {} records through AIS...", needs_geo.len());
    if let Some(p) = progress {
        p.set_message("AIS".to_string());
    }
    let zip_column = match &address_fields {
        AddressFields::Split { zip: Some(zip), .. } => Some(zip.as_str()),
        AddressFields::Split { .. } | AddressFields::Full(_) => None,
    };
    let ais_enriched = resolve_stage(
        needs_geo,
        primary,
        crs,
        OUTPUT_ADDRESS_COLUMN,
        zip_column,
        config.workers,
        false,
        progress,
    )
    .await?;

    let mut rejoined = Frame::concat(vec![has_geo, ais_enriched]);
    rejoined.sort_by_row_index();

    // ── Tier 3: TomTom for AIS misses plus non-local records ────────
    let (has_geo, needs_geo) = split_geos(rejoined, crs);
    let mut tomtom_input = Frame::concat(vec![non_philly, needs_geo]);
    tomtom_input.sort_by_row_index();

    log::info!(
        "Resolving {} records through TomTom...",
        tomtom_input.len()
    );
    if let Some(p) = progress {
        p.set_message("TomTom".to_string());
    }
    let tomtom_enriched = resolve_stage(
        tomtom_input,
        secondary,
        crs,
        JOINED_ADDRESS_COLUMN,
        None,
        config.workers,
        true,
        progress,
    )
    .await?;

    // ── Merge, restore order, strip internals ───────────────────────
    let mut merged = Frame::concat(vec![has_geo, tomtom_enriched]);
    merged.sort_by_row_index();
    merged.drop_columns(INTERNAL_COLUMNS);

    if merged.len() != input_rows {
        log::error!(
            "Row count changed during enrichment: {input_rows} in, {} out",
            merged.len()
        );
    }

    let summary = summarize(&merged);
    let output_path = config.output_path();
    merged.write_csv(&output_path)?;

    if let Some(p) = progress {
        p.finish(format!(
            "Enriched {} records ({} address file, {} AIS, {} TomTom, {} unmatched)",
            summary.rows,
            summary.reference_matches,
            summary.ais_matches,
            summary.tomtom_matches,
            summary.unmatched
        ));
    }

    Ok(summary)
}

/// Verifies every configured address column exists in the input.
fn validate_input_columns(
    frame: &Frame,
    address_fields: &AddressFields,
) -> Result<(), PipelineError> {
    let missing: Vec<&str> = address_fields
        .configured_columns()
        .into_iter()
        .filter(|column| !frame.has_column(column))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Config {
            message: format!(
                "The following fields specified in the config file are not present in the \
                 input file: {}",
                missing.join(", ")
            ),
        })
    }
}

/// Tallies outcome counts from the merged output frame.
fn summarize(frame: &Frame) -> RunSummary {
    let mut summary = RunSummary {
        rows: frame.len(),
        ..RunSummary::default()
    };
    for record in frame.records() {
        match record.get(MATCH_TYPE_COLUMN) {
            Some("address_file") => summary.reference_matches += 1,
            Some("ais") if !record.get_bool(IS_MULTIPLE_MATCH_COLUMN) => {
                summary.ais_matches += 1;
            }
            Some("tomtom") => summary.tomtom_matches += 1,
            _ => summary.unmatched += 1,
        }
        if record.get_bool(IS_MULTIPLE_MATCH_COLUMN) {
            summary.multiple_matches += 1;
        }
    }
    summary
}
