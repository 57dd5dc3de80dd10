#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the batch address enrichment tool.
//!
//! Reads a TOML config, wires the street parser, the shared rate
//! limiters, and the AIS/TomTom clients together, and runs the pipeline
//! with an `indicatif` progress bar. `validate` checks everything the
//! run would check without touching any service; `fields` prints the
//! enrichment allow-list.

mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use address_enrich_geocoder::GeocodeResolver;
use address_enrich_geocoder::ais::AisClient;
use address_enrich_geocoder::tomtom::TomTomClient;
use address_enrich_limiter::RateLimiter;
use address_enrich_parser::{AddressParser, StreetParser};
use address_enrich_pipeline::PipelineError;
use address_enrich_pipeline::config::Config;
use address_enrich_reference::fields::{all_fields, resolve_fields};
use address_enrich_reference::table::ReferenceTable;
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;

const USER_AGENT: &str = concat!("address-enrich/", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(name = "address_enrich", about = "Batch address enrichment tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich an input file according to a config file
    Run {
        /// Path to the TOML config file
        #[arg(long, default_value = "./config.toml")]
        config: PathBuf,
    },
    /// Check a config file and the input/geography schemas without
    /// calling any external service
    Validate {
        /// Path to the TOML config file
        #[arg(long, default_value = "./config.toml")]
        config: PathBuf,
    },
    /// List the enrichment fields available to `enrichment_fields`
    Fields,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = progress::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&multi, &config).await?,
        Commands::Validate { config } => validate(&config)?,
        Commands::Fields => {
            for field in all_fields() {
                println!("{}", field.name);
            }
        }
    }

    Ok(())
}

/// Builds the street parser from the configured directory, or the
/// embedded default.
fn build_parser(config: &Config) -> Result<StreetParser, PipelineError> {
    Ok(match &config.street_directory {
        Some(path) => StreetParser::from_directory_file(path)?,
        None => StreetParser::new(),
    })
}

async fn run(multi: &MultiProgress, config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;
    let api_key = config.ais_api_key()?;
    let fields = resolve_fields(&config.enrichment_fields)?;
    let field_names: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();

    let parser: Arc<dyn AddressParser> = Arc::new(build_parser(&config)?);
    let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
    let crs = config.crs.selection();

    let primary: Arc<dyn GeocodeResolver> = Arc::new(AisClient::new(
        http.clone(),
        &config.services.ais.base_url,
        &api_key,
        Arc::new(RateLimiter::per_second(
            config.services.ais.max_calls_per_second,
        )),
        crs,
        field_names,
    ));

    let secondary: Arc<dyn GeocodeResolver> = Arc::new(TomTomClient::new(
        http,
        &config.services.tomtom.base_url,
        Arc::new(RateLimiter::per_second(
            config.services.tomtom.max_calls_per_second,
        )),
        crs,
        Arc::clone(&parser),
    ));

    let bar = progress::enrichment_bar(multi, "Enriching");
    let summary = address_enrich_pipeline::run(
        &config,
        parser.as_ref(),
        &primary,
        &secondary,
        Some(&bar),
    )
    .await?;

    log::info!(
        "Run complete: {} rows ({} address file, {} AIS, {} TomTom, {} multiple-match, \
         {} unmatched)",
        summary.rows,
        summary.reference_matches,
        summary.ais_matches,
        summary.tomtom_matches,
        summary.multiple_matches,
        summary.unmatched
    );
    log::info!("Output written to {}", config.output_path().display());

    Ok(())
}

/// Runs every pre-flight check the pipeline would run, plus the input
/// and geography schema checks, without any network calls.
fn validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;
    let address_fields = config.address_fields()?;
    let fields = resolve_fields(&config.enrichment_fields)?;
    config.ais_api_key()?;
    build_parser(&config)?;

    let mut reader = csv::Reader::from_path(&config.input_file)?;
    let headers = reader.headers()?.clone();
    let missing: Vec<&str> = address_fields
        .configured_columns()
        .into_iter()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();
    if !missing.is_empty() {
        return Err(Box::new(PipelineError::Config {
            message: format!(
                "The following fields specified in the config file are not present in the \
                 input file: {}",
                missing.join(", ")
            ),
        }));
    }

    let table = ReferenceTable::load(
        &config.geography_file,
        config.crs.geographic,
        config.crs.projected,
        &fields,
    )?;

    log::info!(
        "Configuration OK: {} enrichment field(s), {} reference addresses, output {}",
        fields.len(),
        table.len(),
        config.output_path().display()
    );

    Ok(())
}
