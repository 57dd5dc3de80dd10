//! Run configuration.
//!
//! Loaded from a TOML file and validated in full before the first record
//! is read; configuration problems never surface mid-batch. The address
//! columns are configured either as one full-address field or as a
//! street/city/state/zip group; supplying both is an error, resolved
//! deterministically rather than interactively.

use std::path::{Path, PathBuf};

use address_enrich_geocoder::CrsSelection;
use serde::Deserialize;

use crate::PipelineError;

/// Default AIS endpoint root.
const DEFAULT_AIS_BASE_URL: &str = "https://api.phila.gov/ais";

/// Default TomTom `GeocodeServer` root.
const DEFAULT_TOMTOM_BASE_URL: &str =
    "https://citygeo-geocoder-aws.phila.city/arcgis/rest/services/TomTom/US_StreetAddress/GeocodeServer";

/// Environment variable consulted when the config omits the AIS key.
pub const AIS_API_KEY_VAR: &str = "AIS_API_KEY";

/// A full enrichment run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Input CSV path.
    pub input_file: PathBuf,
    /// City address file (reference table) path.
    pub geography_file: PathBuf,
    /// Output CSV path. Defaults to `<input stem>_enriched.csv` next to
    /// the input.
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    /// Street directory for the parser. Defaults to the embedded
    /// directory.
    #[serde(default)]
    pub street_directory: Option<PathBuf>,
    /// Enrichment fields to add, validated against the allow-list.
    #[serde(default)]
    pub enrichment_fields: Vec<String>,
    /// Name of a single column holding the full address.
    #[serde(default)]
    pub full_address_field: Option<String>,
    /// Discrete address columns; `street` is required within the group.
    #[serde(default)]
    pub address_fields: Option<SplitAddressFields>,
    /// Coordinate system selection.
    #[serde(default)]
    pub crs: CrsConfig,
    /// External service endpoints and budgets.
    #[serde(default)]
    pub services: ServicesConfig,
    /// Enrichment worker pool size. Kept deliberately small: rate-limit
    /// compliance matters more than throughput.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Discrete address column names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitAddressFields {
    /// Street address column. Required.
    #[serde(default)]
    pub street: Option<String>,
    /// City column.
    #[serde(default)]
    pub city: Option<String>,
    /// State column.
    #[serde(default)]
    pub state: Option<String>,
    /// ZIP column.
    #[serde(default)]
    pub zip: Option<String>,
}

/// Coordinate system selection; both systems by default.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrsConfig {
    /// Emit longitude/latitude (EPSG:4326) columns.
    pub geographic: bool,
    /// Emit state-plane (EPSG:2272) columns.
    pub projected: bool,
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self {
            geographic: true,
            projected: true,
        }
    }
}

impl CrsConfig {
    /// The geocoder-facing selection.
    #[must_use]
    pub const fn selection(self) -> CrsSelection {
        CrsSelection {
            geographic: self.geographic,
            projected: self.projected,
        }
    }
}

/// External service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServicesConfig {
    /// AIS settings.
    pub ais: AisServiceConfig,
    /// TomTom settings.
    pub tomtom: TomTomServiceConfig,
}

/// AIS endpoint, key, and rate budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AisServiceConfig {
    /// Endpoint root.
    pub base_url: String,
    /// API key; falls back to the `AIS_API_KEY` environment variable.
    pub api_key: Option<String>,
    /// Admissions per second against the shared limiter.
    pub max_calls_per_second: usize,
}

impl Default for AisServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AIS_BASE_URL.to_string(),
            api_key: None,
            max_calls_per_second: 9,
        }
    }
}

/// TomTom endpoint and rate budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TomTomServiceConfig {
    /// Endpoint root (the `GeocodeServer` URL).
    pub base_url: String,
    /// Admissions per second against the shared limiter.
    pub max_calls_per_second: usize,
}

impl Default for TomTomServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TOMTOM_BASE_URL.to_string(),
            max_calls_per_second: 10,
        }
    }
}

const fn default_workers() -> usize {
    1
}

/// The resolved address column configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressFields {
    /// One column holds the full address text.
    Full(String),
    /// Discrete columns; only `street` is guaranteed present.
    Split {
        /// Street column name.
        street: String,
        /// City column name.
        city: Option<String>,
        /// State column name.
        state: Option<String>,
        /// ZIP column name.
        zip: Option<String>,
    },
}

impl AddressFields {
    /// The column handed to the address parser.
    #[must_use]
    pub fn parse_column(&self) -> &str {
        match self {
            Self::Full(column) | Self::Split { street: column, .. } => column,
        }
    }

    /// Every configured column name, for input schema validation.
    #[must_use]
    pub fn configured_columns(&self) -> Vec<&str> {
        match self {
            Self::Full(column) => vec![column.as_str()],
            Self::Split {
                street,
                city,
                state,
                zip,
            } => std::iter::once(street.as_str())
                .chain(city.as_deref())
                .chain(state.as_deref())
                .chain(zip.as_deref())
                .collect(),
        }
    }
}

impl Config {
    /// Loads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on I/O or TOML failure.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::de::from_str(&content)?;
        Ok(config)
    }

    /// Resolves the address column configuration.
    ///
    /// Exactly one of `full_address_field` and `address_fields` must be
    /// present, and a split configuration must name a street column.
    ///
    /// # Errors
    ///
    /// Returns a configuration error otherwise.
    pub fn address_fields(&self) -> Result<AddressFields, PipelineError> {
        match (&self.full_address_field, &self.address_fields) {
            (Some(_), Some(_)) => Err(PipelineError::Config {
                message: "Both full_address_field and address_fields are specified; \
                          specify exactly one"
                    .to_string(),
            }),
            (None, None) => Err(PipelineError::Config {
                message: "An address field or address fields must be specified in the \
                          config file"
                    .to_string(),
            }),
            (Some(full), None) => Ok(AddressFields::Full(full.clone())),
            (None, Some(split)) => {
                let Some(street) = split.street.clone() else {
                    return Err(PipelineError::Config {
                        message: "When full_address_field is not specified, address_fields \
                                  must include a non-null value for street"
                            .to_string(),
                    });
                };
                Ok(AddressFields::Split {
                    street,
                    city: split.city.clone(),
                    state: split.state.clone(),
                    zip: split.zip.clone(),
                })
            }
        }
    }

    /// The AIS API key, from config or environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when neither is set.
    pub fn ais_api_key(&self) -> Result<String, PipelineError> {
        self.services
            .ais
            .api_key
            .clone()
            .or_else(|| std::env::var(AIS_API_KEY_VAR).ok())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| PipelineError::Config {
                message: format!(
                    "An AIS API key must be set in the config file or the {AIS_API_KEY_VAR} \
                     environment variable"
                ),
            })
    }

    /// The output path: explicit, or `<input stem>_enriched.csv` next to
    /// the input (every extension stripped from the stem).
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        if let Some(explicit) = &self.output_file {
            return explicit.clone();
        }

        let name = self
            .input_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.split('.').next().unwrap_or(&name);
        let out_name = format!("{stem}_enriched.csv");

        self.input_file
            .parent()
            .map_or_else(|| PathBuf::from(&out_name), |dir| dir.join(&out_name))
    }
}
