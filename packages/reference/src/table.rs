//! The city address file, loaded for canonical-address joins.
//!
//! The file is CSV with one row per known canonical street address. Only
//! the columns the run actually needs are kept: the join key, the
//! coordinate pairs implied by the CRS selection, and the columns backing
//! the requested enrichment fields.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::ReferenceError;
use crate::fields::EnrichmentField;

/// Join-key column.
pub const STREET_ADDRESS_COLUMN: &str = "street_address";
/// Geographic latitude column.
pub const LAT_COLUMN: &str = "geocode_lat";
/// Geographic longitude column.
pub const LON_COLUMN: &str = "geocode_lon";
/// Projected x column.
pub const X_COLUMN: &str = "geocode_x";
/// Projected y column.
pub const Y_COLUMN: &str = "geocode_y";

/// One address file row, reduced to the columns the run requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRow {
    /// `(lat, lon)`; populated only when both cells parse.
    pub geographic: Option<(f64, f64)>,
    /// `(x, y)`; populated only when both cells parse.
    pub projected: Option<(f64, f64)>,
    /// Enrichment values keyed by field *name* (not file column).
    /// Empty cells are absent.
    pub attributes: HashMap<String, String>,
}

/// The address file, keyed by canonical street address.
#[derive(Debug)]
pub struct ReferenceTable {
    rows: HashMap<String, ReferenceRow>,
}

impl ReferenceTable {
    /// Loads the address file from disk.
    ///
    /// `geographic` / `projected` select which coordinate pairs must be
    /// present and loaded; `fields` are the resolved enrichment fields
    /// whose columns must be present.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError`] on I/O or CSV failure, or when a
    /// required column is missing from the header.
    pub fn load(
        path: &Path,
        geographic: bool,
        projected: bool,
        fields: &[EnrichmentField],
    ) -> Result<Self, ReferenceError> {
        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(file, geographic, projected, fields)?;
        log::info!(
            "Loaded {} addresses from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Loads the address file from any reader. See [`Self::load`].
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError`] on CSV failure or a missing column.
    pub fn from_reader<R: Read>(
        reader: R,
        geographic: bool,
        projected: bool,
        fields: &[EnrichmentField],
    ) -> Result<Self, ReferenceError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers = csv_reader.headers()?.clone();

        let column_index = |column: &str| -> Result<usize, ReferenceError> {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| ReferenceError::MissingColumn {
                    column: column.to_string(),
                })
        };

        let address_idx = column_index(STREET_ADDRESS_COLUMN)?;
        let geo_idx = if geographic {
            Some((column_index(LAT_COLUMN)?, column_index(LON_COLUMN)?))
        } else {
            None
        };
        let proj_idx = if projected {
            Some((column_index(X_COLUMN)?, column_index(Y_COLUMN)?))
        } else {
            None
        };
        let field_idx: Vec<(String, usize)> = fields
            .iter()
            .map(|f| Ok((f.name.clone(), column_index(&f.column)?)))
            .collect::<Result<_, ReferenceError>>()?;

        let mut rows = HashMap::new();
        for record in csv_reader.records() {
            let record = record?;

            let Some(address) = record.get(address_idx).map(str::trim) else {
                continue;
            };
            if address.is_empty() {
                continue;
            }

            let mut attributes = HashMap::new();
            for (name, idx) in &field_idx {
                if let Some(value) = record.get(*idx) {
                    let value = value.trim();
                    if !value.is_empty() {
                        attributes.insert(name.clone(), value.to_string());
                    }
                }
            }

            rows.insert(
                address.to_string(),
                ReferenceRow {
                    geographic: geo_idx.and_then(|(lat, lon)| coordinate_pair(&record, lat, lon)),
                    projected: proj_idx.and_then(|(x, y)| coordinate_pair(&record, x, y)),
                    attributes,
                },
            );
        }

        Ok(Self { rows })
    }

    /// Looks up a canonical street address.
    #[must_use]
    pub fn get(&self, canonical_address: &str) -> Option<&ReferenceRow> {
        self.rows.get(canonical_address)
    }

    /// Number of addresses loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parses a coordinate pair from two cells; both must parse or the pair
/// is absent.
fn coordinate_pair(record: &csv::StringRecord, first: usize, second: usize) -> Option<(f64, f64)> {
    let a = record.get(first)?.trim().parse::<f64>().ok()?;
    let b = record.get(second)?.trim().parse::<f64>().ok()?;
    Some((a, b))
}
