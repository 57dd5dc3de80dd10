//! Enrichment stages over record frames.
//!
//! Each stage annotates or partitions the frame; none of them reorders
//! it. Splits accumulate resolved sub-streams which the orchestrator
//! concatenates and re-sorts by row index at the end.

use std::sync::Arc;

use address_enrich_geocoder::{GeocodeResolver, Resolution, ResolveRequest};
use address_enrich_parser::AddressParser;
use address_enrich_parser::locality::{Classification, classify_fields, classify_full_address};
use address_enrich_reference::fields::EnrichmentField;
use address_enrich_reference::table::ReferenceTable;
use futures::stream::{self, StreamExt as _};

use crate::PipelineError;
use crate::config::{AddressFields, CrsConfig};
use crate::frame::{Frame, Record};
use crate::progress::ProgressCallback;

/// Standardized address output column.
pub const OUTPUT_ADDRESS_COLUMN: &str = "output_address";
/// Address-validity output column.
pub const IS_ADDR_COLUMN: &str = "is_addr";
/// City-address output column.
pub const IS_PHILLY_ADDR_COLUMN: &str = "is_philly_addr";
/// Ambiguous-tiebreak output column.
pub const IS_MULTIPLE_MATCH_COLUMN: &str = "is_multiple_match";
/// Match source output column.
pub const MATCH_TYPE_COLUMN: &str = "match_type";
/// Geographic latitude output column.
pub const GEOCODE_LAT_COLUMN: &str = "geocode_lat";
/// Geographic longitude output column.
pub const GEOCODE_LON_COLUMN: &str = "geocode_lon";
/// Projected x output column.
pub const GEOCODE_X_COLUMN: &str = "geocode_x";
/// Projected y output column.
pub const GEOCODE_Y_COLUMN: &str = "geocode_y";

/// Geocoding query address; internal, dropped before output.
pub const JOINED_ADDRESS_COLUMN: &str = "joined_address";
/// Classification flag; internal, dropped before output.
pub const IS_NON_PHILLY_COLUMN: &str = "is_non_philly";
/// Undetermined-locality flag; internal, dropped before output.
pub const IS_UNDEFINED_COLUMN: &str = "is_undefined";

/// Columns stripped from the output stream.
pub const INTERNAL_COLUMNS: &[&str] = &[
    JOINED_ADDRESS_COLUMN,
    IS_NON_PHILLY_COLUMN,
    IS_UNDEFINED_COLUMN,
];

/// Appended to queries whose locality could not be determined, so the
/// services search inside the city.
const LOCALITY_SUFFIX: &str = ", Philadelphia, PA";

/// Suffix for input columns displaced by enrichment output columns.
const COLLISION_SUFFIX: &str = "_left";

/// Standardizes every record's address and seeds the validity columns.
pub fn normalize_stage(frame: &mut Frame, parser: &dyn AddressParser, parse_column: &str) {
    for column in [
        OUTPUT_ADDRESS_COLUMN,
        IS_ADDR_COLUMN,
        IS_PHILLY_ADDR_COLUMN,
        IS_MULTIPLE_MATCH_COLUMN,
        MATCH_TYPE_COLUMN,
    ] {
        frame.add_column(column);
    }

    for record in frame.records_mut() {
        let raw = record.get(parse_column).map(String::from).unwrap_or_default();
        let parsed = parser.parse(&raw);
        record.set(IS_ADDR_COLUMN, parsed.is_addr.to_string());
        record.set(IS_PHILLY_ADDR_COLUMN, parsed.is_philly_addr().to_string());
        record.set(IS_MULTIPLE_MATCH_COLUMN, "false");
        record.set(OUTPUT_ADDRESS_COLUMN, parsed.output_address);
    }
}

/// Builds the geocoding query address.
///
/// Split-field configurations concatenate the standardized address with
/// the configured city/state/ZIP values (the parser strips locality, and
/// the fallback services need it back); full-address configurations use
/// the raw input field as-is.
pub fn build_query_address_stage(frame: &mut Frame, address_fields: &AddressFields) {
    frame.add_column(JOINED_ADDRESS_COLUMN);

    match address_fields {
        AddressFields::Full(field) => {
            for record in frame.records_mut() {
                let joined = record.get(field).map(String::from);
                record.set_opt(JOINED_ADDRESS_COLUMN, joined);
            }
        }
        AddressFields::Split {
            street,
            city,
            state,
            zip,
        } => {
            for record in frame.records_mut() {
                let joined = match record.get(OUTPUT_ADDRESS_COLUMN).map(String::from) {
                    Some(output) => {
                        let mut parts = vec![output];
                        for column in [city.as_deref(), state.as_deref(), zip.as_deref()]
                            .into_iter()
                            .flatten()
                        {
                            if let Some(value) = record.get(column) {
                                parts.push(value.to_string());
                            }
                        }
                        Some(
                            parts
                                .join(" ")
                                .split_whitespace()
                                .collect::<Vec<_>>()
                                .join(" "),
                        )
                    }
                    None => record.get(street).map(String::from),
                };
                record.set_opt(JOINED_ADDRESS_COLUMN, joined);
            }
        }
    }
}

/// Classifies every record's locality, annotating the internal flags.
pub fn classify_stage(frame: &mut Frame, address_fields: &AddressFields) {
    frame.add_column(IS_NON_PHILLY_COLUMN);
    frame.add_column(IS_UNDEFINED_COLUMN);

    for record in frame.records_mut() {
        let classification: Classification = match address_fields {
            AddressFields::Full(field) => classify_full_address(record.get(field)),
            AddressFields::Split {
                city, state, zip, ..
            } => classify_fields(
                city.as_deref().and_then(|c| record.get(c)),
                state.as_deref().and_then(|c| record.get(c)),
                zip.as_deref().and_then(|c| record.get(c)),
            ),
        };
        record.set(
            IS_NON_PHILLY_COLUMN,
            (!classification.is_local).to_string(),
        );
        record.set(
            IS_UNDEFINED_COLUMN,
            classification.is_undetermined.to_string(),
        );
    }
}

/// Splits into (local, non-local) on the classification flag.
#[must_use]
pub fn split_non_philly(frame: Frame) -> (Frame, Frame) {
    let (non_philly, philly) = frame.split(|r| r.get_bool(IS_NON_PHILLY_COLUMN));
    (philly, non_philly)
}

/// Left-matches records against the city address file on the
/// standardized address. Hits gain coordinates, enrichment values, and
/// `match_type = address_file`; misses pass through untouched.
///
/// Input columns colliding with enrichment output columns are renamed
/// with a `_left` suffix rather than overwritten.
pub fn reference_stage(
    frame: &mut Frame,
    table: &ReferenceTable,
    fields: &[EnrichmentField],
    crs: CrsConfig,
    progress: Option<&Arc<dyn ProgressCallback>>,
) {
    for field in fields {
        if frame.has_column(&field.name) {
            let renamed = format!("{}{COLLISION_SUFFIX}", field.name);
            log::info!(
                "Input column {:?} collides with an enrichment field; renaming to {renamed:?}",
                field.name
            );
            frame.rename_column(&field.name, &renamed);
        }
    }

    if crs.geographic {
        frame.add_column(GEOCODE_LAT_COLUMN);
        frame.add_column(GEOCODE_LON_COLUMN);
    }
    if crs.projected {
        frame.add_column(GEOCODE_X_COLUMN);
        frame.add_column(GEOCODE_Y_COLUMN);
    }
    for field in fields {
        frame.add_column(&field.name);
    }

    let mut matched = 0u64;
    for record in frame.records_mut() {
        let Some(address) = record.get(OUTPUT_ADDRESS_COLUMN).map(String::from) else {
            continue;
        };
        let Some(row) = table.get(&address) else {
            continue;
        };

        if crs.geographic
            && let Some((lat, lon)) = row.geographic
        {
            record.set(GEOCODE_LAT_COLUMN, lat.to_string());
            record.set(GEOCODE_LON_COLUMN, lon.to_string());
        }
        if crs.projected
            && let Some((x, y)) = row.projected
        {
            record.set(GEOCODE_X_COLUMN, x.to_string());
            record.set(GEOCODE_Y_COLUMN, y.to_string());
        }
        for field in fields {
            if let Some(value) = row.attributes.get(&field.name) {
                record.set(&field.name, value.clone());
            }
        }

        // With no coordinate system selected the table hit itself
        // resolves the record; otherwise the leading pair must be there.
        let resolved = if crs.geographic || crs.projected {
            has_geo(record, crs)
        } else {
            true
        };
        if resolved {
            record.set(MATCH_TYPE_COLUMN, "address_file");
            matched += 1;
            if let Some(p) = progress {
                p.inc(1);
            }
        }
    }

    log::info!("Address file matched {matched} records");
}

/// Whether a record already carries coordinates in the leading selected
/// system (geographic when selected, projected otherwise). With neither
/// system selected, a populated match source marks the record resolved.
#[must_use]
pub fn has_geo(record: &Record, crs: CrsConfig) -> bool {
    if crs.geographic {
        record.get(GEOCODE_LAT_COLUMN).is_some() && record.get(GEOCODE_LON_COLUMN).is_some()
    } else if crs.projected {
        record.get(GEOCODE_X_COLUMN).is_some() && record.get(GEOCODE_Y_COLUMN).is_some()
    } else {
        record.get(MATCH_TYPE_COLUMN).is_some()
    }
}

/// Splits into (resolved, needing further resolution) on coordinates.
#[must_use]
pub fn split_geos(frame: Frame, crs: CrsConfig) -> (Frame, Frame) {
    frame.split(|r| has_geo(r, crs))
}

/// Resolves every record through a geocoding service across a bounded
/// worker pool. Output order is not preserved by the pool; the frame is
/// re-sorted by row index before returning.
///
/// `fallback` marks the terminal stage: the ambiguous-tiebreak flag from
/// the previous stage is left untouched (the fallback service has no
/// opinion on it) and every record counts as finished in the progress
/// bar, not just the resolved ones.
///
/// # Errors
///
/// Returns [`PipelineError`] when a resolver reports a fatal error
/// (authentication failure or exhausted retries); every other resolver
/// error degrades that record to the no-match state.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_stage(
    frame: Frame,
    resolver: &Arc<dyn GeocodeResolver>,
    crs: CrsConfig,
    query_column: &str,
    zip_column: Option<&str>,
    workers: usize,
    fallback: bool,
    progress: Option<&Arc<dyn ProgressCallback>>,
) -> Result<Frame, PipelineError> {
    let columns = frame.columns().to_vec();
    let workers = workers.max(1);

    let results: Vec<Result<Record, PipelineError>> =
        stream::iter(frame.into_records().into_iter().map(|record| {
            let resolver = Arc::clone(resolver);
            async move {
                resolve_record(
                    record,
                    resolver.as_ref(),
                    crs,
                    query_column,
                    zip_column,
                    fallback,
                )
                .await
            }
        }))
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut resolved = Frame::new(columns);
    for result in results {
        let record = result?;
        // A primary-stage miss is handed to the fallback stage and
        // finishes there; counting it here too would overrun the total.
        if let Some(p) = progress
            && (fallback || has_geo(&record, crs))
        {
            p.inc(1);
        }
        resolved.push(record);
    }
    resolved.sort_by_row_index();
    Ok(resolved)
}

/// Resolves one record, converting non-fatal resolver errors into the
/// no-match terminal state.
async fn resolve_record(
    mut record: Record,
    resolver: &dyn GeocodeResolver,
    crs: CrsConfig,
    query_column: &str,
    zip_column: Option<&str>,
    fallback: bool,
) -> Result<Record, PipelineError> {
    let base_query = record
        .get(query_column)
        .map(String::from)
        .filter(|q| !q.trim().is_empty());
    let Some(base_query) = base_query else {
        // Nothing to send; the record stays in its no-match state.
        return Ok(record);
    };

    let query_address =
        if record.get_bool(IS_UNDEFINED_COLUMN) && record.get_bool(IS_ADDR_COLUMN) {
            format!("{base_query}{LOCALITY_SUFFIX}")
        } else {
            base_query.clone()
        };

    let request = ResolveRequest {
        query_address,
        output_address: record
            .get(OUTPUT_ADDRESS_COLUMN)
            .map_or_else(|| base_query.clone(), String::from),
        zip: zip_column.and_then(|c| record.get(c)).map(String::from),
        is_addr: record.get_bool(IS_ADDR_COLUMN),
        is_philly_addr: record.get_bool(IS_PHILLY_ADDR_COLUMN),
    };

    match resolver.resolve(&request).await {
        Ok(resolution) => {
            apply_resolution(&mut record, &resolution, crs, fallback);
            Ok(record)
        }
        Err(e) if e.is_fatal() => Err(PipelineError::Geocode(e)),
        Err(e) => {
            log::warn!(
                "Lookup failed for {:?}: {e}; treating as no match",
                request.query_address
            );
            Ok(record)
        }
    }
}

/// Writes a resolution's fields onto a record. The fallback stage keeps
/// the ambiguous-tiebreak flag from the previous stage.
fn apply_resolution(
    record: &mut Record,
    resolution: &Resolution,
    crs: CrsConfig,
    fallback: bool,
) {
    record.set(OUTPUT_ADDRESS_COLUMN, resolution.output_address.clone());
    record.set(IS_ADDR_COLUMN, resolution.is_addr.to_string());
    record.set(IS_PHILLY_ADDR_COLUMN, resolution.is_philly_addr.to_string());
    if !fallback {
        record.set(
            IS_MULTIPLE_MATCH_COLUMN,
            resolution.is_multiple_match.to_string(),
        );
    }
    record.set_opt(
        MATCH_TYPE_COLUMN,
        resolution.match_type.map(|m| m.as_str().to_string()),
    );

    if crs.geographic {
        record.set_opt(
            GEOCODE_LAT_COLUMN,
            resolution.coordinates.geographic.map(|(lat, _)| lat.to_string()),
        );
        record.set_opt(
            GEOCODE_LON_COLUMN,
            resolution.coordinates.geographic.map(|(_, lon)| lon.to_string()),
        );
    }
    if crs.projected {
        record.set_opt(
            GEOCODE_X_COLUMN,
            resolution.coordinates.projected.map(|(x, _)| x.to_string()),
        );
        record.set_opt(
            GEOCODE_Y_COLUMN,
            resolution.coordinates.projected.map(|(_, y)| y.to_string()),
        );
    }

    for (field, value) in &resolution.enrichment {
        record.set_opt(field, value.clone());
    }
}

#[cfg(test)]
mod tests {
    use address_enrich_parser::StreetParser;
    use address_enrich_reference::fields::resolve_fields;

    use super::*;
    use crate::frame::Frame;

    const INPUT: &str = "\
name,address
Alice,\"1234 Market St, Philadelphia, PA 19107\"
Bob,\"100 Main St, Gloucester City, NJ 08030\"
Carol,dfdfa sdhl; dort@
";

    fn full_fields() -> AddressFields {
        AddressFields::Full("address".to_string())
    }

    fn prepared_frame() -> Frame {
        let mut frame = Frame::from_csv_reader(INPUT.as_bytes()).expect("valid csv");
        let parser = StreetParser::new();
        normalize_stage(&mut frame, &parser, "address");
        build_query_address_stage(&mut frame, &full_fields());
        classify_stage(&mut frame, &full_fields());
        frame
    }

    #[test]
    fn normalize_seeds_validity_columns() {
        let frame = prepared_frame();
        let alice = &frame.records()[0];
        assert_eq!(alice.get(OUTPUT_ADDRESS_COLUMN), Some("1234 MARKET ST"));
        assert_eq!(alice.get(IS_ADDR_COLUMN), Some("true"));
        assert_eq!(alice.get(IS_PHILLY_ADDR_COLUMN), Some("true"));
        assert_eq!(alice.get(IS_MULTIPLE_MATCH_COLUMN), Some("false"));
        assert_eq!(alice.get(MATCH_TYPE_COLUMN), None);

        let carol = &frame.records()[2];
        assert_eq!(carol.get(IS_ADDR_COLUMN), Some("false"));
        assert_eq!(carol.get(OUTPUT_ADDRESS_COLUMN), Some("dfdfa sdhl; dort@"));
    }

    #[test]
    fn full_address_config_uses_raw_field_as_query() {
        let frame = prepared_frame();
        assert_eq!(
            frame.records()[0].get(JOINED_ADDRESS_COLUMN),
            Some("1234 Market St, Philadelphia, PA 19107")
        );
    }

    #[test]
    fn split_config_rebuilds_query_from_standardized_address() {
        const SPLIT_INPUT: &str = "\
addr,city,state,zip
1234  Market   Street,Philadelphia,PA,19107
";
        let mut frame = Frame::from_csv_reader(SPLIT_INPUT.as_bytes()).expect("valid csv");
        let fields = AddressFields::Split {
            street: "addr".to_string(),
            city: Some("city".to_string()),
            state: Some("state".to_string()),
            zip: Some("zip".to_string()),
        };
        let parser = StreetParser::new();
        normalize_stage(&mut frame, &parser, "addr");
        build_query_address_stage(&mut frame, &fields);
        assert_eq!(
            frame.records()[0].get(JOINED_ADDRESS_COLUMN),
            Some("1234 MARKET ST Philadelphia PA 19107")
        );
    }

    #[test]
    fn classify_splits_local_from_non_local() {
        let frame = prepared_frame();
        let (philly, non_philly) = split_non_philly(frame);
        assert_eq!(philly.len(), 2);
        assert_eq!(non_philly.len(), 1);
        assert_eq!(non_philly.records()[0].get("name"), Some("Bob"));
    }

    #[test]
    fn reference_stage_matches_and_enriches() {
        const TABLE: &str = "\
street_address,geocode_lat,geocode_lon,geocode_x,geocode_y,census_tract,zip_code
1234 MARKET ST,39.9519,-75.1605,2694393.35,235982.72,1,19107
";
        let fields = resolve_fields(&["census_tract_2020".to_string()]).expect("known");
        let table = ReferenceTable::from_reader(TABLE.as_bytes(), true, true, &fields)
            .expect("valid table");

        let mut frame = prepared_frame();
        reference_stage(&mut frame, &table, &fields, CrsConfig::default(), None);

        let alice = &frame.records()[0];
        assert_eq!(alice.get(MATCH_TYPE_COLUMN), Some("address_file"));
        assert_eq!(alice.get(GEOCODE_LAT_COLUMN), Some("39.9519"));
        assert_eq!(alice.get(GEOCODE_Y_COLUMN), Some("235982.72"));
        assert_eq!(alice.get("census_tract_2020"), Some("1"));

        let carol = &frame.records()[2];
        assert_eq!(carol.get(MATCH_TYPE_COLUMN), None);
        assert_eq!(carol.get(GEOCODE_LAT_COLUMN), None);

        let (has, needs) = split_geos(frame, CrsConfig::default());
        assert_eq!(has.len(), 1);
        assert_eq!(needs.len(), 2);
    }

    #[test]
    fn reference_stage_matches_without_coordinate_systems() {
        const TABLE: &str = "\
street_address,geocode_lat,geocode_lon,geocode_x,geocode_y
1234 MARKET ST,39.9519,-75.1605,2694393.35,235982.72
";
        let crs = CrsConfig {
            geographic: false,
            projected: false,
        };
        let table =
            ReferenceTable::from_reader(TABLE.as_bytes(), false, false, &[]).expect("valid table");

        let mut frame = prepared_frame();
        reference_stage(&mut frame, &table, &[], crs, None);

        let alice = &frame.records()[0];
        assert_eq!(alice.get(MATCH_TYPE_COLUMN), Some("address_file"));
        assert!(!frame.has_column(GEOCODE_LAT_COLUMN));

        let (has, needs) = split_geos(frame, crs);
        assert_eq!(has.len(), 1);
        assert_eq!(needs.len(), 2);
    }

    #[test]
    fn reference_stage_renames_colliding_input_columns() {
        const COLLIDING: &str = "\
address,zip_code
\"1234 Market St, Philadelphia, PA 19107\",original-value
";
        const TABLE: &str = "\
street_address,geocode_lat,geocode_lon,geocode_x,geocode_y,zip_code
1234 MARKET ST,39.9519,-75.1605,2694393.35,235982.72,19107
";
        let fields = resolve_fields(&["zip_code".to_string()]).expect("known");
        let table = ReferenceTable::from_reader(TABLE.as_bytes(), true, true, &fields)
            .expect("valid table");

        let mut frame = Frame::from_csv_reader(COLLIDING.as_bytes()).expect("valid csv");
        let parser = StreetParser::new();
        normalize_stage(&mut frame, &parser, "address");
        reference_stage(&mut frame, &table, &fields, CrsConfig::default(), None);

        assert!(frame.has_column("zip_code_left"));
        let record = &frame.records()[0];
        assert_eq!(record.get("zip_code_left"), Some("original-value"));
        assert_eq!(record.get("zip_code"), Some("19107"));
    }
}
