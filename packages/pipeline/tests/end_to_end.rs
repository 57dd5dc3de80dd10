//! Full pipeline runs against fake geocoding services.
//!
//! Covers the cascade end to end: an address file hit, an AIS hit, a
//! non-local record routed straight to TomTom, and garbage input that no
//! source matches, all merged back in input order.

use std::path::PathBuf;
use std::sync::Arc;

use address_enrich_geocoder::{
    GeocodeError, GeocodeResolver, GeocodeResult, MatchType, Resolution, ResolveRequest,
};
use address_enrich_parser::StreetParser;
use address_enrich_pipeline::config::Config;
use address_enrich_pipeline::frame::Frame;
use address_enrich_pipeline::progress::null_progress;
use address_enrich_pipeline::{PipelineError, run};
use address_enrich_reference::ReferenceError;
use async_trait::async_trait;

const INPUT_CSV: &str = "\
name,address
Alice,\"1001 Loney Street, Philadelphia, PA 19111\"
Bob,\"508 Carver Court, Philadelphia, PA\"
Carol,\"12 Haddon Ave, Lawnside, NJ 08045\"
Dave,dfdfa sdhl; dort@
";

const GEOGRAPHY_CSV: &str = "\
street_address,geocode_lat,geocode_lon,geocode_x,geocode_y,census_tract
1001 LONEY ST,40.0877,-75.0427,2698470.1,284063.9,9891
";

/// Accepts exactly one Carver Court address; everything else misses.
struct FakeAis {
    fields: Vec<String>,
}

#[async_trait]
impl GeocodeResolver for FakeAis {
    async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, GeocodeError> {
        if request.query_address.contains("CARVER") {
            Ok(Resolution {
                output_address: "508 CARVER CT".to_string(),
                is_addr: true,
                is_philly_addr: true,
                is_multiple_match: false,
                match_type: Some(MatchType::Ais),
                coordinates: GeocodeResult {
                    geographic: Some((39.9623, -75.1312)),
                    projected: Some((2_695_000.0, 240_000.0)),
                },
                enrichment: self
                    .fields
                    .iter()
                    .map(|f| (f.clone(), Some("42".to_string())))
                    .collect(),
            })
        } else {
            Ok(Resolution::no_match(request, &self.fields))
        }
    }
}

/// Accepts exactly one Lawnside address; everything else misses.
struct FakeTomTom;

#[async_trait]
impl GeocodeResolver for FakeTomTom {
    async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, GeocodeError> {
        if request.query_address.contains("Lawnside") {
            Ok(Resolution {
                output_address: "12 HADDON AVE".to_string(),
                is_addr: true,
                is_philly_addr: false,
                is_multiple_match: false,
                match_type: Some(MatchType::TomTom),
                coordinates: GeocodeResult {
                    geographic: Some((39.8664, -75.0305)),
                    projected: Some((2_720_000.0, 210_000.0)),
                },
                enrichment: std::collections::HashMap::new(),
            })
        } else {
            Ok(Resolution::no_match(request, &[]))
        }
    }
}

fn write_fixture(dir: &std::path::Path) -> Config {
    let input_file = dir.join("batch.csv");
    let geography_file = dir.join("addresses.csv");
    std::fs::write(&input_file, INPUT_CSV).expect("write input");
    std::fs::write(&geography_file, GEOGRAPHY_CSV).expect("write geography");

    let toml = format!(
        "input_file = {input_file:?}\n\
         geography_file = {geography_file:?}\n\
         output_file = {output:?}\n\
         full_address_field = \"address\"\n\
         enrichment_fields = [\"census_tract_2020\"]\n\
         workers = 2\n",
        output = dir.join("out.csv"),
    );
    toml::de::from_str(&toml).expect("valid config")
}

fn resolvers() -> (Arc<dyn GeocodeResolver>, Arc<dyn GeocodeResolver>) {
    (
        Arc::new(FakeAis {
            fields: vec!["census_tract_2020".to_string()],
        }),
        Arc::new(FakeTomTom),
    )
}

#[tokio::test]
async fn cascade_resolves_each_record_through_the_right_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path());
    let parser = StreetParser::new();
    let (primary, secondary) = resolvers();
    let progress = null_progress();

    let summary = run(&config, &parser, &primary, &secondary, Some(&progress))
        .await
        .expect("run succeeds");

    assert_eq!(summary.rows, 4);
    assert_eq!(summary.reference_matches, 1);
    assert_eq!(summary.ais_matches, 1);
    assert_eq!(summary.tomtom_matches, 1);
    assert_eq!(summary.unmatched, 1);
    assert_eq!(summary.multiple_matches, 0);

    let output = Frame::read_csv(&config.output_path()).expect("output readable");
    assert_eq!(output.len(), 4);

    // Input order is restored and internal columns are gone.
    let names: Vec<&str> = output
        .records()
        .iter()
        .filter_map(|r| r.get("name"))
        .collect();
    assert_eq!(names, vec!["Alice", "Bob", "Carol", "Dave"]);
    assert!(!output.has_column("joined_address"));
    assert!(!output.has_column("is_non_philly"));
    assert!(!output.has_column("is_undefined"));

    let alice = &output.records()[0];
    assert_eq!(alice.get("match_type"), Some("address_file"));
    assert_eq!(alice.get("output_address"), Some("1001 LONEY ST"));
    assert_eq!(alice.get("geocode_lat"), Some("40.0877"));
    assert_eq!(alice.get("geocode_x"), Some("2698470.1"));
    assert_eq!(alice.get("census_tract_2020"), Some("9891"));

    let bob = &output.records()[1];
    assert_eq!(bob.get("match_type"), Some("ais"));
    assert_eq!(bob.get("output_address"), Some("508 CARVER CT"));
    assert_eq!(bob.get("geocode_lat"), Some("39.9623"));
    assert_eq!(bob.get("geocode_y"), Some("240000"));
    assert_eq!(bob.get("census_tract_2020"), Some("42"));

    let carol = &output.records()[2];
    assert_eq!(carol.get("match_type"), Some("tomtom"));
    assert_eq!(carol.get("is_philly_addr"), Some("false"));
    assert_eq!(carol.get("output_address"), Some("12 HADDON AVE"));
    assert_eq!(carol.get("geocode_lat"), Some("39.8664"));

    let dave = &output.records()[3];
    assert_eq!(dave.get("match_type"), None);
    assert_eq!(dave.get("is_addr"), Some("false"));
    assert_eq!(dave.get("geocode_lat"), None);
    assert_eq!(dave.get("geocode_lon"), None);
    assert_eq!(dave.get("output_address"), Some("dfdfa sdhl; dort@"));
}

#[tokio::test]
async fn ambiguous_address_configuration_fails_before_reading_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = write_fixture(dir.path());
    config.address_fields = Some(address_enrich_pipeline::config::SplitAddressFields {
        street: Some("address".to_string()),
        ..Default::default()
    });
    // Point at a nonexistent input: the config error must fire first.
    config.input_file = PathBuf::from("/nonexistent/batch.csv");

    let parser = StreetParser::new();
    let (primary, secondary) = resolvers();
    let err = run(&config, &parser, &primary, &secondary, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Config { .. }));
}

#[tokio::test]
async fn unknown_enrichment_field_fails_before_reading_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = write_fixture(dir.path());
    config.enrichment_fields = vec!["favorite_color".to_string()];
    config.input_file = PathBuf::from("/nonexistent/batch.csv");

    let parser = StreetParser::new();
    let (primary, secondary) = resolvers();
    let err = run(&config, &parser, &primary, &secondary, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Reference(ReferenceError::UnknownFields { .. })
    ));
}

#[tokio::test]
async fn missing_configured_column_fails_fast() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = write_fixture(dir.path());
    config.full_address_field = Some("street_addr".to_string());

    let parser = StreetParser::new();
    let (primary, secondary) = resolvers();
    let err = run(&config, &parser, &primary, &secondary, None)
        .await
        .unwrap_err();
    match err {
        PipelineError::Config { message } => assert!(message.contains("street_addr")),
        other => panic!("unexpected error: {other}"),
    }
}

/// A resolver that always reports an authentication failure.
struct AuthFailingResolver;

#[async_trait]
impl GeocodeResolver for AuthFailingResolver {
    async fn resolve(&self, _request: &ResolveRequest) -> Result<Resolution, GeocodeError> {
        Err(GeocodeError::Auth { status: 401 })
    }
}

#[tokio::test]
async fn auth_failure_aborts_the_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_fixture(dir.path());
    let parser = StreetParser::new();
    let primary: Arc<dyn GeocodeResolver> = Arc::new(AuthFailingResolver);
    let (_, secondary) = resolvers();

    let err = run(&config, &parser, &primary, &secondary, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Geocode(GeocodeError::Auth { status: 401 })
    ));
}
