//! Compile-time registry of enrichment fields.
//!
//! The allow-list lives in `fields/enrichment.toml`, embedded at build
//! time. Each entry maps the user-facing field name (which doubles as the
//! AIS property name) to the address file column carrying the same value.

use serde::Deserialize;

use crate::ReferenceError;

/// One allow-listed enrichment field.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentField {
    /// User-facing name; also the AIS search response property.
    pub name: String,
    /// Column name in the city address file.
    pub column: String,
}

/// Wrapper for the embedded TOML document.
#[derive(Debug, Deserialize)]
struct FieldRegistry {
    field: Vec<EnrichmentField>,
}

const FIELDS_TOML: &str = include_str!("../fields/enrichment.toml");

/// Returns every allow-listed enrichment field.
///
/// # Panics
///
/// Panics if the embedded TOML is malformed (a compile-time guarantee
/// exercised by tests).
#[must_use]
pub fn all_fields() -> Vec<EnrichmentField> {
    let registry: FieldRegistry = toml::de::from_str(FIELDS_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse enrichment field registry: {e}"));
    registry.field
}

/// Resolves requested field names against the allow-list, preserving the
/// request order and dropping duplicates.
///
/// # Errors
///
/// Returns [`ReferenceError::UnknownFields`] listing every requested name
/// that is not allow-listed.
pub fn resolve_fields(requested: &[String]) -> Result<Vec<EnrichmentField>, ReferenceError> {
    let all = all_fields();

    let unknown: Vec<String> = requested
        .iter()
        .filter(|name| !all.iter().any(|f| &f.name == *name))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(ReferenceError::UnknownFields { names: unknown });
    }

    let mut resolved: Vec<EnrichmentField> = Vec::new();
    for name in requested {
        if resolved.iter().any(|f| &f.name == name) {
            continue;
        }
        if let Some(field) = all.iter().find(|f| &f.name == name) {
            resolved.push(field.clone());
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn registry_loads() {
        assert!(!all_fields().is_empty());
    }

    #[test]
    fn field_names_are_unique() {
        let mut seen = BTreeSet::new();
        for field in all_fields() {
            assert!(seen.insert(field.name.clone()), "duplicate {}", field.name);
        }
    }

    #[test]
    fn resolves_known_fields_in_request_order() {
        let resolved = resolve_fields(&[
            "zip_code".to_string(),
            "census_tract_2020".to_string(),
        ])
        .expect("known fields");
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].name, "zip_code");
        assert_eq!(resolved[1].name, "census_tract_2020");
        assert_eq!(resolved[1].column, "census_tract");
    }

    #[test]
    fn drops_duplicate_requests() {
        let resolved = resolve_fields(&[
            "zip_code".to_string(),
            "zip_code".to_string(),
        ])
        .expect("known fields");
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn rejects_unknown_fields_by_name() {
        let err = resolve_fields(&[
            "zip_code".to_string(),
            "favorite_color".to_string(),
        ])
        .unwrap_err();
        match err {
            ReferenceError::UnknownFields { names } => {
                assert_eq!(names, vec!["favorite_color".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
