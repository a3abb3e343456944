use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// One source file the submission registry currently has on offer. The
/// engine only consumes this shape; how the registry produces it is its
/// own business.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub data_type: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    /// When present, the sub-type is derived from this taxonomic id through
    /// a [`ProviderLookup`] instead of being taken literally.
    #[serde(default)]
    pub taxon_id: Option<String>,
    /// Artifact location: http(s) URL, `file://` URI, or a plain path.
    pub path: String,
    /// Where the artifact lands locally once fetched (and decompressed).
    #[serde(default)]
    pub temp_extracted_file: Option<String>,
}

/// The submission registry's answer: release metadata plus the catalog of
/// currently-available source files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub release_version: String,
    pub data_files: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Catalog file is not valid JSON: {}", path.display()))
    }
}

/// Seam for deriving a data-provider code from a taxonomic id. The mapping
/// is supplied by the caller, not hard-coded in the resolution logic.
pub trait ProviderLookup {
    fn provider_for_taxon(&self, taxon_id: &str) -> Option<String>;
}

/// The Alliance member-database table: taxon id to model-organism-database
/// code.
#[derive(Debug, Default)]
pub struct AllianceProviders;

impl ProviderLookup for AllianceProviders {
    fn provider_for_taxon(&self, taxon_id: &str) -> Option<String> {
        let bare = taxon_id.strip_prefix("NCBITaxon:").unwrap_or(taxon_id);
        let provider = match bare {
            "7955" => "ZFIN",
            "6239" => "WB",
            "10090" => "MGI",
            "10116" => "RGD",
            "559292" | "4932" => "SGD",
            "7227" => "FB",
            "9606" => "Human",
            _ => return None,
        };
        Some(provider.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_submission_catalog() {
        let raw = r#"{
            "schemaVersion": "1.0.0.8",
            "releaseVersion": "1.0.0",
            "dataFiles": [
                { "dataType": "GeneInfo", "subType": "SGD", "path": "a.json",
                  "tempExtractedFile": "a.json" },
                { "dataType": "Allele", "taxonId": "NCBITaxon:7227", "path": "b.json.gz" }
            ]
        }"#;
        let catalog: Catalog = serde_json::from_str(raw).unwrap();
        assert_eq!(catalog.release_version, "1.0.0");
        assert_eq!(catalog.data_files.len(), 2);
        assert_eq!(catalog.data_files[0].sub_type.as_deref(), Some("SGD"));
        assert_eq!(catalog.data_files[1].taxon_id.as_deref(), Some("NCBITaxon:7227"));
        assert!(catalog.data_files[1].sub_type.is_none());
    }

    #[test]
    fn alliance_lookup_resolves_known_taxa() {
        let lookup = AllianceProviders;
        assert_eq!(lookup.provider_for_taxon("NCBITaxon:7227").as_deref(), Some("FB"));
        assert_eq!(lookup.provider_for_taxon("559292").as_deref(), Some("SGD"));
        assert_eq!(lookup.provider_for_taxon("NCBITaxon:10090").as_deref(), Some("MGI"));
        assert_eq!(lookup.provider_for_taxon("NCBITaxon:999999"), None);
    }
}
