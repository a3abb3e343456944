use crate::catalog::{Catalog, CatalogEntry, ProviderLookup};
use crate::run_config::RunConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Dataset types whose configured sub-type names a standalone ontology
/// loader: the sub-type is promoted to a dataset type of its own during
/// resolution.
pub const ONTOLOGY_TYPES: &[&str] = &["GO", "SO", "DO", "MI"];

/// One data-provider instance of a dataset type. The staged artifact path
/// is recorded once the source file has been fetched.
#[derive(Debug, Clone)]
pub struct SubDescriptor {
    pub provider: String,
    pub location: String,
    pub extracted_file: Option<String>,
    pub staged_artifact: Option<PathBuf>,
}

/// One resolved dataset type: its providers in catalog order plus the
/// pipeline scalars the configuration requested for it. Immutable after
/// resolution.
#[derive(Debug, Clone)]
pub struct DatasetDescriptor {
    pub data_type: String,
    pub batch_size: usize,
    pub commit_size: usize,
    pub sub_descriptors: Vec<SubDescriptor>,
}

/// A registry entry is either a resolved dataset or a run-metadata string.
/// The variant is decided once at construction, never by inspecting the
/// value later.
#[derive(Debug, Clone)]
pub enum Entry {
    Dataset(DatasetDescriptor),
    Metadata(String),
}

/// In-memory directory of resolved dataset descriptors keyed by dataset
/// type. Lookup of an unknown type is absent, not an error, so optional
/// dataset types can simply be skipped by callers.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    /// Resolves the configuration against the catalog: an entry is included
    /// only if its `(dataType, subType)` pair appears in the configuration's
    /// allow-list. Entries carrying a taxon id get their sub-type derived
    /// through `providers` rather than read literally.
    pub fn resolve(
        config: &RunConfig,
        catalog: &Catalog,
        providers: &dyn ProviderLookup,
    ) -> Self {
        // Allow-list of (type, subtype) pairs, each remembering the request
        // that put it there. Ontology sub-types resolve under their own key.
        let mut allowed: HashMap<(String, String), &crate::run_config::DatasetRequest> =
            HashMap::new();
        for request in &config.requests {
            for sub_type in &request.sub_types {
                let data_type = if ONTOLOGY_TYPES.contains(&sub_type.as_str()) {
                    sub_type.clone()
                } else {
                    request.data_type.clone()
                };
                allowed.insert((data_type, sub_type.clone()), request);
            }
        }

        let mut entries: HashMap<String, Entry> = HashMap::new();
        entries.insert(
            crate::run_config::SCHEMA_VERSION_KEY.to_string(),
            Entry::Metadata(catalog.schema_version.clone()),
        );
        entries.insert(
            crate::run_config::RELEASE_VERSION_KEY.to_string(),
            Entry::Metadata(catalog.release_version.clone()),
        );

        for entry in &catalog.data_files {
            let Some(sub_type) = effective_sub_type(entry, providers) else {
                debug!(
                    data_type = %entry.data_type,
                    taxon = entry.taxon_id.as_deref().unwrap_or(""),
                    "Catalog entry has no resolvable sub-type, skipping"
                );
                continue;
            };

            let key = (entry.data_type.clone(), sub_type.clone());
            let Some(request) = allowed.get(&key) else {
                debug!(
                    data_type = %entry.data_type,
                    sub_type = %sub_type,
                    "Catalog entry not in configuration allow-list, skipping"
                );
                continue;
            };

            let descriptor = entries
                .entry(entry.data_type.clone())
                .or_insert_with(|| {
                    Entry::Dataset(DatasetDescriptor {
                        data_type: entry.data_type.clone(),
                        batch_size: request.batch_size,
                        commit_size: request.commit_size,
                        sub_descriptors: Vec::new(),
                    })
                });
            if let Entry::Dataset(descriptor) = descriptor {
                descriptor.sub_descriptors.push(SubDescriptor {
                    provider: sub_type,
                    location: entry.path.clone(),
                    extracted_file: entry.temp_extracted_file.clone(),
                    staged_artifact: None,
                });
            }
        }

        let registry = Self { entries };
        info!(
            dataset_types = registry.dataset_types().count(),
            "Catalog resolved against configuration"
        );
        registry
    }

    /// Looks up a resolved dataset descriptor. `None` means the type was not
    /// requested or the catalog offered nothing for it.
    pub fn dataset(&self, data_type: &str) -> Option<&DatasetDescriptor> {
        match self.entries.get(data_type) {
            Some(Entry::Dataset(descriptor)) => Some(descriptor),
            _ => None,
        }
    }

    /// Records where a sub-descriptor's artifact landed once a worker has
    /// fetched it.
    pub fn record_staged_artifact(&mut self, data_type: &str, provider: &str, path: PathBuf) {
        if let Some(Entry::Dataset(descriptor)) = self.entries.get_mut(data_type) {
            if let Some(sub) = descriptor
                .sub_descriptors
                .iter_mut()
                .find(|s| s.provider == provider)
            {
                sub.staged_artifact = Some(path);
            }
        }
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(Entry::Metadata(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Resolved dataset type names in deterministic (sorted) order.
    pub fn dataset_types(&self) -> impl Iterator<Item = &str> {
        let mut types: Vec<&str> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| match entry {
                Entry::Dataset(_) => Some(key.as_str()),
                Entry::Metadata(_) => None,
            })
            .collect();
        types.sort_unstable();
        types.into_iter()
    }
}

fn effective_sub_type(entry: &CatalogEntry, providers: &dyn ProviderLookup) -> Option<String> {
    match &entry.taxon_id {
        Some(taxon) => providers.provider_for_taxon(taxon),
        None => entry.sub_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AllianceProviders;
    use serde_json::json;

    fn catalog(files: serde_json::Value) -> Catalog {
        serde_json::from_value(json!({
            "schemaVersion": "1.0.0.8",
            "releaseVersion": "1.0.0",
            "dataFiles": files
        }))
        .unwrap()
    }

    fn config(doc: serde_json::Value) -> RunConfig {
        RunConfig::from_document(&doc).unwrap()
    }

    #[test]
    fn resolution_is_a_set_intersection() {
        let config = config(json!({
            "schemaVersion": "1.0.0.8",
            "releaseVersion": "1.0.0",
            "GeneInfo": { "subTypes": ["SGD", "FB"] }
        }));
        let catalog = catalog(json!([
            { "dataType": "GeneInfo", "subType": "SGD", "path": "a.json" },
            { "dataType": "GeneInfo", "subType": "FB", "path": "b.json" },
            { "dataType": "Disease", "subType": "SGD", "path": "c.json" }
        ]));

        let registry = Registry::resolve(&config, &catalog, &AllianceProviders);

        let gene_info = registry.dataset("GeneInfo").unwrap();
        let providers: Vec<&str> = gene_info
            .sub_descriptors
            .iter()
            .map(|s| s.provider.as_str())
            .collect();
        assert_eq!(providers, vec!["SGD", "FB"]);
        assert!(registry.dataset("Disease").is_none());
    }

    #[test]
    fn unknown_lookup_is_absent_not_an_error() {
        let registry = Registry::default();
        assert!(registry.dataset("Phenotype").is_none());
    }

    #[test]
    fn metadata_keys_are_never_datasets() {
        let config = config(json!({
            "schemaVersion": "1.0.0.8",
            "releaseVersion": "1.0.0",
            "GeneInfo": { "subTypes": ["SGD"] }
        }));
        let catalog = catalog(json!([
            { "dataType": "GeneInfo", "subType": "SGD", "path": "a.json" }
        ]));
        let registry = Registry::resolve(&config, &catalog, &AllianceProviders);

        assert_eq!(registry.metadata("schemaVersion"), Some("1.0.0.8"));
        assert_eq!(registry.metadata("releaseVersion"), Some("1.0.0"));
        assert!(registry.dataset("schemaVersion").is_none());
        assert!(registry.dataset("releaseVersion").is_none());
    }

    #[test]
    fn taxon_id_derives_the_provider() {
        let config = config(json!({
            "schemaVersion": "1.0.0.8",
            "releaseVersion": "1.0.0",
            "Allele": { "subTypes": ["FB"] }
        }));
        let catalog = catalog(json!([
            { "dataType": "Allele", "taxonId": "NCBITaxon:7227", "path": "fb_allele.json" },
            { "dataType": "Allele", "taxonId": "NCBITaxon:999999", "path": "mystery.json" }
        ]));
        let registry = Registry::resolve(&config, &catalog, &AllianceProviders);

        let allele = registry.dataset("Allele").unwrap();
        assert_eq!(allele.sub_descriptors.len(), 1);
        assert_eq!(allele.sub_descriptors[0].provider, "FB");
    }

    #[test]
    fn ontology_sub_types_resolve_under_their_own_key() {
        let config = config(json!({
            "schemaVersion": "1.0.0.8",
            "releaseVersion": "1.0.0",
            "Ontology": { "subTypes": ["GO", "DO"] }
        }));
        let catalog = catalog(json!([
            { "dataType": "GO", "subType": "GO", "path": "go.obo.json" },
            { "dataType": "DO", "subType": "DO", "path": "do.obo.json" }
        ]));
        let registry = Registry::resolve(&config, &catalog, &AllianceProviders);

        assert!(registry.dataset("GO").is_some());
        assert!(registry.dataset("DO").is_some());
        assert!(registry.dataset("Ontology").is_none());
    }

    #[test]
    fn descriptor_carries_configured_scalars() {
        let config = config(json!({
            "schemaVersion": "1.0.0.8",
            "releaseVersion": "1.0.0",
            "GeneInfo": { "subTypes": ["SGD"], "batchSize": 2, "commitSize": 500 }
        }));
        let catalog = catalog(json!([
            { "dataType": "GeneInfo", "subType": "SGD", "path": "a.json" }
        ]));
        let registry = Registry::resolve(&config, &catalog, &AllianceProviders);

        let descriptor = registry.dataset("GeneInfo").unwrap();
        assert_eq!(descriptor.batch_size, 2);
        assert_eq!(descriptor.commit_size, 500);
    }
}
