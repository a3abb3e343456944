use crate::config;
use crate::stage::QuerySpec;
use anyhow::{Context, Result};
use neo4rs::{query, Graph};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{error, info, warn};

/// Cypher templates for the generic record groups. `{label}` is fixed when
/// the `QuerySpec` is built; `{file}` and `{commit}` are rendered at load
/// time.
/// MERGE-by-key keeps re-running a staged file idempotent.
const CYPHER_MERGE_ENTITIES: &str = r#"LOAD CSV WITH HEADERS FROM '{file}' AS row
CALL { WITH row
    MERGE (o:{label} {primaryKey: row.primaryKey})
    ON CREATE SET o.name = row.name,
        o.symbol = row.symbol,
        o.taxonId = row.taxonId,
        o.dateProduced = row.dateProduced,
        o.dataProvider = row.dataProvider,
        o.release = row.release
} IN TRANSACTIONS OF {commit} ROWS;"#;

const CYPHER_MERGE_XREFS: &str = r#"LOAD CSV WITH HEADERS FROM '{file}' AS row
CALL { WITH row
    MATCH (o:{label} {primaryKey: row.dataId})
    MERGE (id:CrossReference {primaryKey: row.primaryKey})
    ON CREATE SET id.globalCrossRefId = row.globalCrossRefId,
        id.localId = row.localId,
        id.prefix = row.prefix,
        id.page = row.page
    MERGE (o)-[:CROSS_REFERENCE]->(id)
} IN TRANSACTIONS OF {commit} ROWS;"#;

/// Entity columns staged by the generic transform, in declared order.
pub const ENTITY_COLUMNS: &[&str] = &[
    "primaryKey",
    "name",
    "symbol",
    "taxonId",
    "dateProduced",
    "dataProvider",
    "release",
];

pub const XREF_COLUMNS: &[&str] = &[
    "dataId",
    "primaryKey",
    "globalCrossRefId",
    "localId",
    "prefix",
    "page",
];

/// Builds the generic query plan for one sub-descriptor, in dependency
/// order: entities before the cross-references that MATCH them. The entity
/// load is the one marked required.
pub fn generic_specs(data_type: &str, provider: &str, commit_size: usize) -> Vec<QuerySpec> {
    let label = node_label(data_type);
    vec![
        QuerySpec {
            group: crate::extract::ENTITY_GROUP.to_string(),
            cypher_template: CYPHER_MERGE_ENTITIES.replace("{label}", &label),
            commit_size,
            file_name: format!("{label}_{provider}.csv"),
            columns: ENTITY_COLUMNS.iter().map(|c| c.to_string()).collect(),
            required: true,
        },
        QuerySpec {
            group: crate::extract::XREF_GROUP.to_string(),
            cypher_template: CYPHER_MERGE_XREFS.replace("{label}", &label),
            commit_size,
            file_name: format!("{label}_{provider}_xrefs.csv"),
            columns: XREF_COLUMNS.iter().map(|c| c.to_string()).collect(),
            required: false,
        },
    ]
}

/// Dataset type as a node label: alphanumerics only, so the label can be
/// spliced into Cypher without quoting.
fn node_label(data_type: &str) -> String {
    let label: String = data_type.chars().filter(|c| c.is_alphanumeric()).collect();
    if label.is_empty() {
        "Entity".to_string()
    } else {
        label
    }
}

pub fn render(template: &str, file_uri: &str, commit_size: usize) -> String {
    template
        .replace("{file}", file_uri)
        .replace("{commit}", &commit_size.to_string())
}

/// One store-reported query failure, with enough context to triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFailure {
    pub group: String,
    pub provider: String,
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub queries_run: u64,
    pub failures: Vec<LoadFailure>,
    /// Set when a required spec failed; the sub-descriptor's remaining load
    /// steps were abandoned.
    pub required_failed: bool,
}

pub async fn connect_with_retry(uri: &str, user: &str, password: &str) -> Result<Graph> {
    let max_retries = config::LOAD_MAX_RETRIES;
    let delay = tokio::time::Duration::from_secs(config::LOAD_RETRY_DELAY_SECS);

    for attempt in 1..=max_retries {
        match Graph::new(uri, user, password) {
            Ok(graph) => match graph.run(query("RETURN 1;")).await {
                Ok(_) => return Ok(graph),
                Err(e) if attempt < max_retries => {
                    info!(attempt, "Connection test failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e).context(format!(
                        "Cannot connect to Neo4j at {uri} after {max_retries} attempts"
                    ));
                }
            },
            Err(e) if attempt < max_retries => {
                info!(attempt, "Cannot connect to Neo4j at {uri}, retrying: {e}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e).context(format!(
                    "Cannot connect to Neo4j at {uri} after {max_retries} attempts"
                ));
            }
        }
    }

    anyhow::bail!("Cannot connect to Neo4j at {uri} after {max_retries} attempts")
}

/// Primary-key indexes ahead of the first load; MERGE over unindexed keys
/// does not scale past toy inputs.
pub async fn create_indexes(graph: &Graph, data_types: &[String]) -> Result<()> {
    for data_type in data_types {
        let label = node_label(data_type);
        let cypher = format!(
            "CREATE INDEX {}_primary_key IF NOT EXISTS FOR (n:{label}) ON (n.primaryKey);",
            label.to_lowercase()
        );
        run_cypher(graph, &cypher).await?;
    }
    run_cypher(
        graph,
        "CREATE INDEX crossreference_primary_key IF NOT EXISTS \
         FOR (n:CrossReference) ON (n.primaryKey);",
    )
    .await?;
    Ok(())
}

async fn run_cypher(graph: &Graph, cypher: &str) -> Result<()> {
    graph
        .run(query(cypher))
        .await
        .with_context(|| format!("Failed to execute: {cypher}"))?;
    Ok(())
}

/// Executes one sub-descriptor's query specs strictly in the given order
/// against the store.
pub async fn execute_specs(
    graph: &Graph,
    specs: &[QuerySpec],
    import_prefix: &str,
    provider: &str,
) -> LoadOutcome {
    execute_plan(specs, import_prefix, provider, |cypher| async move {
        graph
            .run(query(&cypher))
            .await
            .map_err(anyhow::Error::from)
    })
    .await
}

/// Strict-order execution over any query runner. A failure on an optional
/// spec is recorded and the next spec runs; a failure on a required spec
/// abandons the remaining specs for this sub-descriptor only.
pub async fn execute_plan<F, Fut>(
    specs: &[QuerySpec],
    import_prefix: &str,
    provider: &str,
    mut run: F,
) -> LoadOutcome
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut outcome = LoadOutcome::default();

    for spec in specs {
        let file_uri = format!("{import_prefix}/{}", spec.file_name);
        let cypher = render(&spec.cypher_template, &file_uri, spec.commit_size);
        info!(group = %spec.group, provider, file = %spec.file_name, "Executing bulk load");
        outcome.queries_run += 1;

        match run(cypher).await {
            Ok(_) => {}
            Err(e) => {
                let failure = LoadFailure {
                    group: spec.group.clone(),
                    provider: provider.to_string(),
                    file_name: spec.file_name.clone(),
                    error: e.to_string(),
                };
                if spec.required {
                    error!(
                        group = %failure.group,
                        provider = %failure.provider,
                        file = %failure.file_name,
                        error = %failure.error,
                        "Required bulk load failed, abandoning remaining loads for this provider"
                    );
                    outcome.failures.push(failure);
                    outcome.required_failed = true;
                    break;
                }
                warn!(
                    group = %failure.group,
                    provider = %failure.provider,
                    file = %failure.file_name,
                    error = %failure.error,
                    "Bulk load failed, continuing with next query"
                );
                outcome.failures.push(failure);
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_specs_are_in_dependency_order() {
        let specs = generic_specs("GeneInfo", "SGD", 2000);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].group, "entities");
        assert!(specs[0].required);
        assert_eq!(specs[0].file_name, "GeneInfo_SGD.csv");
        assert_eq!(specs[1].group, "crossReferences");
        assert!(!specs[1].required);
        assert_eq!(specs[1].file_name, "GeneInfo_SGD_xrefs.csv");
    }

    #[test]
    fn render_substitutes_file_and_commit() {
        let specs = generic_specs("GeneInfo", "SGD", 2000);
        let cypher = render(
            &specs[0].cypher_template,
            "file:///import/GeneInfo_SGD.csv",
            specs[0].commit_size,
        );
        assert!(cypher.contains("file:///import/GeneInfo_SGD.csv"));
        assert!(cypher.contains("IN TRANSACTIONS OF 2000 ROWS"));
        assert!(cypher.contains("MERGE (o:GeneInfo {primaryKey: row.primaryKey})"));
        assert!(!cypher.contains("{file}"));
        assert!(!cypher.contains("{commit}"));
        assert!(!cypher.contains("{label}"));
    }

    #[test]
    fn template_is_merge_by_key() {
        // Idempotence contract: the write must MERGE on the primary key, so
        // loading the same staged file twice cannot duplicate entities.
        for spec in generic_specs("Disease", "FB", 100) {
            assert!(spec.cypher_template.contains("MERGE"));
            assert!(spec.cypher_template.contains("LOAD CSV WITH HEADERS"));
        }
    }

    #[test]
    fn node_label_strips_non_alphanumerics() {
        assert_eq!(node_label("GeneInfo"), "GeneInfo");
        assert_eq!(node_label("Gene Info-2"), "GeneInfo2");
        assert_eq!(node_label("::"), "Entity");
    }

    #[test]
    fn columns_match_the_generic_transform() {
        let specs = generic_specs("GeneInfo", "SGD", 100);
        assert_eq!(specs[0].columns[0], "primaryKey");
        assert_eq!(specs[1].columns[0], "dataId");
    }

    fn spec(group: &str, file_name: &str, required: bool) -> QuerySpec {
        QuerySpec {
            group: group.to_string(),
            cypher_template: "LOAD CSV WITH HEADERS FROM '{file}' AS row".to_string(),
            commit_size: 100,
            file_name: file_name.to_string(),
            columns: vec!["primaryKey".to_string()],
            required,
        }
    }

    /// Runner that fails any query touching a file named in `bad`, and logs
    /// every rendered query it was handed.
    fn failing_runner<'a>(
        executed: &'a std::cell::RefCell<Vec<String>>,
        bad: &'a [&'a str],
    ) -> impl FnMut(String) -> std::pin::Pin<Box<dyn Future<Output = Result<()>> + 'a>> + 'a {
        move |cypher: String| {
            executed.borrow_mut().push(cypher.clone());
            let fail = bad.iter().any(|name| cypher.contains(name));
            Box::pin(async move {
                if fail {
                    anyhow::bail!("connection reset by store")
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn optional_failure_is_recorded_and_the_next_spec_runs() {
        let specs = vec![
            spec("crossReferences", "bad_xrefs.csv", false),
            spec("entities", "good.csv", true),
        ];
        let executed = std::cell::RefCell::new(Vec::new());
        let outcome = execute_plan(
            &specs,
            "file:///import",
            "SGD",
            failing_runner(&executed, &["bad_xrefs.csv"]),
        )
        .await;

        assert_eq!(outcome.queries_run, 2);
        assert!(!outcome.required_failed);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].group, "crossReferences");
        assert_eq!(outcome.failures[0].provider, "SGD");
        assert_eq!(executed.borrow().len(), 2);
    }

    #[tokio::test]
    async fn required_failure_abandons_the_remaining_specs() {
        let specs = vec![
            spec("entities", "bad_entities.csv", true),
            spec("crossReferences", "never_run.csv", false),
        ];
        let executed = std::cell::RefCell::new(Vec::new());
        let outcome = execute_plan(
            &specs,
            "file:///import",
            "FB",
            failing_runner(&executed, &["bad_entities.csv"]),
        )
        .await;

        assert_eq!(outcome.queries_run, 1);
        assert!(outcome.required_failed);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].group, "entities");
        // The optional spec after the required failure never executed.
        assert_eq!(executed.borrow().len(), 1);
        assert!(!executed.borrow()[0].contains("never_run.csv"));
    }

    #[tokio::test]
    async fn clean_plan_reports_no_failures() {
        let specs = generic_specs("GeneInfo", "SGD", 100);
        let executed = std::cell::RefCell::new(Vec::new());
        let outcome = execute_plan(
            &specs,
            "file:///import",
            "SGD",
            failing_runner(&executed, &[]),
        )
        .await;

        assert_eq!(outcome.queries_run, 2);
        assert!(outcome.failures.is_empty());
        assert!(!outcome.required_failed);
        assert!(executed.borrow()[0].contains("file:///import/GeneInfo_SGD.csv"));
    }
}
