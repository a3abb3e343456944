//! Biograph: versioned biological dataset loading into a Neo4j property graph
//!
//! This crate implements a staged bulk-load pipeline for heterogeneous,
//! release-versioned datasets (genes, alleles, ontologies, cross references)
//! published per model-organism provider:
//!
//! 1. **Resolve** -- Intersect the run configuration against the release
//!    catalog to decide which dataset/provider combinations actually run
//! 2. **Fetch** -- Download or copy each source artifact into the staging
//!    directory, decompressing gzip payloads, skipping files already present
//! 3. **Extract & Stage** -- Stream records out of each artifact, fan them
//!    out per query group, and write batched CSV staging files
//! 4. **Load** -- Run templated `LOAD CSV` Cypher against Neo4j over Bolt,
//!    in strict per-provider query order
//!
//! # Architecture
//!
//! - **Process isolation** -- Each dataset/provider pair runs in its own OS
//!   process (the binary re-invoked as a worker); a panic or crash in one
//!   never takes down its siblings
//! - **Report files** -- Workers hand results back as JSON report files, so
//!   the coordinator never shares memory with them
//! - **Bounded parallelism** -- A `FuturesUnordered` pool caps concurrent
//!   workers and refills as each one finishes
//! - **Strict load order** -- Within a provider, queries run in declared
//!   order; a required query failure stops that provider's remaining loads
//!
//! # Key Modules
//!
//! - [`run_config`] -- Run configuration parsing with exhaustive validation
//! - [`catalog`] -- Release catalog and taxon-to-provider resolution
//! - [`registry`] -- Intersection of configuration and catalog into runnable
//!   dataset descriptors
//! - [`fetch`] -- Artifact download, copy, and gzip decompression
//! - [`extract`] -- Record extraction with pluggable per-type transforms
//! - [`batch`] -- Fixed-size record batching
//! - [`stage`] -- CSV staging files and per-group record routing
//! - [`load`] -- Cypher templates, rendering, and ordered Bolt execution
//! - [`pipeline`] -- The single-worker fetch/extract/stage/load pass
//! - [`coordinator`] -- Worker process pool with timeouts and report
//!   collection
//! - [`record`] -- Ordered field/value records
//! - [`stats`] -- Per-pass counters carried in worker reports
//! - [`config`] -- Constants for batching, retries, and connections

pub mod batch;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod extract;
pub mod fetch;
pub mod load;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod run_config;
pub mod stage;
pub mod stats;
