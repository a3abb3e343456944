/// Records per staged batch when the configuration does not say otherwise
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Rows per store-side transaction chunk when the configuration does not say otherwise
pub const DEFAULT_COMMIT_SIZE: usize = 10_000;

/// Default Neo4j Bolt endpoint
pub const DEFAULT_BOLT_URI: &str = "bolt://localhost:7687";

/// Default URI prefix the store resolves staged file names against
pub const DEFAULT_IMPORT_PREFIX: &str = "file:///import";

/// Connection attempts before giving up on the store
pub const LOAD_MAX_RETRIES: u32 = 10;

/// Delay between store connection attempts
pub const LOAD_RETRY_DELAY_SECS: u64 = 3;

/// Concurrent sub-descriptor workers per dataset type
pub const MAX_PARALLEL_WORKERS: usize = 4;

/// Extra fetch attempts after a failed artifact download
pub const DOWNLOAD_RETRIES: u32 = 1;
