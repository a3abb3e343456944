use serde::{Deserialize, Serialize};

/// Counters for one sub-descriptor's Extract -> Batch -> Stage -> Load pass.
/// A worker is single-threaded by design, so plain fields suffice; the
/// struct rides along in the worker report.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PassStats {
    pub records_extracted: u64,
    pub records_dropped: u64,
    pub rows_staged: u64,
    pub batches_emitted: u64,
    pub queries_run: u64,
    pub queries_failed: u64,
}

impl PassStats {
    pub fn merge(&mut self, other: &PassStats) {
        self.records_extracted += other.records_extracted;
        self.records_dropped += other.records_dropped;
        self.rows_staged += other.rows_staged;
        self.batches_emitted += other.batches_emitted;
        self.queries_run += other.queries_run;
        self.queries_failed += other.queries_failed;
    }
}
