use crate::record::Record;

/// Push-based accumulator that groups records into batches of at most
/// `batch_size`. A batch size of 0 means "one batch containing everything",
/// trading the memory bound for a guaranteed single commit. At most one
/// in-flight batch is held in memory.
#[derive(Debug)]
pub struct BatchBuffer {
    batch_size: usize,
    pending: Vec<Record>,
    emitted: u64,
}

impl BatchBuffer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            pending: Vec::new(),
            emitted: 0,
        }
    }

    /// Accepts one record; returns a full batch when the size threshold is
    /// reached, preserving input order.
    pub fn push(&mut self, record: Record) -> Option<Vec<Record>> {
        self.pending.push(record);
        if self.batch_size > 0 && self.pending.len() >= self.batch_size {
            self.emitted += 1;
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Emits the final partial batch, if any. Call once at end of input.
    pub fn flush(&mut self) -> Option<Vec<Record>> {
        if self.pending.is_empty() {
            None
        } else {
            self.emitted += 1;
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn batches_emitted(&self) -> u64 {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut r = Record::new();
                r.set("primaryKey", format!("ID:{i}"));
                r
            })
            .collect()
    }

    fn drain(input: Vec<Record>, batch_size: usize) -> Vec<Vec<Record>> {
        let mut buffer = BatchBuffer::new(batch_size);
        let mut batches = Vec::new();
        for record in input {
            if let Some(batch) = buffer.push(record) {
                batches.push(batch);
            }
        }
        if let Some(batch) = buffer.flush() {
            batches.push(batch);
        }
        batches
    }

    #[test]
    fn emits_ceil_n_over_b_batches() {
        let batches = drain(records(5), 2);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn exact_multiple_has_no_trailing_partial() {
        let batches = drain(records(6), 3);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3]);
    }

    #[test]
    fn concatenation_reproduces_input_order() {
        let input = records(17);
        let batches = drain(input.clone(), 4);
        let concatenated: Vec<Record> = batches.into_iter().flatten().collect();
        assert_eq!(concatenated, input);
    }

    #[test]
    fn zero_batch_size_means_single_batch() {
        let batches = drain(records(5), 0);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 5);
    }

    #[test]
    fn empty_sequence_emits_nothing() {
        assert!(drain(records(0), 3).is_empty());

        let mut buffer = BatchBuffer::new(3);
        assert!(buffer.flush().is_none());
        assert_eq!(buffer.batches_emitted(), 0);
    }

    #[test]
    fn buffer_counts_batches() {
        let mut buffer = BatchBuffer::new(2);
        for record in records(5) {
            buffer.push(record);
        }
        assert!(buffer.flush().is_some());
        assert_eq!(buffer.batches_emitted(), 3);
    }
}
