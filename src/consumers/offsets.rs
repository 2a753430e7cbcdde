use std::collections::{BTreeMap, HashMap};

/// Tracks per-partition completion of concurrently handled deliveries and
/// yields the highest contiguous completed offset. Offsets are only safe to
/// store once every earlier in-flight delivery on that partition has
/// completed; otherwise a crash could acknowledge past unfinished work.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, BTreeMap<i64, bool>>,
}

impl OffsetTracker {
    pub fn begin(&mut self, partition: i32, offset: i64) {
        self.partitions
            .entry(partition)
            .or_default()
            .insert(offset, false);
    }

    /// Marks a delivery complete. Returns the new committable frontier for the
    /// partition if it advanced.
    pub fn complete(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let pending = self.partitions.get_mut(&partition)?;
        if let Some(done) = pending.get_mut(&offset) {
            *done = true;
        }

        let mut frontier = None;
        while let Some((&oldest, &done)) = pending.iter().next() {
            if !done {
                break;
            }
            pending.remove(&oldest);
            frontier = Some(oldest);
        }
        frontier
    }
}
