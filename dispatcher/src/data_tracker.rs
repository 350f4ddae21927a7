use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dispatcher_client::StatusSnapshot;

use crate::checkpoint::{CheckpointData, CheckpointStore};
use crate::config::DispatcherConfig;
use crate::error::DispatcherError;
use crate::input_reader::InputReader;
use crate::output_writer::OutputWriter;

/// Read-only snapshot of the tracker's counters, served over `GET /status`
/// and logged on every checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub in_flight: usize,
    pub pending: usize,
    pub heap_len: usize,
    pub last_processed_id: i64,
    pub expired_reissues: u64,
    pub tombstoned: u64,
}

impl From<Stats> for StatusSnapshot {
    fn from(s: Stats) -> Self {
        StatusSnapshot {
            in_flight: s.in_flight,
            pending: s.pending,
            heap_len: s.heap_len,
            last_processed_id: s.last_processed_id,
            expired_reissues: s.expired_reissues,
            tombstoned: s.tombstoned,
        }
    }
}

struct IssuedEntry {
    content: String,
    input_offset: u64,
    retry_count: u32,
}

struct Inner {
    input: InputReader,
    output: OutputWriter,
    checkpoint: CheckpointStore,

    last_processed_id: i64,
    next_work_id: u64,
    /// Input offset recorded when the line for `last_processed_id` was
    /// issued; this is what the next checkpoint's `input_offset` records.
    last_flushed_input_offset: u64,

    issued: HashMap<u64, IssuedEntry>,
    issued_heap: BinaryHeap<Reverse<(u64, u64)>>,
    pending_write: HashMap<u64, String>,

    last_checkpoint_time: Instant,
    expired_reissues: u64,
    tombstoned: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The durable work dispatcher's core state machine (spec.md §4.1). All
/// mutable state lives behind one mutex; every public operation acquires it
/// on entry and releases it on return, and never awaits while holding it.
pub struct DataTracker {
    config: DispatcherConfig,
    inner: Mutex<Inner>,
}

impl DataTracker {
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatcherError> {
        let mut input = InputReader::open(&config.input_path)?;
        let output = OutputWriter::open(&config.output_path)?;
        let checkpoint = CheckpointStore::new(&config.checkpoint_path);

        let (last_processed_id, last_flushed_input_offset) = match checkpoint.load()? {
            Some(cp) => {
                input.seek_to(cp.input_offset)?;
                let extra_lines = output.read_lines_from(cp.output_offset)?;
                let extra_count = extra_lines.len() as u64;

                let mut consumed = 0u64;
                for _ in 0..extra_count {
                    if input.read_line()?.is_none() {
                        return Err(DispatcherError::Recovery {
                            output_lines: extra_count,
                            input_lines: consumed,
                        });
                    }
                    consumed += 1;
                }

                let last_processed_id = cp.last_processed_work_id + extra_count as i64;
                tracing::info!(
                    last_processed_id,
                    input_offset = input.position(),
                    output_offset = output.byte_len(),
                    extra_lines_recovered = extra_count,
                    "loaded checkpoint"
                );
                (last_processed_id, input.position())
            }
            None => {
                tracing::info!("no checkpoint found; starting fresh");
                (-1, 0)
            }
        };

        let next_work_id = (last_processed_id + 1) as u64;

        let inner = Inner {
            input,
            output,
            checkpoint,
            last_processed_id,
            next_work_id,
            last_flushed_input_offset,
            issued: HashMap::new(),
            issued_heap: BinaryHeap::new(),
            pending_write: HashMap::new(),
            last_checkpoint_time: Instant::now(),
            expired_reissues: 0,
            tombstoned: 0,
        };

        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Returns up to `batch_size` `(work_id, content)` pairs, prioritising
    /// expired reissues over fresh reads (spec.md §4.1.3). `None` means no
    /// work is available right now.
    pub fn get_work_batch(
        &self,
        batch_size: usize,
    ) -> Result<Option<Vec<(u64, String)>>, DispatcherError> {
        let mut guard = self.inner.lock().expect("data tracker mutex poisoned");
        let now = now_secs();
        let mut batch = Vec::with_capacity(batch_size);

        // Reissue pass: drain expired entries older than `work_timeout`,
        // in heap order, with lazy deletion of stale entries.
        while batch.len() < batch_size {
            let Some(&Reverse((heap_ts, work_id))) = guard.issued_heap.peek() else {
                break;
            };

            let stale = !guard.issued.contains_key(&work_id) || guard.pending_write.contains_key(&work_id);
            if stale {
                guard.issued_heap.pop();
                continue;
            }

            if now.saturating_sub(heap_ts) <= self.config.work_timeout.as_secs() {
                // Oldest live entry hasn't expired; nothing later has either.
                break;
            }

            guard.issued_heap.pop();
            let (content, retry_count) = {
                let entry = guard.issued.get(&work_id).expect("checked live above");
                (entry.content.clone(), entry.retry_count)
            };

            if self.config.max_retries >= 0 && retry_count as i64 >= self.config.max_retries {
                guard.tombstoned += 1;
                tracing::warn!(
                    work_id,
                    retry_count,
                    max_retries = self.config.max_retries,
                    "max_retries exceeded; writing tombstone"
                );
                let tombstone = serde_json::json!({
                    "__ERROR__": {
                        "error": "max_retries_exceeded",
                        "work_id": work_id,
                        "original_content": content.trim(),
                    }
                });
                let line = serde_json::to_string(&tombstone).expect("tombstone always serializes");
                self.complete_batch_locked(&mut guard, vec![(work_id, line)])?;
                continue;
            }

            guard.expired_reissues += 1;
            tracing::info!(
                work_id,
                expired_reissues = guard.expired_reissues,
                "reissuing after expiration"
            );
            if let Some(entry) = guard.issued.get_mut(&work_id) {
                entry.retry_count += 1;
            }
            guard.issued_heap.push(Reverse((now, work_id)));
            batch.push((work_id, content));
        }

        // Fresh-read pass: strict work_id order, strictly monotonic allocation.
        while batch.len() < batch_size {
            match guard.input.read_line()? {
                None => break,
                Some((content, input_offset)) => {
                    let work_id = guard.next_work_id;
                    guard.next_work_id += 1;
                    guard.issued.insert(
                        work_id,
                        IssuedEntry {
                            content: content.clone(),
                            input_offset,
                            retry_count: 0,
                        },
                    );
                    guard.issued_heap.push(Reverse((now, work_id)));
                    batch.push((work_id, content));
                }
            }
        }

        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }

    /// Records results for a batch of completed work, then runs the
    /// prefix-flush and (if due) checkpoint procedures (spec.md §4.1.4).
    pub fn complete_work_batch(&self, batch: Vec<(u64, String)>) -> Result<(), DispatcherError> {
        let mut guard = self.inner.lock().expect("data tracker mutex poisoned");
        self.complete_batch_locked(&mut guard, batch)
    }

    fn complete_batch_locked(
        &self,
        inner: &mut Inner,
        batch: Vec<(u64, String)>,
    ) -> Result<(), DispatcherError> {
        for (work_id, result) in batch {
            let is_duplicate =
                work_id as i64 <= inner.last_processed_id || inner.pending_write.contains_key(&work_id);
            if is_duplicate {
                tracing::warn!(work_id, "duplicate completion; discarding");
            } else if !inner.issued.contains_key(&work_id) {
                tracing::warn!(work_id, "completion for unissued work_id; discarding");
            } else {
                inner.pending_write.insert(work_id, result);
            }
        }

        self.flush_pending_locked(inner)?;

        let now = Instant::now();
        if now.duration_since(inner.last_checkpoint_time) >= self.config.checkpoint_interval {
            self.checkpoint_locked(inner)?;
            inner.last_checkpoint_time = now;
        }

        Ok(())
    }

    fn flush_pending_locked(&self, inner: &mut Inner) -> Result<(), DispatcherError> {
        let mut buffer = Vec::new();
        let mut next_id = inner.last_processed_id + 1;

        while let Some(result) = inner.pending_write.remove(&(next_id as u64)) {
            inner.last_processed_id = next_id;
            let entry = inner
                .issued
                .remove(&(next_id as u64))
                .expect("pending entry must still be issued (invariant 3)");
            inner.last_flushed_input_offset = entry.input_offset;

            buffer.extend_from_slice(result.as_bytes());
            buffer.push(b'\n');
            next_id += 1;
        }

        if !buffer.is_empty() {
            inner.output.append(&buffer)?;
        }
        Ok(())
    }

    fn checkpoint_locked(&self, inner: &mut Inner) -> Result<(), DispatcherError> {
        let data = CheckpointData {
            last_processed_work_id: inner.last_processed_id,
            input_offset: inner.last_flushed_input_offset,
            output_offset: inner.output.byte_len(),
        };
        inner.checkpoint.save(&data)?;
        tracing::info!(
            last_processed_id = data.last_processed_work_id,
            input_offset = data.input_offset,
            output_offset = data.output_offset,
            issued = inner.issued.len(),
            pending = inner.pending_write.len(),
            heap_size = inner.issued_heap.len(),
            expired_reissues = inner.expired_reissues,
            "checkpoint written"
        );
        Ok(())
    }

    /// True iff the input is exhausted, nothing is waiting to be flushed,
    /// and nothing remains in flight. SPEC_FULL.md §9 resolves the source's
    /// open question in favor of this stricter condition: a caller must
    /// never be told shutdown is safe while work is still outstanding.
    pub fn all_work_complete(&self) -> Result<bool, DispatcherError> {
        let guard = self.inner.lock().expect("data tracker mutex poisoned");
        Ok(guard.input.remaining_bytes() == 0
            && guard.pending_write.is_empty()
            && guard.issued.is_empty())
    }

    pub fn stats(&self) -> Stats {
        let guard = self.inner.lock().expect("data tracker mutex poisoned");
        Stats {
            in_flight: guard.issued.len(),
            pending: guard.pending_write.len(),
            heap_len: guard.issued_heap.len(),
            last_processed_id: guard.last_processed_id,
            expired_reissues: guard.expired_reissues,
            tombstoned: guard.tombstoned,
        }
    }

    /// Writes a final checkpoint unconditionally. In-flight items are left
    /// recorded only via the checkpoint's `input_offset`: on the next
    /// startup they are simply re-read from the input, since the
    /// checkpoint reflects only the contiguous-written prefix.
    pub fn close(&self) -> Result<(), DispatcherError> {
        let mut guard = self.inner.lock().expect("data tracker mutex poisoned");
        self.checkpoint_locked(&mut guard)?;
        tracing::info!(
            last_processed_id = guard.last_processed_id,
            issued = guard.issued.len(),
            pending = guard.pending_write.len(),
            heap_size = guard.issued_heap.len(),
            expired_reissues = guard.expired_reissues,
            "final checkpoint written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(dir: &std::path::Path, work_timeout_secs: u64, max_retries: i64) -> DispatcherConfig {
        DispatcherConfig {
            input_path: dir.join("in.jsonl"),
            output_path: dir.join("out.jsonl"),
            checkpoint_path: dir.join("cp.json"),
            work_timeout: Duration::from_secs(work_timeout_secs),
            checkpoint_interval: Duration::from_secs(3600),
            max_retries,
            bind_addr: "127.0.0.1:0".into(),
        }
    }

    fn tracker_with_input(contents: &str, work_timeout_secs: u64, max_retries: i64) -> (tempfile::TempDir, DataTracker) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.jsonl"), contents).unwrap();
        let cfg = config(dir.path(), work_timeout_secs, max_retries);
        let tracker = DataTracker::new(cfg).unwrap();
        (dir, tracker)
    }

    #[test]
    fn happy_path_preserves_input_order() {
        let (dir, tracker) = tracker_with_input("a\nb\nc\n", 900, 3);

        let batch = tracker.get_work_batch(3).unwrap().unwrap();
        assert_eq!(
            batch,
            vec![(0, "a".to_string()), (1, "b".to_string()), (2, "c".to_string())]
        );

        tracker
            .complete_work_batch(vec![(0, "A".to_string()), (1, "B".to_string()), (2, "C".to_string())])
            .unwrap();

        let output = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert_eq!(output, "A\nB\nC\n");
        assert_eq!(tracker.stats().last_processed_id, 2);
    }

    #[test]
    fn out_of_order_completion_still_writes_in_input_order() {
        let (dir, tracker) = tracker_with_input("x\ny\nz\n", 900, 3);
        tracker.get_work_batch(3).unwrap().unwrap();

        tracker.complete_work_batch(vec![(2, "Z".to_string())]).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap(), "");

        tracker.complete_work_batch(vec![(0, "X".to_string())]).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap(), "X\n");

        tracker.complete_work_batch(vec![(1, "Y".to_string())]).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap(),
            "X\nY\nZ\n"
        );
    }

    #[test]
    fn duplicate_completion_is_idempotent() {
        let (dir, tracker) = tracker_with_input("p\n", 900, 3);
        tracker.get_work_batch(1).unwrap().unwrap();

        tracker.complete_work_batch(vec![(0, "P".to_string())]).unwrap();
        tracker.complete_work_batch(vec![(0, "P".to_string())]).unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap(), "P\n");
    }

    #[test]
    fn completion_for_unissued_id_is_discarded() {
        let (dir, tracker) = tracker_with_input("p\n", 900, 3);
        tracker.complete_work_batch(vec![(99, "nope".to_string())]).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap(), "");
    }

    #[test]
    fn max_retries_exceeded_produces_a_tombstone_and_unblocks_successors() {
        let (dir, tracker) = tracker_with_input("bad\ngood\n", 0, 2);

        // First issue of id 0, then two reissues (retry_count 1, 2), then a
        // third pop observes retry_count == max_retries and tombstones it.
        for _ in 0..3 {
            tracker.get_work_batch(1).unwrap();
        }

        let batch = tracker.get_work_batch(1).unwrap().unwrap();
        assert_eq!(batch, vec![(1, "good".to_string())]);
        tracker.complete_work_batch(vec![(1, "GOOD".to_string())]).unwrap();

        let output = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        let mut lines = output.lines();
        let tombstone: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(tombstone["__ERROR__"]["error"], "max_retries_exceeded");
        assert_eq!(tombstone["__ERROR__"]["work_id"], 0);
        assert_eq!(lines.next().unwrap(), "GOOD");
        assert_eq!(tracker.stats().last_processed_id, 1);
        assert_eq!(tracker.stats().tombstoned, 1);
    }

    #[test]
    fn timeout_reissue_recovers_without_tombstoning() {
        let (dir, tracker) = tracker_with_input("m\n", 0, -1);
        tracker.get_work_batch(1).unwrap().unwrap(); // worker A pulls id 0, never returns

        let batch = tracker.get_work_batch(1).unwrap().unwrap(); // worker B
        assert_eq!(batch, vec![(0, "m".to_string())]);

        tracker.complete_work_batch(vec![(0, "M".to_string())]).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap(), "M\n");
        assert_eq!(tracker.stats().expired_reissues, 1);
        assert_eq!(tracker.stats().tombstoned, 0);
    }

    #[test]
    fn crash_and_restart_resumes_from_checkpoint_and_output_length() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.jsonl"), "1\n2\n3\n4\n5\n").unwrap();

        {
            let cfg = config(dir.path(), 900, 3);
            let tracker = DataTracker::new(cfg).unwrap();
            let batch = tracker.get_work_batch(5).unwrap().unwrap();
            assert_eq!(batch.len(), 5);
            // ids 0,1,2 complete; output has 3 lines, no checkpoint written yet
            // (checkpoint_interval is large in this config).
            tracker
                .complete_work_batch(vec![
                    (0, "ONE".to_string()),
                    (1, "TWO".to_string()),
                    (2, "THREE".to_string()),
                ])
                .unwrap();
            // process "crashes": drop without calling close()
        }

        let cfg = config(dir.path(), 900, 3);
        let tracker = DataTracker::new(cfg).unwrap();
        assert_eq!(tracker.stats().last_processed_id, 2);

        let batch = tracker.get_work_batch(2).unwrap().unwrap();
        assert_eq!(batch, vec![(3, "4".to_string()), (4, "5".to_string())]);
        tracker
            .complete_work_batch(vec![(3, "FOUR".to_string()), (4, "FIVE".to_string())])
            .unwrap();

        let output = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert_eq!(output, "ONE\nTWO\nTHREE\nFOUR\nFIVE\n");
    }

    #[test]
    fn all_work_complete_requires_no_in_flight_items() {
        let (_dir, tracker) = tracker_with_input("a\n", 900, 3);
        let batch = tracker.get_work_batch(1).unwrap().unwrap();
        assert!(!tracker.all_work_complete().unwrap());
        tracker
            .complete_work_batch(vec![(batch[0].0, "A".to_string())])
            .unwrap();
        assert!(tracker.all_work_complete().unwrap());
    }
}
