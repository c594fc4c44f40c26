//! Trace Buffer — spec.md §4.5 (C5).
//!
//! Groups incoming spans by trace id, detects completion, and hands each
//! completed trace to a caller (the Evaluator, C8) exactly once. Sharded by
//! `trace id mod shards` per spec.md §5, each shard a `DashMap` whose values
//! are `parking_lot::Mutex`-guarded entries: the map gives lock-free shard
//! lookup, the per-entry mutex gives the per-trace lock the FSM needs.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::IngestError;
use crate::span::{Span, TraceId};
use crate::trace::Trace;
use crate::trace_fsm::{TraceFsm, TraceState};

#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Time without new spans before a trace is complete. Default 5s.
    pub quiet_interval: Duration,
    /// Ceiling from first span to force-close. Default 60s.
    pub hard_trace_ttl: Duration,
    /// How often the background scan runs. Default 1s.
    pub scan_interval: Duration,
    /// Shard count, should be a power of two. Default 16.
    pub shards: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_secs(5),
            hard_trace_ttl: Duration::from_secs(60),
            scan_interval: Duration::from_secs(1),
            shards: 16,
        }
    }
}

struct Entry {
    fsm: TraceFsm,
    trace: Trace,
    first_arrival: Instant,
    last_arrival: Instant,
}

impl Entry {
    fn new(trace_id: TraceId, now: Instant) -> Self {
        Self {
            fsm: TraceFsm::default(),
            trace: Trace::new(trace_id),
            first_arrival: now,
            last_arrival: now,
        }
    }
}

/// A trace that has quiesced (or hit its hard TTL) and is ready for
/// evaluation. Removing it from the map is the caller's job, via
/// [`TraceBuffer::finish`], once evaluation completes.
pub struct ReadyTrace {
    pub trace_id: TraceId,
    pub trace: Trace,
    pub force_closed: bool,
}

pub struct TraceBuffer {
    shards: Vec<DashMap<TraceId, Mutex<Entry>>>,
    config: BufferConfig,
}

impl TraceBuffer {
    pub fn new(config: BufferConfig) -> Self {
        let shards = (0..config.shards.max(1)).map(|_| DashMap::new()).collect();
        Self { shards, config }
    }

    fn shard_for(&self, trace_id: &TraceId) -> &DashMap<TraceId, Mutex<Entry>> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        trace_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// `acceptSpan` — spec.md §6. Rejects with [`IngestError::TraceClosed`]
    /// once the trace has left `Open`; the receiver decides whether to drop
    /// or log (spec.md §4.5). Rejects with [`IngestError::Rejected`] for a
    /// span this buffer can never shard or group, independent of any
    /// trace's lifecycle.
    #[tracing::instrument(skip(self, span), fields(trace_id = %span.trace_id.as_hex()))]
    pub fn accept_span(&self, span: Span) -> Result<(), IngestError> {
        if span.trace_id.0.is_empty() {
            return Err(IngestError::Rejected("span has an empty trace id".into()));
        }
        let now = Instant::now();
        let shard = self.shard_for(&span.trace_id);
        let entry_lock = shard
            .entry(span.trace_id.clone())
            .or_insert_with(|| Mutex::new(Entry::new(span.trace_id.clone(), now)));
        let mut entry = entry_lock.lock();
        entry.fsm.add_span()?;
        entry.trace.push(span);
        entry.last_arrival = now;
        Ok(())
    }

    /// One tick of the background completion scan (spec.md §4.5: "A single
    /// background task scans the map at a configurable tick... and
    /// promotes traces whose `now − last-arrival ≥ quietInterval`").
    /// Returns every trace that quiesced or hit `hardTraceTTL` this tick,
    /// each already transitioned past `Open` so no further span can land
    /// on it.
    pub fn scan_once(&self, now: Instant) -> Vec<ReadyTrace> {
        let mut ready = Vec::new();
        for shard in &self.shards {
            for entry_ref in shard.iter() {
                let mut entry = entry_ref.value().lock();
                if entry.fsm.state() != TraceState::Open {
                    continue;
                }
                let quiesced = now.duration_since(entry.last_arrival) >= self.config.quiet_interval;
                let expired = now.duration_since(entry.first_arrival) >= self.config.hard_trace_ttl;
                if !quiesced && !expired {
                    continue;
                }
                entry.fsm.close();
                entry.trace.recompute_dangling_parents();
                entry.trace.force_closed = expired && !quiesced;
                ready.push(ReadyTrace {
                    trace_id: entry_ref.key().clone(),
                    trace: entry.trace.clone(),
                    force_closed: entry.trace.force_closed,
                });
            }
        }
        ready
    }

    /// `StartEvaluation` — transitions a ready trace into `Evaluating` so a
    /// concurrently-racing scan tick cannot hand it out twice. Returns
    /// `false` if the trace isn't in `Complete` (already claimed, or
    /// unknown).
    pub fn begin_evaluation(&self, trace_id: &TraceId) -> bool {
        let shard = self.shard_for(trace_id);
        let Some(entry_lock) = shard.get(trace_id) else {
            return false;
        };
        let mut entry = entry_lock.lock();
        entry.fsm.start_evaluation().is_ok()
    }

    /// Evaluation finished (spec.md §4.5 "Failure semantics": this happens
    /// whether or not the evaluator callback errored). Removes the entry
    /// from the buffer; the FSM's `Done` state is terminal.
    pub fn finish(&self, trace_id: &TraceId) {
        let shard = self.shard_for(trace_id);
        if let Some((_, entry_lock)) = shard.remove(trace_id) {
            entry_lock.lock().fsm.finish();
        }
    }

    pub fn open_trace_count(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn scan_interval(&self) -> Duration {
        self.config.scan_interval
    }
}
