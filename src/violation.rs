//! Violation Signer + Store (C9) — spec.md §4.8, plus the "Violation
//! export" collaborator interface from spec.md §6: a callback invoked once
//! per emitted violation, isolated from the evaluator via an internal
//! queue with a drop-oldest policy (spec.md §5).

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::SignatureError;
use crate::rule::Severity;
use crate::span::{SpanId, TraceId};

type HmacSha256 = Hmac<Sha256>;

/// `(traceId, spanId, serviceName)` of a span that participated in a
/// detection — spec.md §3 "Violation".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRef {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub trace_ids: Vec<TraceId>,
    pub span_refs: Vec<SpanRef>,
    pub created_at_nanos: u128,
    pub signature: String,
}

/// Byte-stuffed field delimiter — any literal `0x1f`/`0x1c` bytes in a
/// field are escaped by doubling, so the canonical form is unambiguous
/// even for attacker-controlled rule names/messages.
const FIELD_SEP: u8 = 0x1f;
const ESCAPE: u8 = 0x1c;

fn stuff(field: &[u8], out: &mut Vec<u8>) {
    for &byte in field {
        if byte == FIELD_SEP || byte == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(byte);
    }
    out.push(FIELD_SEP);
}

/// Canonical serialization — spec.md §4.8: "`id | ruleId | ruleName |
/// severity | message | trace-ids (sorted) | span-refs (sorted by
/// traceId,spanId) | createdAt (nanoseconds)`".
#[allow(clippy::too_many_arguments)]
fn canonical_bytes(
    id: &str,
    rule_id: &str,
    rule_name: &str,
    severity: Severity,
    message: &str,
    trace_ids: &[TraceId],
    span_refs: &[SpanRef],
    created_at_nanos: u128,
) -> Vec<u8> {
    let mut sorted_trace_ids: Vec<&TraceId> = trace_ids.iter().collect();
    sorted_trace_ids.sort();
    let mut sorted_span_refs: Vec<&SpanRef> = span_refs.iter().collect();
    sorted_span_refs.sort_by(|a, b| (&a.trace_id, &a.span_id).cmp(&(&b.trace_id, &b.span_id)));

    let mut out = Vec::new();
    stuff(id.as_bytes(), &mut out);
    stuff(rule_id.as_bytes(), &mut out);
    stuff(rule_name.as_bytes(), &mut out);
    stuff(format!("{severity:?}").as_bytes(), &mut out);
    stuff(message.as_bytes(), &mut out);
    for trace_id in sorted_trace_ids {
        stuff(&trace_id.0, &mut out);
    }
    out.push(FIELD_SEP);
    for span_ref in sorted_span_refs {
        stuff(&span_ref.trace_id.0, &mut out);
        stuff(&span_ref.span_id.0, &mut out);
        stuff(span_ref.service_name.as_bytes(), &mut out);
    }
    out.push(FIELD_SEP);
    stuff(created_at_nanos.to_string().as_bytes(), &mut out);
    out
}

/// The "Signer capability" the core requires, per spec.md §1: "the core
/// requires only a `Signer` capability" — KMS-backed implementations are an
/// external collaborator's concern, not this crate's. `Engine` takes one as
/// `Arc<dyn Signer>` so a collaborator can supply a KMS-backed signer
/// without this crate depending on any cloud SDK.
pub trait Signer: Send + Sync {
    fn sign(&self, bytes: &[u8]) -> Result<String, SignatureError>;
    fn verify(&self, bytes: &[u8], signature: &str) -> bool;
    fn enabled(&self) -> bool;
}

/// The default, in-process `Signer`: HMAC-SHA256 over a static key. Empty
/// key disables signing — development only, per spec.md §4.8.
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }
}

impl Signer for HmacSigner {
    fn enabled(&self) -> bool {
        !self.key.is_empty()
    }

    fn sign(&self, bytes: &[u8]) -> Result<String, SignatureError> {
        if !self.enabled() {
            return Ok(String::new());
        }
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| SignatureError(e.to_string()))?;
        mac.update(bytes);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, bytes: &[u8], signature: &str) -> bool {
        if !self.enabled() {
            return true;
        }
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(bytes);
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        mac.verify_slice(&expected).is_ok()
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

#[derive(Debug, Default, Clone)]
pub struct ViolationCounters {
    pub signed_total: u64,
    pub dead_lettered_total: u64,
    pub deduplicated_total: u64,
    pub export_dropped_total: u64,
}

/// The exporter channel — spec.md §5: "isolated from the evaluator via an
/// asynchronous channel with drop-oldest policy when full." A plain
/// `tokio::sync::mpsc` can't express drop-oldest (a full bounded channel
/// rejects the *newest* send), so this is a small ring buffer behind a
/// `parking_lot::Mutex` with a `Notify` to wake the draining task —
/// pushing past capacity silently evicts the oldest queued violation.
struct ExportQueue {
    queue: Mutex<VecDeque<Violation>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl ExportQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, violation: Violation) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(violation);
        drop(queue);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Violation> {
        self.queue.lock().pop_front()
    }

    async fn notified(&self) {
        self.notify.notified().await
    }
}

#[derive(Debug, Default, Clone)]
pub struct ViolationFilter {
    pub rule_id: Option<String>,
    pub severity: Option<Severity>,
    pub trace_id: Option<TraceId>,
    pub limit: Option<usize>,
}

/// In-memory store — authoritative during process lifetime per spec.md §6
/// "Persisted state layout": none within the core.
pub struct ViolationStore {
    signer: Arc<dyn Signer>,
    records: Mutex<Vec<Violation>>,
    seen: Mutex<HashSet<(String, String)>>,
    signed_total: AtomicU64,
    dead_lettered_total: AtomicU64,
    deduplicated_total: AtomicU64,
    export_queue: ExportQueue,
}

impl ViolationStore {
    pub fn new(signer: Arc<dyn Signer>, export_queue_capacity: usize) -> Self {
        Self {
            signer,
            records: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
            signed_total: AtomicU64::new(0),
            dead_lettered_total: AtomicU64::new(0),
            deduplicated_total: AtomicU64::new(0),
            export_queue: ExportQueue::new(export_queue_capacity),
        }
    }

    /// Pops the next violation queued for export, if any. Used by the
    /// engine's exporter task; not part of the public Management API.
    pub(crate) fn try_export_pop(&self) -> Option<Violation> {
        self.export_queue.try_pop()
    }

    /// Resolves once a violation has been pushed onto the export queue
    /// since the last call — used by the exporter task to avoid busy-polling.
    pub(crate) async fn export_ready(&self) {
        self.export_queue.notified().await
    }

    /// `recordViolation` — spec.md §4.8. At-most-once per `(ruleId,
    /// traceId)` within process lifetime; returns `None` on a silent
    /// duplicate. Signing failure is fatal for this record (dead-letter
    /// counted, never stored) — spec.md §4.8 "Failure semantics".
    pub fn record_violation(
        &self,
        rule_id: &str,
        rule_name: &str,
        severity: Severity,
        message: String,
        trace_ids: Vec<TraceId>,
        span_refs: Vec<SpanRef>,
    ) -> Option<Violation> {
        // Dedup key uses the first trace id: one violation per rule per
        // trace, and a single evaluator invocation always operates on one
        // trace, so `trace_ids` is a singleton in practice (spec.md §4.6
        // "within a single trace").
        let trace_id = trace_ids.first()?;
        let key = (rule_id.to_string(), trace_id.as_hex());
        {
            let mut seen = self.seen.lock();
            if !seen.insert(key) {
                self.deduplicated_total.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let id = Uuid::new_v4().to_string();
        let created_at_nanos = now_nanos();
        let bytes = canonical_bytes(
            &id,
            rule_id,
            rule_name,
            severity,
            &message,
            &trace_ids,
            &span_refs,
            created_at_nanos,
        );
        let signature = match self.signer.sign(&bytes) {
            Ok(sig) => sig,
            Err(_) => {
                self.dead_lettered_total.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        self.signed_total.fetch_add(1, Ordering::Relaxed);

        let violation = Violation {
            id,
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            severity,
            message,
            trace_ids,
            span_refs,
            created_at_nanos,
            signature,
        };
        self.records.lock().push(violation.clone());
        // Hand off to the exporter channel — spec.md §6 "Violation export":
        // "a callback interface `export(violation)` invoked once per
        // emitted violation", invoked once this record has been signed and
        // stored, never before.
        self.export_queue.push(violation.clone());
        Some(violation)
    }

    pub fn verify(&self, violation: &Violation) -> bool {
        let bytes = canonical_bytes(
            &violation.id,
            &violation.rule_id,
            &violation.rule_name,
            violation.severity,
            &violation.message,
            &violation.trace_ids,
            &violation.span_refs,
            violation.created_at_nanos,
        );
        self.signer.verify(&bytes, &violation.signature)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Violation> {
        self.records.lock().iter().find(|v| v.id == id).cloned()
    }

    /// `query(filters)` — newest-first by `createdAt`, per spec.md §4.8.
    pub fn query(&self, filter: &ViolationFilter) -> Vec<Violation> {
        let mut matches: Vec<Violation> = self
            .records
            .lock()
            .iter()
            .filter(|v| filter.rule_id.as_deref().map_or(true, |id| id == v.rule_id))
            .filter(|v| filter.severity.map_or(true, |s| s == v.severity))
            .filter(|v| {
                filter
                    .trace_id
                    .as_ref()
                    .map_or(true, |t| v.trace_ids.contains(t))
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at_nanos.cmp(&a.created_at_nanos));
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        matches
    }

    pub fn counters(&self) -> ViolationCounters {
        ViolationCounters {
            signed_total: self.signed_total.load(Ordering::Relaxed),
            dead_lettered_total: self.dead_lettered_total.load(Ordering::Relaxed),
            deduplicated_total: self.deduplicated_total.load(Ordering::Relaxed),
            export_dropped_total: self.export_queue.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_id(n: u8) -> TraceId {
        TraceId(vec![n])
    }

    fn store(key: &[u8]) -> ViolationStore {
        ViolationStore::new(Arc::new(HmacSigner::new(key.to_vec())), 16)
    }

    #[test]
    fn signed_violation_verifies_with_the_right_key() {
        let store = store(b"secret");
        let violation = store
            .record_violation(
                "r1",
                "name",
                Severity::High,
                "msg".into(),
                vec![trace_id(1)],
                vec![],
            )
            .unwrap();
        assert!(store.verify(&violation));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let store = store(b"secret");
        let mut violation = store
            .record_violation(
                "r1",
                "name",
                Severity::High,
                "msg".into(),
                vec![trace_id(1)],
                vec![],
            )
            .unwrap();
        violation.message = "tampered".into();
        assert!(!store.verify(&violation));
    }

    #[test]
    fn empty_key_disables_signing() {
        let store = store(&[]);
        let violation = store
            .record_violation(
                "r1",
                "name",
                Severity::Low,
                "msg".into(),
                vec![trace_id(1)],
                vec![],
            )
            .unwrap();
        assert_eq!(violation.signature, "");
        assert!(store.verify(&violation));
    }

    #[test]
    fn duplicate_rule_trace_pair_is_deduplicated() {
        let store = store(&[]);
        let first = store.record_violation(
            "r1",
            "name",
            Severity::Low,
            "msg".into(),
            vec![trace_id(1)],
            vec![],
        );
        let second = store.record_violation(
            "r1",
            "name",
            Severity::Low,
            "msg2".into(),
            vec![trace_id(1)],
            vec![],
        );
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(store.counters().deduplicated_total, 1);
    }

    #[test]
    fn different_trace_same_rule_is_not_deduplicated() {
        let store = store(&[]);
        store.record_violation(
            "r1",
            "name",
            Severity::Low,
            "msg".into(),
            vec![trace_id(1)],
            vec![],
        );
        let second = store.record_violation(
            "r1",
            "name",
            Severity::Low,
            "msg".into(),
            vec![trace_id(2)],
            vec![],
        );
        assert!(second.is_some());
    }

    #[test]
    fn query_orders_newest_first_and_respects_limit() {
        let store = store(&[]);
        store.record_violation("r1", "n", Severity::Low, "a".into(), vec![trace_id(1)], vec![]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.record_violation("r2", "n", Severity::Low, "b".into(), vec![trace_id(2)], vec![]);
        let results = store.query(&ViolationFilter {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, "r2");
    }

    #[test]
    fn recording_a_violation_queues_it_for_export() {
        let store = store(&[]);
        store.record_violation("r1", "n", Severity::Low, "a".into(), vec![trace_id(1)], vec![]);
        let exported = store.try_export_pop().unwrap();
        assert_eq!(exported.rule_id, "r1");
        assert!(store.try_export_pop().is_none());
    }

    #[test]
    fn export_queue_drops_the_oldest_entry_once_full() {
        let queue = ExportQueue::new(2);
        let violation = |rule_id: &str| Violation {
            id: rule_id.to_string(),
            rule_id: rule_id.to_string(),
            rule_name: "n".into(),
            severity: Severity::Low,
            message: "m".into(),
            trace_ids: vec![trace_id(1)],
            span_refs: vec![],
            created_at_nanos: 0,
            signature: String::new(),
        };
        queue.push(violation("a"));
        queue.push(violation("b"));
        queue.push(violation("c"));
        assert_eq!(queue.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(queue.try_pop().unwrap().rule_id, "b");
        assert_eq!(queue.try_pop().unwrap().rule_id, "c");
        assert!(queue.try_pop().is_none());
    }
}
