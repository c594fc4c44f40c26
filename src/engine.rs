//! Engine facade (C11, SPEC_FULL §4.9) — the single owning entry point
//! that wires the Trace Buffer (C5), Rule Registry (C7), Evaluator pool
//! (C8), and Violation Store (C9) from a [`Configuration`], and exposes
//! spec.md §6's Management API as inherent methods.
//!
//! Grounded in the teacher's `Config`/`run` split (`lib.rs::run`): the
//! teacher resolves a `Config` into `ResolvedRule`s and drives a single
//! `run` function over a batch of files. `Engine` generalizes that split
//! into a long-lived, concurrently-mutable service that drives a
//! completion-scanner task and an evaluator worker pool instead of one
//! synchronous pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::buffer::{BufferConfig, TraceBuffer};
use crate::config::Configuration;
use crate::error::{EngineError, IngestError};
use crate::evaluator::Evaluator;
use crate::registry::RuleRegistry;
use crate::rule::{Rule, RuleSummary, Severity};
use crate::span::Span;
use crate::violation::{Signer, Violation, ViolationCounters, ViolationFilter, ViolationStore};

/// Owns C5–C9 for the duration of the process (or until [`Engine::shutdown`]
/// is called). Construction spawns the completion scanner, evaluator
/// workers, and the exporter task as tasks on the ambient tokio runtime —
/// callers are expected to construct an `Engine` from inside a
/// `#[tokio::main]`/`Runtime::block_on` context, matching the teacher's own
/// `tokio`-backed LSP server setup.
pub struct Engine {
    buffer: Arc<TraceBuffer>,
    registry: Arc<RuleRegistry>,
    evaluator: Evaluator,
    store: Arc<ViolationStore>,
    cancellation: CancellationToken,
    scanner_handle: JoinHandle<()>,
    exporter_handle: JoinHandle<()>,
    shutdown_grace_period: Duration,
}

impl Engine {
    /// Construction takes a `Configuration`, the "Signer capability" spec.md
    /// §1 says the core requires (a collaborator can supply a KMS-backed
    /// implementation instead of the bundled [`crate::violation::HmacSigner`]),
    /// and the "Violation export" collaborator callback from spec.md §6,
    /// invoked once per emitted violation via the exporter task.
    pub fn new(
        config: Configuration,
        signer: Arc<dyn Signer>,
        export: impl Fn(&Violation) + Send + Sync + 'static,
    ) -> Self {
        let cancellation = CancellationToken::new();
        let registry = Arc::new(RuleRegistry::new(config.validator_limits()));
        let store = Arc::new(ViolationStore::new(signer, config.export_queue_capacity));
        let buffer = Arc::new(TraceBuffer::new(BufferConfig {
            quiet_interval: config.quiet_interval,
            hard_trace_ttl: config.hard_trace_ttl,
            scan_interval: config.buffer_scan_interval,
            shards: config.trace_buffer_shards,
        }));
        let evaluator = Evaluator::spawn(
            config.evaluator_workers,
            config.evaluator_queue_depth,
            registry.clone(),
            store.clone(),
            cancellation.clone(),
        );
        let scanner_handle = spawn_scanner(buffer.clone(), evaluator.clone(), cancellation.clone());
        let exporter_handle = spawn_exporter(store.clone(), Arc::new(export), cancellation.clone());
        Self {
            buffer,
            registry,
            evaluator,
            store,
            cancellation,
            scanner_handle,
            exporter_handle,
            shutdown_grace_period: config.shutdown_grace_period,
        }
    }

    fn require_not_canceled(&self) -> Result<(), EngineError> {
        if self.cancellation.is_cancelled() {
            return Err(EngineError::Canceled);
        }
        Ok(())
    }

    /// `acceptSpan` — spec.md §6. Rejects new spans once [`Engine::shutdown`]
    /// has been triggered, rather than silently accepting work a trace may
    /// never get evaluated for.
    #[instrument(skip(self, span), fields(trace_id = %span.trace_id.as_hex()))]
    pub fn accept_span(&self, span: Span) -> Result<(), IngestError> {
        if self.cancellation.is_cancelled() {
            return Err(IngestError::Rejected("engine is shutting down".into()));
        }
        self.buffer.accept_span(span)
    }

    pub fn create_rule(
        &self,
        name: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
    ) -> Result<String, EngineError> {
        self.require_not_canceled()?;
        self.registry.create_rule(name, source, severity)
    }

    pub fn update_rule(
        &self,
        id: &str,
        source: impl Into<String>,
        severity: Severity,
    ) -> Result<(), EngineError> {
        self.require_not_canceled()?;
        self.registry.update_rule(id, source, severity)
    }

    pub fn enable_rule(&self, id: &str) -> Result<(), EngineError> {
        self.require_not_canceled()?;
        self.registry.enable_rule(id)
    }

    pub fn disable_rule(&self, id: &str) -> Result<(), EngineError> {
        self.require_not_canceled()?;
        self.registry.disable_rule(id)
    }

    pub fn delete_rule(&self, id: &str) -> Result<(), EngineError> {
        self.require_not_canceled()?;
        self.registry.delete_rule(id)
    }

    pub fn list_rules(&self) -> Vec<RuleSummary> {
        self.registry.list_rules()
    }

    pub fn get_rule(&self, id: &str) -> Option<Rule> {
        self.registry.get_rule(id)
    }

    pub fn query_violations(&self, filter: &ViolationFilter) -> Vec<Violation> {
        self.store.query(filter)
    }

    pub fn get_violation(&self, id: &str) -> Option<Violation> {
        self.store.get_by_id(id)
    }

    pub fn violation_counters(&self) -> ViolationCounters {
        self.store.counters()
    }

    pub fn open_trace_count(&self) -> usize {
        self.buffer.open_trace_count()
    }

    /// Cooperative shutdown — spec.md §5: "the buffer force-closes open
    /// traces, the evaluator pool drains its queue (bounded grace period,
    /// default 10s), and the exporter flushes." Scanner, evaluator, and
    /// exporter tasks all observe the same [`CancellationToken`]; this waits
    /// up to `shutdown_grace_period` for the scanner and exporter tasks to
    /// notice and exit. Takes `self` by value — there is nothing left to
    /// call on an `Engine` once its background tasks have been told to stop.
    #[instrument(skip(self))]
    pub async fn shutdown(self) {
        self.cancellation.cancel();
        let _ = tokio::time::timeout(self.shutdown_grace_period, async {
            let _ = tokio::join!(self.scanner_handle, self.exporter_handle);
        })
        .await;
        info!("engine shutdown complete");
    }
}

/// The completion-scanner task — spec.md §4.5: "A single background task
/// scans the map at a configurable tick... and promotes traces whose
/// `now − last-arrival ≥ quietInterval`." Each ready trace is handed to the
/// evaluator pool's bounded queue (spec.md §4.6's backpressure: "when full,
/// the buffer blocks the completion scan").
fn spawn_scanner(
    buffer: Arc<TraceBuffer>,
    evaluator: Evaluator,
    cancellation: CancellationToken,
) -> JoinHandle<()> {
    let scan_interval = buffer.scan_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    drain_on_shutdown(&buffer, &evaluator).await;
                    break;
                }
                _ = ticker.tick() => {
                    run_scan_tick(&buffer, &evaluator).await;
                }
            }
        }
    })
}

/// The exporter task — spec.md §6 "Violation export": "a callback
/// interface `export(violation)` invoked once per emitted violation."
/// Drains [`ViolationStore`]'s export queue and invokes the
/// collaborator-supplied callback for each entry; on cancellation it drains
/// whatever remains once more before exiting (spec.md §5 "the exporter
/// flushes").
fn spawn_exporter(
    store: Arc<ViolationStore>,
    export: Arc<dyn Fn(&Violation) + Send + Sync>,
    cancellation: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    drain_exports(&store, &export);
                    break;
                }
                _ = store.export_ready() => {
                    drain_exports(&store, &export);
                }
            }
        }
    })
}

fn drain_exports(store: &ViolationStore, export: &(dyn Fn(&Violation) + Send + Sync)) {
    while let Some(violation) = store.try_export_pop() {
        export(&violation);
    }
}

async fn run_scan_tick(buffer: &Arc<TraceBuffer>, evaluator: &Evaluator) {
    let ready = buffer.scan_once(Instant::now());
    for ready_trace in ready {
        if !buffer.begin_evaluation(&ready_trace.trace_id) {
            continue;
        }
        if ready_trace.trace.force_closed {
            warn!(trace_id = %ready_trace.trace_id.as_hex(), "trace force-closed at hard TTL");
        }
        let trace_id = ready_trace.trace_id.clone();
        if evaluator.submit(ready_trace.trace).await.is_err() {
            warn!(trace_id = %trace_id.as_hex(), "evaluator queue closed, dropping trace");
        }
        buffer.finish(&trace_id);
    }
}

/// On shutdown, force-close every still-open trace and push it through
/// evaluation once rather than discarding partial traces silently — spec.md
/// §5 "On shutdown, the buffer force-closes open traces."
async fn drain_on_shutdown(buffer: &Arc<TraceBuffer>, evaluator: &Evaluator) {
    // `scan_once` with a future `now` forces every still-`Open` trace past
    // its quiet interval and hard TTL, which is exactly a force-close.
    let far_future = Instant::now() + Duration::from_secs(3600);
    let ready = buffer.scan_once(far_future);
    for ready_trace in ready {
        if !buffer.begin_evaluation(&ready_trace.trace_id) {
            continue;
        }
        let trace_id = ready_trace.trace_id.clone();
        let _ = evaluator.submit(ready_trace.trace).await;
        buffer.finish(&trace_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanBuilder, SpanId, Timestamp, TraceId};
    use crate::violation::HmacSigner;

    fn test_config() -> Configuration {
        Configuration {
            quiet_interval: Duration::from_millis(20),
            buffer_scan_interval: Duration::from_millis(5),
            ..Configuration::default()
        }
    }

    fn test_engine() -> Engine {
        Engine::new(test_config(), Arc::new(HmacSigner::new(Vec::new())), |_: &Violation| {})
    }

    #[tokio::test]
    async fn end_to_end_payment_without_fraud_check_is_a_violation() {
        let engine = test_engine();
        engine
            .create_rule("r1", "when { payment } always { fraud_check }", Severity::High)
            .unwrap();

        let trace_id = TraceId(vec![1]);
        engine
            .accept_span(
                SpanBuilder::new(trace_id.clone(), SpanId(vec![1]), "svc", "payment", Timestamp(0))
                    .end(Timestamp(10))
                    .build(),
            )
            .unwrap();
        engine
            .accept_span(
                SpanBuilder::new(trace_id, SpanId(vec![2]), "svc", "logging", Timestamp(5))
                    .end(Timestamp(15))
                    .build(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let violations = engine.query_violations(&ViolationFilter::default());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].message, "always clause violated");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn span_arriving_after_close_is_rejected() {
        let engine = test_engine();
        let trace_id = TraceId(vec![1]);
        engine
            .accept_span(
                SpanBuilder::new(trace_id.clone(), SpanId(vec![1]), "svc", "a", Timestamp(0))
                    .end(Timestamp(1))
                    .build(),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let late = engine.accept_span(
            SpanBuilder::new(trace_id, SpanId(vec![2]), "svc", "b", Timestamp(200))
                .end(Timestamp(201))
                .build(),
        );
        assert_eq!(late, Err(IngestError::TraceClosed));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_rule_does_not_participate_in_new_evaluations() {
        let engine = test_engine();
        let id = engine
            .create_rule("r1", "when { payment } always { fraud_check }", Severity::Low)
            .unwrap();
        engine.disable_rule(&id).unwrap();

        let trace_id = TraceId(vec![1]);
        engine
            .accept_span(
                SpanBuilder::new(trace_id, SpanId(vec![1]), "svc", "payment", Timestamp(0))
                    .end(Timestamp(1))
                    .build(),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(engine.query_violations(&ViolationFilter::default()).is_empty());
        engine.shutdown().await;
    }
}
