//! Engine configuration — spec.md §6 "Configuration (enumerated)".
//!
//! Mirrors the teacher's `Config`/`ConfigBuilder` split (`derive_builder`
//! over a plain struct, with `Default` impls for every optional field) and
//! its YAML-loadable config file, generalized from tree-sitter-lint's rule
//! severity table to this crate's quiet-interval/worker-pool/validator
//! knobs.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::dsl::ValidatorLimits;

/// Every configuration key enumerated in spec.md §6, with the spec's
/// defaults as `Default` values.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct Configuration {
    /// Time without new spans before a trace is complete. Default 5s.
    #[builder(default = "Duration::from_secs(5)")]
    pub quiet_interval: Duration,
    /// Ceiling from first span to force-close. Default 60s.
    #[builder(default = "Duration::from_secs(60)")]
    pub hard_trace_ttl: Duration,
    /// How often the completion scan runs. Default 1s.
    #[builder(default = "Duration::from_secs(1)")]
    pub buffer_scan_interval: Duration,
    /// Evaluator worker pool size. Default = CPU count.
    #[builder(default = "default_evaluator_workers()")]
    pub evaluator_workers: usize,
    /// Evaluator bounded queue depth. Default 1024.
    #[builder(default = "1024")]
    pub evaluator_queue_depth: usize,
    /// Maximum rule source length in bytes. Default 16 KiB.
    #[builder(default = "16 * 1024")]
    pub max_rule_source_bytes: usize,
    /// Maximum condition-tree nesting depth. Default 16.
    #[builder(default = "16")]
    pub max_rule_depth: usize,
    /// Maximum span checks per rule. Default 64.
    #[builder(default = "64")]
    pub max_span_checks_per_rule: usize,
    /// HMAC signing key; empty disables signing (development only).
    #[builder(default)]
    pub signing_key: Vec<u8>,
    /// Trace Buffer shard count, should be a power of two. Default 16.
    #[builder(default = "16")]
    pub trace_buffer_shards: usize,
    /// Cooperative shutdown grace period. Default 10s.
    #[builder(default = "Duration::from_secs(10)")]
    pub shutdown_grace_period: Duration,
    /// Exporter channel capacity — spec.md §5 "drop-oldest policy when
    /// full". Default 1024.
    #[builder(default = "1024")]
    pub export_queue_capacity: usize,
}

fn default_evaluator_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_secs(5),
            hard_trace_ttl: Duration::from_secs(60),
            buffer_scan_interval: Duration::from_secs(1),
            evaluator_workers: default_evaluator_workers(),
            evaluator_queue_depth: 1024,
            max_rule_source_bytes: 16 * 1024,
            max_rule_depth: 16,
            max_span_checks_per_rule: 64,
            signing_key: Vec::new(),
            trace_buffer_shards: 16,
            shutdown_grace_period: Duration::from_secs(10),
            export_queue_capacity: 1024,
        }
    }
}

impl Configuration {
    pub fn validator_limits(&self) -> ValidatorLimits {
        ValidatorLimits {
            max_source_bytes: self.max_rule_source_bytes,
            max_depth: self.max_rule_depth,
            max_span_checks: self.max_span_checks_per_rule,
        }
    }
}

/// On-disk shape for YAML-loaded configuration — mirrors the teacher's
/// `config/config_file.rs` split between a serde-friendly file shape and
/// the builder-validated runtime `Configuration`. Durations are given in
/// milliseconds since `serde_yaml` has no native duration support.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub quiet_interval_ms: Option<u64>,
    pub hard_trace_ttl_ms: Option<u64>,
    pub buffer_scan_interval_ms: Option<u64>,
    pub evaluator_workers: Option<usize>,
    pub evaluator_queue_depth: Option<usize>,
    pub max_rule_source_bytes: Option<usize>,
    pub max_rule_depth: Option<usize>,
    pub max_span_checks_per_rule: Option<usize>,
    pub signing_key_hex: Option<String>,
    pub trace_buffer_shards: Option<usize>,
    pub shutdown_grace_period_ms: Option<u64>,
    pub export_queue_capacity: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("failed to parse configuration YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("signingKeyHex is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl ConfigFile {
    pub fn parse(yaml: &str) -> Result<Self, ConfigFileError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Merges this file's present fields over [`Configuration::default`],
    /// matching the teacher's config-file-overrides-defaults precedent.
    pub fn into_configuration(self) -> Result<Configuration, ConfigFileError> {
        let defaults = Configuration::default();
        let signing_key = match self.signing_key_hex {
            Some(hex_str) => hex::decode(hex_str)?,
            None => defaults.signing_key,
        };
        Ok(Configuration {
            quiet_interval: self
                .quiet_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.quiet_interval),
            hard_trace_ttl: self
                .hard_trace_ttl_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.hard_trace_ttl),
            buffer_scan_interval: self
                .buffer_scan_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.buffer_scan_interval),
            evaluator_workers: self.evaluator_workers.unwrap_or(defaults.evaluator_workers),
            evaluator_queue_depth: self
                .evaluator_queue_depth
                .unwrap_or(defaults.evaluator_queue_depth),
            max_rule_source_bytes: self
                .max_rule_source_bytes
                .unwrap_or(defaults.max_rule_source_bytes),
            max_rule_depth: self.max_rule_depth.unwrap_or(defaults.max_rule_depth),
            max_span_checks_per_rule: self
                .max_span_checks_per_rule
                .unwrap_or(defaults.max_span_checks_per_rule),
            signing_key,
            trace_buffer_shards: self
                .trace_buffer_shards
                .unwrap_or(defaults.trace_buffer_shards),
            shutdown_grace_period: self
                .shutdown_grace_period_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace_period),
            export_queue_capacity: self
                .export_queue_capacity
                .unwrap_or(defaults.export_queue_capacity),
        })
    }
}
