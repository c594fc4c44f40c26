//! Rule Registry (C7) — spec.md §4.7.
//!
//! A concurrent mapping from rule id to [`Rule`]. Writers take the entry's
//! write path through `DashMap`; readers (the evaluator) copy out a
//! snapshot of active rules, sharing the underlying `Arc<CompiledRule>`
//! pointers, then release the map and proceed without holding a lock
//! during evaluation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::dsl::{self, CompiledRule};
use crate::error::EngineError;
use crate::rule::{Rule, RuleSummary, Severity};
use crate::dsl::validator::ValidatorLimits;

/// One entry in an evaluator-visible snapshot: a rule id, its severity,
/// and the immutable compiled form to run. Taken atomically at the start
/// of a trace's evaluation — spec.md §4.6 "Snapshot semantics".
#[derive(Clone)]
pub struct RuleSnapshotEntry {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub compiled: Arc<CompiledRule>,
}

pub struct RuleRegistry {
    rules: DashMap<String, Rule>,
    limits: ValidatorLimits,
}

impl RuleRegistry {
    pub fn new(limits: ValidatorLimits) -> Self {
        Self {
            rules: DashMap::new(),
            limits,
        }
    }

    /// `createRule(source, severity)` — spec.md §6. Parses, validates, and
    /// inserts in `Draft` then immediately drives `Validate`; on success
    /// the rule lands `Active`, on failure `Invalid` and the errors are
    /// returned to the caller (the row stays in the registry so
    /// `updateRule` can replace it).
    pub fn create_rule(
        &self,
        name: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
    ) -> Result<String, EngineError> {
        let id = Uuid::new_v4().to_string();
        let mut rule = Rule::new(id.clone(), name, source, severity);
        self.validate_and_transition(&mut rule)?;
        self.rules.insert(id.clone(), rule);
        Ok(id)
    }

    /// `updateRule(id, source, severity)` — restarts the lifecycle from
    /// `Draft` while holding the prior `Active|Disabled` state until the
    /// new version validates; spec.md §4.7: "old version is the one
    /// evaluated" until then, so on validation failure the previous rule
    /// is left untouched and the errors are reported.
    pub fn update_rule(
        &self,
        id: &str,
        source: impl Into<String>,
        severity: Severity,
    ) -> Result<(), EngineError> {
        let mut entry = self
            .rules
            .get_mut(id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))?;
        let mut draft = Rule::new(entry.id.clone(), entry.name.clone(), source, severity);
        match self.validate_and_transition(&mut draft) {
            Ok(()) => {
                *entry = draft;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn validate_and_transition(&self, rule: &mut Rule) -> Result<(), EngineError> {
        dsl::check_source_size(&rule.source, &self.limits)
            .map_err(|e| EngineError::Invalid(vec![e]))?;
        let ast = match dsl::parse(&rule.source) {
            Ok(ast) => ast,
            Err(e) => {
                let _ = rule.mark_invalid();
                return Err(EngineError::Unparseable(vec![e]));
            }
        };
        let report = dsl::validate(&ast, &self.limits);
        if !report.is_ok() {
            let _ = rule.mark_invalid();
            return Err(EngineError::Invalid(report.errors));
        }
        let compiled = match catch_unwind(AssertUnwindSafe(|| dsl::compile(&ast))) {
            Ok(compiled) => Arc::new(compiled),
            Err(_) => {
                let _ = rule.mark_invalid();
                let token = Uuid::new_v4().to_string();
                tracing::error!(debug_token = %token, rule_id = %rule.id, "rule compilation panicked");
                return Err(EngineError::Internal { token });
            }
        };
        rule.mark_validated(compiled)
    }

    pub fn enable_rule(&self, id: &str) -> Result<(), EngineError> {
        let mut entry = self
            .rules
            .get_mut(id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))?;
        entry.enable()
    }

    pub fn disable_rule(&self, id: &str) -> Result<(), EngineError> {
        let mut entry = self
            .rules
            .get_mut(id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))?;
        entry.disable()
    }

    pub fn delete_rule(&self, id: &str) -> Result<(), EngineError> {
        self.rules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))
    }

    pub fn get_rule(&self, id: &str) -> Option<Rule> {
        self.rules.get(id).map(|r| r.clone())
    }

    pub fn list_rules(&self) -> Vec<RuleSummary> {
        self.rules.iter().map(|r| RuleSummary::from(r.value())).collect()
    }

    /// Snapshot of `{r : state(r) = Active}`, sorted by rule id for
    /// deterministic iteration order — spec.md §5 "rule-iteration order is
    /// a deterministic sort by rule id".
    pub fn snapshot_active(&self) -> Vec<RuleSnapshotEntry> {
        let mut snapshot: Vec<RuleSnapshotEntry> = self
            .rules
            .iter()
            .filter(|r| r.is_active())
            .filter_map(|r| {
                r.compiled.clone().map(|compiled| RuleSnapshotEntry {
                    id: r.id.clone(),
                    name: r.name.clone(),
                    severity: r.severity,
                    compiled,
                })
            })
            .collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RuleRegistry {
        RuleRegistry::new(ValidatorLimits::default())
    }

    #[test]
    fn create_rule_lands_active_on_success() {
        let registry = registry();
        let id = registry
            .create_rule("n", "when { payment } always { fraud_check }", Severity::Low)
            .unwrap();
        let rule = registry.get_rule(&id).unwrap();
        assert!(rule.is_active());
    }

    #[test]
    fn create_rule_reports_parse_errors() {
        let registry = registry();
        let err = registry.create_rule("n", "not even a rule", Severity::Low).unwrap_err();
        assert!(matches!(err, EngineError::Unparseable(_)));
    }

    #[test]
    fn disable_then_enable_round_trips_through_registry() {
        let registry = registry();
        let id = registry
            .create_rule("n", "when { payment } always { fraud_check }", Severity::Low)
            .unwrap();
        registry.disable_rule(&id).unwrap();
        assert_eq!(registry.snapshot_active().len(), 0);
        registry.enable_rule(&id).unwrap();
        assert_eq!(registry.snapshot_active().len(), 1);
    }

    #[test]
    fn enable_enable_is_idempotent_in_effect() {
        let registry = registry();
        let id = registry
            .create_rule("n", "when { payment } always { fraud_check }", Severity::Low)
            .unwrap();
        // Already active; `enable` from `Active` is illegal, but the net
        // observable state after two calls matches after one.
        let _ = registry.enable_rule(&id);
        assert_eq!(registry.snapshot_active().len(), 1);
    }

    #[test]
    fn create_then_delete_leaves_registry_empty() {
        let registry = registry();
        let id = registry
            .create_rule("n", "when { payment } always { fraud_check }", Severity::Low)
            .unwrap();
        registry.delete_rule(&id).unwrap();
        assert!(registry.get_rule(&id).is_none());
        assert_eq!(registry.snapshot_active().len(), 0);
    }

    #[test]
    fn update_with_invalid_source_keeps_old_version_active() {
        let registry = registry();
        let id = registry
            .create_rule("n", "when { payment } always { fraud_check }", Severity::Low)
            .unwrap();
        let err = registry.update_rule(&id, "garbage(((", Severity::High).unwrap_err();
        assert!(matches!(err, EngineError::Unparseable(_)));
        let rule = registry.get_rule(&id).unwrap();
        assert!(rule.is_active());
        assert_eq!(rule.severity, Severity::Low);
    }

    #[test]
    fn snapshot_is_sorted_by_rule_id() {
        let registry = registry();
        registry
            .create_rule("a", "when { payment } always { fraud_check }", Severity::Low)
            .unwrap();
        registry
            .create_rule("b", "when { payment } always { fraud_check }", Severity::Low)
            .unwrap();
        let snapshot = registry.snapshot_active();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].id <= snapshot[1].id);
    }
}
