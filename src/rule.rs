//! A rule's static attributes and its lifecycle state — spec.md §3 "Rule"
//! and §4.7.

use std::sync::Arc;
use std::time::SystemTime;

use crate::dsl::CompiledRule;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Per-rule lifecycle FSM — spec.md §4.7. `Update` is modeled by the
/// registry replacing the whole [`Rule`], so this enum only needs the
/// states a single version passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Draft,
    Invalid,
    Active,
    Disabled,
    Deleted,
}

impl RuleState {
    fn name(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Invalid => "Invalid",
            Self::Active => "Active",
            Self::Disabled => "Disabled",
            Self::Deleted => "Deleted",
        }
    }
}

/// A submitted rule: its source, its compiled form (present once it has
/// passed validation), and its lifecycle state.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub source: String,
    pub severity: Severity,
    pub compiled: Option<Arc<CompiledRule>>,
    pub state: RuleState,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.into(),
            name: name.into(),
            source: source.into(),
            severity,
            compiled: None,
            state: RuleState::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == RuleState::Active
    }

    /// `Validate` — spec.md §4.7: "`Validate → Active|Invalid`". Only legal
    /// from `Draft`.
    pub fn mark_validated(&mut self, compiled: Arc<CompiledRule>) -> Result<(), EngineError> {
        self.require(RuleState::Draft)?;
        self.compiled = Some(compiled);
        self.state = RuleState::Active;
        self.updated_at = SystemTime::now();
        Ok(())
    }

    pub fn mark_invalid(&mut self) -> Result<(), EngineError> {
        self.require(RuleState::Draft)?;
        self.state = RuleState::Invalid;
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// `Disable` — only legal from `Active`.
    pub fn disable(&mut self) -> Result<(), EngineError> {
        self.require(RuleState::Active)?;
        self.state = RuleState::Disabled;
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// `Enable` — only legal from `Disabled`.
    pub fn enable(&mut self) -> Result<(), EngineError> {
        self.require(RuleState::Disabled)?;
        self.state = RuleState::Active;
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// `Delete` — legal from any state, terminal.
    pub fn delete(&mut self) {
        self.state = RuleState::Deleted;
        self.updated_at = SystemTime::now();
    }

    fn require(&self, expected: RuleState) -> Result<(), EngineError> {
        if self.state != expected {
            return Err(EngineError::IllegalTransition {
                fsm: "RuleFsm",
                from: self.state.name().to_string(),
                to: expected.name().to_string(),
            });
        }
        Ok(())
    }
}

/// A read-only projection returned from `listRules` — spec.md §6.
#[derive(Debug, Clone)]
pub struct RuleSummary {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub state: RuleState,
}

impl From<&Rule> for RuleSummary {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            severity: rule.severity,
            state: rule.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl;

    fn compiled() -> Arc<CompiledRule> {
        let ast = dsl::parse("when { payment } always { fraud_check }").unwrap();
        Arc::new(dsl::compile(&ast))
    }

    #[test]
    fn draft_validates_to_active() {
        let mut rule = Rule::new("r1", "n", "src", Severity::Low);
        rule.mark_validated(compiled()).unwrap();
        assert!(rule.is_active());
    }

    #[test]
    fn disable_then_enable_round_trips() {
        let mut rule = Rule::new("r1", "n", "src", Severity::Low);
        rule.mark_validated(compiled()).unwrap();
        rule.disable().unwrap();
        assert_eq!(rule.state, RuleState::Disabled);
        rule.enable().unwrap();
        assert_eq!(rule.state, RuleState::Active);
    }

    #[test]
    fn enabling_a_draft_rule_is_illegal() {
        let mut rule = Rule::new("r1", "n", "src", Severity::Low);
        assert!(rule.enable().is_err());
    }

    #[test]
    fn delete_is_legal_from_any_state() {
        let mut rule = Rule::new("r1", "n", "src", Severity::Low);
        rule.delete();
        assert_eq!(rule.state, RuleState::Deleted);
    }
}
