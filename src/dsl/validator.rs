//! Semantic-limit enforcement — spec.md §4.2.
//!
//! A rule that fails validation cannot transition to `Active` (registry
//! §4.7). Unknown attribute namespaces are warnings, not errors, per
//! spec.md §4.2's explicit carve-out.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ValidationError;

use super::ast::{CmpOp, Condition, DottedName, Literal, RuleAst, SpanCheck};

#[derive(Debug, Clone)]
pub struct ValidatorLimits {
    pub max_source_bytes: usize,
    pub max_depth: usize,
    pub max_span_checks: usize,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 16 * 1024,
            max_depth: 16,
            max_span_checks: 64,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Namespaces recognized well enough to suppress the "unknown namespace"
/// warning. Mirrors the families `opentelemetry-semantic-conventions`
/// defines (http, db, rpc, net, service, resource) without depending on
/// that crate, since OTLP wire semantics are explicitly out of scope here.
const KNOWN_NAMESPACES: &[&str] = &[
    "http", "db", "rpc", "net", "service", "resource", "messaging", "faas", "k8s", "cloud",
];

/// Checked ahead of lexing, per spec.md §8: "A rule source exceeding
/// maxRuleSourceBytes is rejected before lexing."
pub fn check_source_size(source: &str, limits: &ValidatorLimits) -> Result<(), ValidationError> {
    let actual = source.len();
    if actual > limits.max_source_bytes {
        return Err(ValidationError::SourceTooLarge {
            actual,
            max: limits.max_source_bytes,
        });
    }
    Ok(())
}

pub fn validate(rule: &RuleAst, limits: &ValidatorLimits) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut max_depth = 0;
    let mut span_checks = 0;
    walk(&rule.when, 1, &mut max_depth, &mut span_checks, &mut report);
    if let Some(always) = &rule.always {
        walk(always, 1, &mut max_depth, &mut span_checks, &mut report);
    }
    if let Some(never) = &rule.never {
        walk(never, 1, &mut max_depth, &mut span_checks, &mut report);
    }

    if max_depth > limits.max_depth {
        report.errors.push(ValidationError::TooDeep {
            actual: max_depth,
            max: limits.max_depth,
        });
    }
    if span_checks > limits.max_span_checks {
        report.errors.push(ValidationError::TooManySpanChecks {
            actual: span_checks,
            max: limits.max_span_checks,
        });
    }

    report
}

fn walk(
    condition: &Condition,
    depth: usize,
    max_depth: &mut usize,
    span_checks: &mut usize,
    report: &mut ValidationReport,
) {
    *max_depth = (*max_depth).max(depth);
    match condition {
        Condition::Or(l, r) | Condition::And(l, r) => {
            walk(l, depth + 1, max_depth, span_checks, report);
            walk(r, depth + 1, max_depth, span_checks, report);
        }
        Condition::Not(inner) => walk(inner, depth + 1, max_depth, span_checks, report),
        Condition::Check(check) => {
            *span_checks += 1;
            validate_check(check, report);
        }
    }
}

fn validate_check(check: &SpanCheck, report: &mut ValidationReport) {
    check_namespace(pattern_of(check), report);
    match check {
        SpanCheck::Count { value, .. } => {
            if let Literal::Int(n) = value {
                if *n < 0 {
                    report.errors.push(ValidationError::CountNotNonNegativeInteger {
                        found: value.print(),
                    });
                }
            } else {
                report.errors.push(ValidationError::CountNotNonNegativeInteger {
                    found: value.print(),
                });
            }
        }
        SpanCheck::Has { predicate, .. } => {
            if let Some(predicate) = predicate {
                check_namespace(&predicate.attr_path, report);
                match predicate.op {
                    CmpOp::Matches => validate_regex(&predicate.literal, report),
                    CmpOp::In => validate_in_literal(&predicate.literal, report),
                    _ => {}
                }
            }
        }
    }
}

fn pattern_of(check: &SpanCheck) -> &DottedName {
    match check {
        SpanCheck::Count { pattern, .. } | SpanCheck::Has { pattern, .. } => pattern,
    }
}

fn check_namespace(path: &DottedName, report: &mut ValidationReport) {
    if let Some(first) = path.segments.first() {
        if !KNOWN_NAMESPACES.contains(&first.as_str()) {
            report
                .warnings
                .push(format!("unrecognized attribute namespace {first:?} in {}", path.joined()));
        }
    }
}

fn validate_regex(literal: &Literal, report: &mut ValidationReport) {
    let Literal::Str(pattern) = literal else {
        report.errors.push(ValidationError::InvalidRegex {
            detail: "'matches' requires a string literal".into(),
        });
        return;
    };
    if let Err(e) = compile_anchored(pattern) {
        report.errors.push(ValidationError::InvalidRegex {
            detail: e.to_string(),
        });
    }
}

fn validate_in_literal(literal: &Literal, report: &mut ValidationReport) {
    let Literal::List(items) = literal else {
        report.errors.push(ValidationError::HeterogeneousList);
        return;
    };
    let mut kinds = items.iter().map(literal_kind);
    if let Some(first) = kinds.next() {
        if kinds.any(|k| k != first) {
            report.errors.push(ValidationError::HeterogeneousList);
        }
    }
}

fn literal_kind(literal: &Literal) -> &'static str {
    match literal {
        Literal::Int(_) => "int",
        Literal::Float(_) => "float",
        Literal::Str(_) => "string",
        Literal::Bool(_) => "bool",
        Literal::Ident(_) => "ident",
        Literal::List(_) => "list",
    }
}

/// Regex cache keyed by the user's raw pattern text, each entry wrapped in
/// full-string anchors per spec.md §9's fixed "`matches` is anchored"
/// decision — matching the teacher's `event_emitter.rs` `Lazy<Regex>`
/// pattern, generalized to a per-pattern cache instead of one static.
static REGEX_CACHE: Lazy<dashmap::DashMap<String, Regex>> = Lazy::new(dashmap::DashMap::new);

pub fn compile_anchored(pattern: &str) -> Result<Regex, regex::Error> {
    if let Some(existing) = REGEX_CACHE.get(pattern) {
        return Ok(existing.clone());
    }
    let anchored = format!("^(?:{pattern})$");
    let compiled = Regex::new(&anchored)?;
    REGEX_CACHE.insert(pattern.to_string(), compiled.clone());
    Ok(compiled)
}
