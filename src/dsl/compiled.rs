//! Immutable compiled form consumed by the evaluator — spec.md §4.3.
//!
//! No interpretation of source text is required at evaluation time:
//! patterns are pre-resolved, `matches` regexes are pre-compiled, and the
//! whole tree is `Send + Sync` so it can be shared across evaluator
//! workers by `Arc` (spec.md §5 "Compiled rules: shared by immutable
//! reference; never mutated").

use std::sync::Arc;

use regex::Regex;

use crate::attribute::AttributeValue;

use super::ast::{CmpOp, Condition, DottedName, Literal, RuleAst, SpanCheck};
use super::validator::compile_anchored;

/// An operation-name pattern — spec.md §4.3: "`a.b` matches any span whose
/// operation name equals `a.b`"; exact equality unless the source ended in
/// `.*`, which becomes a dotted-prefix match (DESIGN.md Open Question).
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Exact(String),
    Prefix(String),
}

impl Pattern {
    pub fn matches(&self, operation_name: &str) -> bool {
        match self {
            Self::Exact(expected) => operation_name == expected,
            Self::Prefix(prefix) => {
                operation_name == prefix
                    || operation_name
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('.'))
            }
        }
    }
}

fn compile_pattern(name: &DottedName) -> Pattern {
    if name.prefix {
        Pattern::Prefix(name.joined())
    } else {
        Pattern::Exact(name.joined())
    }
}

#[derive(Debug, Clone)]
pub enum CompiledLiteral {
    Value(AttributeValue),
    List(Vec<AttributeValue>),
    Regex(Arc<Regex>),
}

fn literal_to_attribute(literal: &Literal) -> AttributeValue {
    match literal {
        Literal::Int(n) => AttributeValue::Int(*n),
        Literal::Float(n) => AttributeValue::Float(*n),
        Literal::Str(s) => AttributeValue::Str(s.clone()),
        Literal::Bool(b) => AttributeValue::Bool(*b),
        Literal::Ident(s) => AttributeValue::Str(s.clone()),
        Literal::List(items) => AttributeValue::List(items.iter().map(literal_to_attribute).collect()),
    }
}

fn compile_literal(literal: &Literal, op: CmpOp) -> CompiledLiteral {
    if op == CmpOp::Matches {
        if let Literal::Str(pattern) = literal {
            if let Ok(regex) = compile_anchored(pattern) {
                return CompiledLiteral::Regex(Arc::new(regex));
            }
        }
    }
    match literal {
        Literal::List(items) => {
            CompiledLiteral::List(items.iter().map(literal_to_attribute).collect())
        }
        other => CompiledLiteral::Value(literal_to_attribute(other)),
    }
}

#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    pub attr_path: String,
    pub op: CmpOp,
    pub literal: CompiledLiteral,
}

#[derive(Debug, Clone)]
pub enum CompiledCheck {
    Count {
        pattern: Pattern,
        op: CmpOp,
        n: i64,
    },
    Has {
        pattern: Pattern,
        predicate: Option<CompiledPredicate>,
    },
}

#[derive(Debug, Clone)]
pub enum CompiledCondition {
    And(Box<CompiledCondition>, Box<CompiledCondition>),
    Or(Box<CompiledCondition>, Box<CompiledCondition>),
    Not(Box<CompiledCondition>),
    Check(CompiledCheck),
}

fn compile_condition(condition: &Condition) -> CompiledCondition {
    match condition {
        Condition::And(l, r) => {
            CompiledCondition::And(Box::new(compile_condition(l)), Box::new(compile_condition(r)))
        }
        Condition::Or(l, r) => {
            CompiledCondition::Or(Box::new(compile_condition(l)), Box::new(compile_condition(r)))
        }
        Condition::Not(inner) => CompiledCondition::Not(Box::new(compile_condition(inner))),
        Condition::Check(check) => CompiledCondition::Check(compile_check(check)),
    }
}

fn compile_check(check: &SpanCheck) -> CompiledCheck {
    match check {
        SpanCheck::Count { pattern, op, value, .. } => {
            let n = match value {
                Literal::Int(n) => *n,
                _ => 0,
            };
            CompiledCheck::Count {
                pattern: compile_pattern(pattern),
                op: *op,
                n,
            }
        }
        SpanCheck::Has { pattern, predicate, .. } => CompiledCheck::Has {
            pattern: compile_pattern(pattern),
            predicate: predicate.as_ref().map(|p| CompiledPredicate {
                attr_path: p.attr_path.joined(),
                op: p.op,
                literal: compile_literal(&p.literal, p.op),
            }),
        },
    }
}

/// Immutable executable form of a [`RuleAst`] — spec.md §4.3. Carries no
/// mutable state; safe to share across evaluator workers.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub when: CompiledCondition,
    pub always: Option<CompiledCondition>,
    pub never: Option<CompiledCondition>,
}

pub fn compile(ast: &RuleAst) -> CompiledRule {
    CompiledRule {
        when: compile_condition(&ast.when),
        always: ast.always.as_ref().map(compile_condition),
        never: ast.never.as_ref().map(compile_condition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parser::parse;

    #[test]
    fn exact_pattern_matches_exact_name_only() {
        let pattern = Pattern::Exact("payment".into());
        assert!(pattern.matches("payment"));
        assert!(!pattern.matches("payment.amount"));
    }

    #[test]
    fn prefix_pattern_matches_dotted_descendants() {
        let pattern = Pattern::Prefix("http".into());
        assert!(pattern.matches("http"));
        assert!(pattern.matches("http.client"));
        assert!(!pattern.matches("httpx"));
    }

    #[test]
    fn compiles_count_check_with_resolved_pattern() {
        let ast = parse("when { api.request } always { count(http.retry) <= 3 }").unwrap();
        let compiled = compile(&ast);
        match compiled.always.unwrap() {
            CompiledCondition::Check(CompiledCheck::Count { pattern, n, .. }) => {
                assert_eq!(pattern, Pattern::Exact("http.retry".into()));
                assert_eq!(n, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn matches_literal_compiles_to_anchored_regex() {
        let ast = parse(r#"when { payment.where(http.path matches "/api/.*") } always { c }"#).unwrap();
        let compiled = compile(&ast);
        match compiled.when {
            CompiledCondition::Check(CompiledCheck::Has { predicate, .. }) => {
                let predicate = predicate.unwrap();
                match predicate.literal {
                    CompiledLiteral::Regex(re) => {
                        assert!(re.is_match("/api/v1"));
                        assert!(!re.is_match("x/api/v1"));
                    }
                    other => panic!("expected regex literal, got {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
