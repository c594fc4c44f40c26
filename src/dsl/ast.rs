//! AST node types for the rule DSL — spec.md §4.1.
//!
//! Every node carries its source [`Position`] so a collaborator's editor
//! integration can report diagnostics precisely, and so the printer can be
//! exercised independently of position-insensitive equality in tests.

use crate::error::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct DottedName {
    pub segments: Vec<String>,
    /// True when the source wrote a trailing `.*` — a distinct prefix-match
    /// operator, not part of `segments` (DESIGN.md Open Question decision).
    pub prefix: bool,
}

impl DottedName {
    pub fn joined(&self) -> String {
        self.segments.join(".")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Matches,
    Contains,
}

impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::In => "in",
            Self::Matches => "matches",
            Self::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    List(Vec<Literal>),
}

impl Literal {
    pub fn print(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Str(s) => format!("{s:?}"),
            Self::Bool(b) => b.to_string(),
            Self::Ident(s) => s.clone(),
            Self::List(items) => format!(
                "[{}]",
                items.iter().map(Literal::print).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

/// The optional predicate attached to a [`SpanCheck::Has`] — either the
/// inline `directCmp` form or the explicit `.where(...)` form.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub attr_path: DottedName,
    pub op: CmpOp,
    pub literal: Literal,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpanCheck {
    Count {
        pattern: DottedName,
        op: CmpOp,
        value: Literal,
        position: Position,
    },
    Has {
        pattern: DottedName,
        predicate: Option<Predicate>,
        position: Position,
    },
}

impl SpanCheck {
    pub fn position(&self) -> Position {
        match self {
            Self::Count { position, .. } | Self::Has { position, .. } => *position,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Or(Box<Condition>, Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Check(SpanCheck),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleAst {
    pub when: Condition,
    pub always: Option<Condition>,
    pub never: Option<Condition>,
}

/// Render an AST back to DSL source text. Used for the parse → print →
/// parse round-trip law in spec.md §8 and for human-readable diagnostics.
pub fn print(rule: &RuleAst) -> String {
    let mut out = format!("when {{ {} }}", print_condition(&rule.when));
    if let Some(always) = &rule.always {
        out.push_str(&format!(" always {{ {} }}", print_condition(always)));
    }
    if let Some(never) = &rule.never {
        out.push_str(&format!(" never {{ {} }}", print_condition(never)));
    }
    out
}

fn print_condition(condition: &Condition) -> String {
    match condition {
        Condition::Or(l, r) => format!(
            "{} or {}",
            print_operand(l, condition),
            print_operand(r, condition)
        ),
        Condition::And(l, r) => format!(
            "{} and {}",
            print_operand(l, condition),
            print_operand(r, condition)
        ),
        Condition::Not(inner) => format!("not {}", print_operand(inner, condition)),
        Condition::Check(check) => print_check(check),
    }
}

/// Parenthesize `operand` when printing it without parens under `parent`
/// would change how it reparses, given `and`/`or`/`not` precedence
/// (`not` > `and` > `or`).
fn print_operand(operand: &Condition, parent: &Condition) -> String {
    let needs_parens = match (parent, operand) {
        (Condition::And(..), Condition::Or(..)) => true,
        (Condition::Not(..), Condition::Check(..)) => false,
        (Condition::Not(..), _) => true,
        _ => false,
    };
    if needs_parens {
        format!("({})", print_condition(operand))
    } else {
        print_condition(operand)
    }
}

fn print_check(check: &SpanCheck) -> String {
    match check {
        SpanCheck::Count {
            pattern,
            op,
            value,
            ..
        } => format!(
            "count({}{}) {} {}",
            pattern.joined(),
            if pattern.prefix { ".*" } else { "" },
            op.as_str(),
            value.print()
        ),
        SpanCheck::Has {
            pattern,
            predicate,
            ..
        } => {
            let base = format!(
                "{}{}",
                pattern.joined(),
                if pattern.prefix { ".*" } else { "" }
            );
            match predicate {
                None => base,
                // Both surface forms (`.where(...)` and the directCmp
                // `pattern.attr op literal` shorthand) parse down to the
                // same `Predicate`, so always printing the `.where(...)`
                // form is the only choice that round-trips unambiguously
                // regardless of which form the source used.
                Some(p) => format!(
                    "{}.where({} {} {})",
                    base,
                    p.attr_path.joined(),
                    p.op.as_str(),
                    p.literal.print()
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{lexer::Lexer, parser::Parser};

    fn roundtrip(src: &str) {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let ast = Parser::new(tokens).parse_rule().unwrap();
        let printed = print(&ast);
        let tokens2 = Lexer::new(&printed).tokenize().unwrap();
        let ast2 = Parser::new(tokens2).parse_rule().unwrap();
        assert_eq!(ast, ast2, "round-trip mismatch for {src:?} -> {printed:?}");
    }

    #[test]
    fn round_trips_simple_rule() {
        roundtrip(r#"when { payment } always { fraud_check }"#);
    }

    #[test]
    fn round_trips_boolean_combinators() {
        roundtrip(r#"when { payment and not logging } always { fraud_check or audit }"#);
    }

    #[test]
    fn round_trips_parenthesized_precedence() {
        roundtrip(r#"when { (payment or refund) and not logging } always { fraud_check }"#);
        roundtrip(r#"when { not (payment and logging) } always { fraud_check }"#);
    }

    #[test]
    fn round_trips_count_and_where() {
        roundtrip(r#"when { api.request } always { count(http.retry) <= 3 }"#);
        roundtrip(r#"when { api.request.where(http.status_code == 200) } never { bypass_validation }"#);
    }

    #[test]
    fn printed_direct_comparison_uses_the_where_form() {
        // The directCmp shorthand and `.where(...)` parse down to the same
        // `Predicate`, so the printer always emits `.where(...)` — printing
        // `pattern.attr` back out would drop the attribute path entirely.
        let tokens = Lexer::new("when { payment.amount > 1000 } always { fraud_check }")
            .tokenize()
            .unwrap();
        let ast = Parser::new(tokens).parse_rule().unwrap();
        let printed = print(&ast);
        assert_eq!(
            printed,
            "when { payment.where(amount > 1000) } always { fraud_check }"
        );

        let tokens2 = Lexer::new(&printed).tokenize().unwrap();
        let ast2 = Parser::new(tokens2).parse_rule().unwrap();
        assert_eq!(ast, ast2);
    }
}
