//! Recursive-descent parser for the rule DSL — spec.md §4.1.
//!
//! Precedence, tightest first: parentheses, `not`, `and`, `or`. Each
//! grammar production in spec.md's grammar gets one parser method, named
//! the same as the production.

use crate::error::{ParseError, Position};

use super::ast::{CmpOp, Condition, DottedName, Literal, Predicate, RuleAst, SpanCheck};
use super::token::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    pub fn parse_rule(mut self) -> Result<RuleAst, ParseError> {
        self.expect(&TokenKind::When, &["when"])?;
        self.expect(&TokenKind::LBrace, &["{"])?;
        let when = self.condition()?;
        self.expect(&TokenKind::RBrace, &["}"])?;

        let mut always = None;
        let mut never = None;
        loop {
            match self.peek_kind() {
                TokenKind::Always => {
                    self.bump();
                    self.expect(&TokenKind::LBrace, &["{"])?;
                    always = Some(self.condition()?);
                    self.expect(&TokenKind::RBrace, &["}"])?;
                }
                TokenKind::Never => {
                    self.bump();
                    self.expect(&TokenKind::LBrace, &["{"])?;
                    never = Some(self.condition()?);
                    self.expect(&TokenKind::RBrace, &["}"])?;
                }
                _ => break,
            }
        }

        if always.is_none() && never.is_none() {
            return Err(ParseError::new(
                self.peek().position,
                "rule must contain an 'always' or 'never' clause (or both)",
            ));
        }

        self.expect(&TokenKind::Eof, &["end of input"])?;

        Ok(RuleAst {
            when,
            always,
            never,
        })
    }

    // condition := orTerm ('or' orTerm)*
    fn condition(&mut self) -> Result<Condition, ParseError> {
        let mut node = self.or_term()?;
        while matches!(self.peek_kind(), TokenKind::Or) {
            self.bump();
            let rhs = self.or_term()?;
            node = Condition::Or(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    // orTerm := andTerm ('and' andTerm)*
    fn or_term(&mut self) -> Result<Condition, ParseError> {
        let mut node = self.and_term()?;
        while matches!(self.peek_kind(), TokenKind::And) {
            self.bump();
            let rhs = self.and_term()?;
            node = Condition::And(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    // andTerm := 'not'? term
    fn and_term(&mut self) -> Result<Condition, ParseError> {
        if matches!(self.peek_kind(), TokenKind::Not) {
            self.bump();
            let inner = self.term()?;
            Ok(Condition::Not(Box::new(inner)))
        } else {
            self.term()
        }
    }

    // term := '(' condition ')' | spanCheck
    fn term(&mut self) -> Result<Condition, ParseError> {
        if matches!(self.peek_kind(), TokenKind::LParen) {
            self.bump();
            let inner = self.condition()?;
            self.expect(&TokenKind::RParen, &[")"])?;
            return Ok(inner);
        }
        Ok(Condition::Check(self.span_check()?))
    }

    // spanCheck := countCheck | hasCheck
    fn span_check(&mut self) -> Result<SpanCheck, ParseError> {
        if matches!(self.peek_kind(), TokenKind::Count) {
            self.count_check()
        } else {
            self.has_check()
        }
    }

    // countCheck := 'count' '(' dottedName ')' cmpOp number
    fn count_check(&mut self) -> Result<SpanCheck, ParseError> {
        let position = self.peek().position;
        self.expect(&TokenKind::Count, &["count"])?;
        self.expect(&TokenKind::LParen, &["("])?;
        let pattern = self.dotted_name()?;
        self.expect(&TokenKind::RParen, &[")"])?;
        let op = self.cmp_op()?;
        let value = self.literal()?;
        if !matches!(value, Literal::Int(_)) {
            return Err(ParseError::new(
                position,
                "count(...) must be compared against an integer literal",
            ));
        }
        Ok(SpanCheck::Count {
            pattern,
            op,
            value,
            position,
        })
    }

    // hasCheck := dottedName (directCmp | whereClause)?
    fn has_check(&mut self) -> Result<SpanCheck, ParseError> {
        let position = self.peek().position;
        let pattern = self.dotted_name()?;

        if matches!(self.peek_kind(), TokenKind::Dot) && self.peek_at_kind(1) == TokenKind::Where {
            self.bump(); // '.'
            self.bump(); // 'where'
            self.expect(&TokenKind::LParen, &["("])?;
            let attr_path = self.attr_path()?;
            let op = self.cmp_op()?;
            let literal = self.literal()?;
            self.expect(&TokenKind::RParen, &[")"])?;
            return Ok(SpanCheck::Has {
                pattern,
                predicate: Some(Predicate {
                    attr_path,
                    op,
                    literal,
                    position,
                }),
                position,
            });
        }

        if is_cmp_op_start(self.peek_kind()) {
            let op_position = self.peek().position;
            // The grammar's `.*` is an operation-name-pattern operator, not
            // an attribute-path one; a trailing `.*` lands on the segment
            // that directCmp is about to peel off as the attribute, so it
            // can never be legal here.
            if pattern.prefix {
                return Err(ParseError::new(
                    op_position,
                    "'.*' is only valid on an operation-name pattern, not an attribute path",
                ));
            }
            let op = self.cmp_op()?;
            let literal = self.literal()?;
            // directCmp form: the last dotted segment is the attribute
            // path, everything before it is the operation-name pattern
            // (DESIGN.md Open Question decision).
            if pattern.segments.len() < 2 {
                return Err(ParseError::new(
                    op_position,
                    "direct comparison requires an operation.attribute dotted form; use '.where(...)' for a single-segment pattern",
                ));
            }
            let mut segments = pattern.segments.clone();
            let attr = segments.pop().unwrap();
            let operation_pattern = DottedName {
                segments,
                prefix: false,
            };
            return Ok(SpanCheck::Has {
                pattern: operation_pattern,
                predicate: Some(Predicate {
                    attr_path: DottedName {
                        segments: vec![attr],
                        prefix: false,
                    },
                    op,
                    literal,
                    position: op_position,
                }),
                position,
            });
        }

        Ok(SpanCheck::Has {
            pattern,
            predicate: None,
            position,
        })
    }

    // dottedName := ident ('.' ident)*  (with optional trailing '.*')
    fn dotted_name(&mut self) -> Result<DottedName, ParseError> {
        let first = self.ident()?;
        let mut segments = vec![first];
        let mut prefix = false;
        loop {
            if matches!(self.peek_kind(), TokenKind::Dot) {
                if self.peek_at_kind(1) == TokenKind::Star {
                    self.bump(); // '.'
                    self.bump(); // '*'
                    prefix = true;
                    break;
                }
                if self.peek_at_kind(1) == TokenKind::Where {
                    break;
                }
                self.bump();
                segments.push(self.ident()?);
            } else {
                break;
            }
        }
        Ok(DottedName { segments, prefix })
    }

    /// An attribute path — a [`dotted_name`](Self::dotted_name) that the
    /// grammar never allows a trailing `.*` on, since that operator is
    /// scoped to operation-name patterns (DESIGN.md Open Question
    /// decision). Used for `whereClause`'s attribute segment.
    fn attr_path(&mut self) -> Result<DottedName, ParseError> {
        let position = self.peek().position;
        let name = self.dotted_name()?;
        if name.prefix {
            return Err(ParseError::new(
                position,
                "'.*' is only valid on an operation-name pattern, not an attribute path",
            ));
        }
        Ok(name)
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected(&["identifier"])),
        }
    }

    // cmpOp := '==' | '!=' | '>' | '>=' | '<' | '<=' | 'in' | 'matches' | 'contains'
    fn cmp_op(&mut self) -> Result<CmpOp, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::Ne,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::In => CmpOp::In,
            TokenKind::Matches => CmpOp::Matches,
            TokenKind::Contains => CmpOp::Contains,
            _ => {
                return Err(self.unexpected(&[
                    "==", "!=", ">", ">=", "<", "<=", "in", "matches", "contains",
                ]))
            }
        };
        self.bump();
        Ok(op)
    }

    // literal := number | quotedString | ident | boolean | listLiteral
    fn literal(&mut self) -> Result<Literal, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Int(n) => {
                self.bump();
                Ok(Literal::Int(n))
            }
            TokenKind::Float(n) => {
                self.bump();
                Ok(Literal::Float(n))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Literal::Str(s))
            }
            TokenKind::True => {
                self.bump();
                Ok(Literal::Bool(true))
            }
            TokenKind::False => {
                self.bump();
                Ok(Literal::Bool(false))
            }
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Literal::Ident(name))
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                if !matches!(self.peek_kind(), TokenKind::RBracket) {
                    items.push(self.literal()?);
                    while matches!(self.peek_kind(), TokenKind::Comma) {
                        self.bump();
                        items.push(self.literal()?);
                    }
                }
                self.expect(&TokenKind::RBracket, &["]"])?;
                Ok(Literal::List(items))
            }
            _ => Err(self.unexpected(&["a literal value"])),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at_kind(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.index + offset)
            .map(|t| t.kind.clone())
            .unwrap_or(TokenKind::Eof)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, kind: &TokenKind, expected: &[&str]) -> Result<Token, ParseError> {
        if self.peek_kind() == kind {
            Ok(self.bump())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &[&str]) -> ParseError {
        let token = self.peek();
        ParseError::expected(
            token.position,
            format!("unexpected {}", token.describe()),
            expected.to_vec(),
        )
    }
}

fn is_cmp_op_start(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::EqEq
            | TokenKind::NotEq
            | TokenKind::Gt
            | TokenKind::Ge
            | TokenKind::Lt
            | TokenKind::Le
            | TokenKind::In
            | TokenKind::Matches
            | TokenKind::Contains
    )
}

/// Parse source text directly to an AST — the common entry point used by
/// the validator and the registry.
pub fn parse(source: &str) -> Result<RuleAst, ParseError> {
    let tokens = super::lexer::Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_rule()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ast::Condition;

    #[test]
    fn parses_minimal_rule() {
        let ast = parse("when { payment } always { fraud_check }").unwrap();
        assert!(matches!(ast.when, Condition::Check(_)));
        assert!(ast.always.is_some());
        assert!(ast.never.is_none());
    }

    #[test]
    fn requires_when_clause() {
        let err = parse("always { fraud_check }").unwrap_err();
        assert!(err.message.contains("unexpected"));
    }

    #[test]
    fn requires_always_or_never() {
        let err = parse("when { payment }").unwrap_err();
        assert!(err.message.contains("always") || err.message.contains("never"));
    }

    #[test]
    fn parses_count_check() {
        let ast = parse("when { api.request } always { count(http.retry) <= 3 }").unwrap();
        match ast.always.unwrap() {
            Condition::Check(SpanCheck::Count { pattern, op, value, .. }) => {
                assert_eq!(pattern.joined(), "http.retry");
                assert_eq!(op, CmpOp::Le);
                assert_eq!(value, Literal::Int(3));
            }
            other => panic!("expected count check, got {other:?}"),
        }
    }

    #[test]
    fn count_rejects_non_integer_rhs() {
        let err = parse("when { api.request } always { count(http.retry) <= 3.5 }").unwrap_err();
        assert!(err.message.contains("integer"));
    }

    #[test]
    fn parses_direct_comparison_split_at_last_segment() {
        let ast = parse("when { payment.amount > 1000 } always { fraud_check }").unwrap();
        match ast.when {
            Condition::Check(SpanCheck::Has { pattern, predicate, .. }) => {
                assert_eq!(pattern.joined(), "payment");
                let predicate = predicate.unwrap();
                assert_eq!(predicate.attr_path.joined(), "amount");
                assert_eq!(predicate.op, CmpOp::Gt);
                assert_eq!(predicate.literal, Literal::Int(1000));
            }
            other => panic!("expected has check, got {other:?}"),
        }
    }

    #[test]
    fn parses_where_clause() {
        let ast =
            parse("when { api.request.where(http.status_code == 200) } never { bypass_validation }")
                .unwrap();
        match ast.when {
            Condition::Check(SpanCheck::Has { pattern, predicate, .. }) => {
                assert_eq!(pattern.joined(), "api.request");
                let predicate = predicate.unwrap();
                assert_eq!(predicate.attr_path.joined(), "http.status_code");
            }
            other => panic!("expected has check, got {other:?}"),
        }
    }

    #[test]
    fn parses_prefix_pattern() {
        let ast = parse("when { http.* } always { fraud_check }").unwrap();
        match ast.when {
            Condition::Check(SpanCheck::Has { pattern, .. }) => {
                assert_eq!(pattern.joined(), "http");
                assert!(pattern.prefix);
            }
            other => panic!("expected has check, got {other:?}"),
        }
    }

    #[test]
    fn parses_boolean_combinators_with_precedence() {
        let ast = parse("when { a and b or c } always { d }").unwrap();
        assert!(matches!(ast.when, Condition::Or(..)));
        if let Condition::Or(lhs, _) = ast.when {
            assert!(matches!(*lhs, Condition::And(..)));
        }
    }

    #[test]
    fn parses_parenthesized_grouping() {
        let ast = parse("when { (a or b) and c } always { d }").unwrap();
        assert!(matches!(ast.when, Condition::And(..)));
    }

    #[test]
    fn parses_list_literal_for_in() {
        let ast =
            parse(r#"when { service.name in ["checkout", "cart"] } always { fraud_check }"#)
                .unwrap();
        match ast.when {
            Condition::Check(SpanCheck::Has { predicate, .. }) => {
                let predicate = predicate.unwrap();
                assert_eq!(predicate.op, CmpOp::In);
                assert!(matches!(predicate.literal, Literal::List(_)));
            }
            other => panic!("expected has check, got {other:?}"),
        }
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let err = parse("when { payment } always { fraud_check } garbage").unwrap_err();
        assert!(err.message.contains("unexpected"));
    }

    #[test]
    fn where_clause_rejects_prefix_wildcard_on_attribute_path() {
        let err = parse("when { payment.where(http.headers.* == \"foo\") } always { fraud_check }")
            .unwrap_err();
        assert!(err.message.contains(".*"));
    }

    #[test]
    fn direct_comparison_rejects_prefix_wildcard_on_attribute_path() {
        let err = parse("when { payment.amount.* > 1000 } always { fraud_check }").unwrap_err();
        assert!(err.message.contains(".*"));
    }
}
