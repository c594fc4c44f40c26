//! Hand-written lexer for the rule DSL — spec.md §4.1.
//!
//! Source is required to be NFC-normalized UTF-8 with LF or CRLF line
//! endings (spec.md §6); normalization itself is the collaborator's job
//! before the text reaches this lexer, same as the teacher leaves source
//! encoding to its caller.

use crate::error::{ParseError, Position};

use super::token::{keyword, Token, TokenKind};

pub struct Lexer<'a> {
    source: &'a str,
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let position = self.position();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    position,
                });
                break;
            };

            let kind = match c {
                '(' => self.advance_with(TokenKind::LParen),
                ')' => self.advance_with(TokenKind::RParen),
                '{' => self.advance_with(TokenKind::LBrace),
                '}' => self.advance_with(TokenKind::RBrace),
                '[' => self.advance_with(TokenKind::LBracket),
                ']' => self.advance_with(TokenKind::RBracket),
                ',' => self.advance_with(TokenKind::Comma),
                '.' => self.advance_with(TokenKind::Dot),
                '*' => self.advance_with(TokenKind::Star),
                '=' => self.lex_eq(position)?,
                '!' => self.lex_bang(position)?,
                '>' => self.lex_angle('>', position),
                '<' => self.lex_angle('<', position),
                '"' | '\'' => self.lex_string(c, position)?,
                c if c.is_ascii_digit() => self.lex_number(position)?,
                c if is_ident_start(c) => self.lex_ident_or_keyword(position),
                other => {
                    return Err(ParseError::new(
                        position,
                        format!("unexpected character {other:?}"),
                    ))
                }
            };
            tokens.push(Token { kind, position });
        }
        Ok(tokens)
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn advance_with(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.position();
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                return Err(ParseError::new(start, "unterminated block comment"))
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn lex_eq(&mut self, position: Position) -> Result<TokenKind, ParseError> {
        self.bump();
        if self.peek() == Some('=') {
            self.bump();
            Ok(TokenKind::EqEq)
        } else {
            Err(ParseError::expected(position, "expected '=='", vec!["=="]))
        }
    }

    fn lex_bang(&mut self, position: Position) -> Result<TokenKind, ParseError> {
        self.bump();
        if self.peek() == Some('=') {
            self.bump();
            Ok(TokenKind::NotEq)
        } else {
            Err(ParseError::expected(position, "expected '!='", vec!["!="]))
        }
    }

    fn lex_angle(&mut self, c: char, _position: Position) -> TokenKind {
        self.bump();
        let has_eq = self.peek() == Some('=');
        if has_eq {
            self.bump();
        }
        match (c, has_eq) {
            ('>', false) => TokenKind::Gt,
            ('>', true) => TokenKind::Ge,
            ('<', false) => TokenKind::Lt,
            ('<', true) => TokenKind::Le,
            _ => unreachable!(),
        }
    }

    fn lex_string(&mut self, quote: char, start: Position) -> Result<TokenKind, ParseError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::new(start, "unterminated string literal")),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some(q) if q == quote => out.push(q),
                    Some(other) => out.push(other),
                    None => return Err(ParseError::new(start, "unterminated string literal")),
                },
                Some(c) if c == quote => break,
                Some(c) => out.push(c),
            }
        }
        Ok(TokenKind::Str(out))
    }

    fn lex_number(&mut self, start: Position) -> Result<TokenKind, ParseError> {
        let begin = self.index;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let save = self.index;
            let mut lookahead = self.index + 1;
            if matches!(self.chars.get(lookahead), Some('+') | Some('-')) {
                lookahead += 1;
            }
            if matches!(self.chars.get(lookahead), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                while self.index < lookahead {
                    self.bump();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                let _ = save;
            }
        }
        let text: String = self.chars[begin..self.index].iter().collect();
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| ParseError::new(start, format!("invalid float literal {text:?}")))?;
            Ok(TokenKind::Float(value))
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| ParseError::new(start, format!("invalid integer literal {text:?}")))?;
            Ok(TokenKind::Int(value))
        }
    }

    fn lex_ident_or_keyword(&mut self, _start: Position) -> TokenKind {
        let begin = self.index;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.bump();
        }
        let text: String = self.chars[begin..self.index].iter().collect();
        keyword(&text).unwrap_or(TokenKind::Ident(text))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn source_len_bytes(source: &str) -> usize {
    source.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_keywords_and_punctuation() {
        assert_eq!(
            kinds("when { a } always { b }"),
            vec![
                TokenKind::When,
                TokenKind::LBrace,
                TokenKind::Ident("a".into()),
                TokenKind::RBrace,
                TokenKind::Always,
                TokenKind::LBrace,
                TokenKind::Ident("b".into()),
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_comparison_operators() {
        assert_eq!(
            kinds("a == b != c >= d <= e > f < g"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::EqEq,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Ident("c".into()),
                TokenKind::Ge,
                TokenKind::Ident("d".into()),
                TokenKind::Le,
                TokenKind::Ident("e".into()),
                TokenKind::Gt,
                TokenKind::Ident("f".into()),
                TokenKind::Lt,
                TokenKind::Ident("g".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_strings_with_escapes() {
        assert_eq!(
            kinds(r#" "hello\nworld" "#),
            vec![TokenKind::Str("hello\nworld".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn lexes_numbers() {
        // The grammar has no unary minus; negative numeric literals are
        // not expressible in rule source.
        assert_eq!(
            kinds("42 3.14"),
            vec![TokenKind::Int(42), TokenKind::Float(3.14), TokenKind::Eof]
        );
    }

    #[test]
    fn skips_line_and_block_comments() {
        assert_eq!(
            kinds("when // comment\n{ /* block */ a }"),
            vec![
                TokenKind::When,
                TokenKind::LBrace,
                TokenKind::Ident("a".into()),
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new(r#" "abc "#).tokenize().unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn unterminated_block_comment_is_an_error() {
        let err = Lexer::new("/* never closes").tokenize().unwrap_err();
        assert!(err.message.contains("unterminated block comment"));
    }
}
