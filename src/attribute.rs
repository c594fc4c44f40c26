//! Scalar/list attribute values shared by span attributes, resource
//! attributes, and DSL literals — spec.md §3 and §4.4 (SUPPLEMENT: the
//! list variant, needed for `in`/`contains` over OTLP array attributes).

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    /// The variant name, used by the validator to check list homogeneity
    /// and by `==`/`!=` to decide a type mismatch quickly.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
        }
    }

    /// The value's string form, used by `matches` (always matched as a
    /// string per spec.md §4.6) and for display.
    pub fn as_string_form(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => items
                .iter()
                .map(Self::as_string_form)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Equality per spec.md §4.6: `==`/`!=` are defined across strings,
    /// numbers, and booleans; a type mismatch yields `false`, never an
    /// error.
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    /// Ordering per spec.md §4.6: numeric comparison for numbers, lexical
    /// for strings, `None` (never an error) for anything else.
    pub fn partial_cmp_loose(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a.partial_cmp(b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// `contains`: substring for strings, element membership for lists.
    pub fn contains(&self, needle: &Self) -> bool {
        match self {
            Self::Str(s) => {
                if let Self::Str(n) = needle {
                    s.contains(n.as_str())
                } else {
                    false
                }
            }
            Self::List(items) => items.iter().any(|item| item.loose_eq(needle)),
            _ => false,
        }
    }

    /// `in`: membership in a list literal of matching type. Per DESIGN.md's
    /// Open Question decision, the validator already rejected heterogeneous
    /// list literals, so this is a plain scan.
    pub fn in_list(&self, list: &[Self]) -> bool {
        list.iter().any(|item| item.loose_eq(self))
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string_form())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_eq_across_numeric_types() {
        assert!(AttributeValue::Int(3).loose_eq(&AttributeValue::Float(3.0)));
        assert!(!AttributeValue::Int(3).loose_eq(&AttributeValue::Str("3".into())));
    }

    #[test]
    fn ordering_is_lexical_for_strings() {
        assert_eq!(
            AttributeValue::Str("a".into()).partial_cmp_loose(&AttributeValue::Str("b".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn ordering_none_across_mismatched_types_never_panics() {
        assert_eq!(
            AttributeValue::Bool(true).partial_cmp_loose(&AttributeValue::Int(1)),
            None
        );
    }

    #[test]
    fn contains_substring_and_list_membership() {
        assert!(AttributeValue::Str("hello world".into()).contains(&AttributeValue::Str("wor".into())));
        let list = AttributeValue::List(vec![AttributeValue::Int(1), AttributeValue::Int(2)]);
        assert!(list.contains(&AttributeValue::Int(2)));
        assert!(!list.contains(&AttributeValue::Int(3)));
    }

    #[test]
    fn in_list_membership() {
        let list = vec![AttributeValue::Str("a".into()), AttributeValue::Str("b".into())];
        assert!(AttributeValue::Str("a".into()).in_list(&list));
        assert!(!AttributeValue::Str("c".into()).in_list(&list));
    }
}
