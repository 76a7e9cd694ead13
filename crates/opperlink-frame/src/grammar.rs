//! Per-attribute value grammars.
//!
//! A line must pass [`GrammarRegistry::validate`] before it is decoded.
//! Tags without a registered grammar fall back to [`Grammar::Generic`]:
//! `ATT+<word>=<non-empty>`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::attribute::Attribute;
use crate::codec::{decode, AttributeCommand, ATTRIBUTE_TOKEN_PREFIX};
use crate::error::{FrameError, Result};

/// Grammar of a single comma-separated value token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// `-?\d+(\.\d+)?`
    SignedDecimal,
    /// `-?\d+`
    SignedInteger,
    /// `\d+`
    UnsignedInteger,
    /// `\d+(\.\d+)?`
    UnsignedDecimal,
    /// One to `max_len` ASCII digits.
    Digits { max_len: usize },
    /// Exactly one of the listed literals.
    OneOf(&'static [&'static str]),
}

impl Token {
    /// Returns true if `token` satisfies this grammar.
    pub fn matches(&self, token: &str) -> bool {
        match self {
            Self::SignedDecimal => unsigned_decimal(strip_sign(token)),
            Self::SignedInteger => all_digits(strip_sign(token)),
            Self::UnsignedInteger => all_digits(token),
            Self::UnsignedDecimal => unsigned_decimal(token),
            Self::Digits { max_len } => token.len() <= *max_len && all_digits(token),
            Self::OneOf(literals) => literals.contains(&token),
        }
    }
}

fn strip_sign(token: &str) -> &str {
    token.strip_prefix('-').unwrap_or(token)
}

fn all_digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn unsigned_decimal(token: &str) -> bool {
    match token.split_once('.') {
        Some((whole, fraction)) => all_digits(whole) && all_digits(fraction),
        None => all_digits(token),
    }
}

fn is_word(tag: &str) -> bool {
    !tag.is_empty() && tag.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

const BINARY: &[&str] = &["0", "1"];
const STABILITY: &[&str] = &["0", "1", "2"];

/// Grammar of a whole attribute line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grammar {
    /// `ATT+<TAG>` with no `=` and no value.
    NoValue,
    /// `ATT+<TAG>=` followed by exactly these comma-separated tokens.
    Tokens(Vec<Token>),
    /// `ATT+<TAG>=` followed by any non-empty text.
    Generic,
}

impl Grammar {
    fn accepts(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (Self::NoValue, None) => true,
            (Self::Tokens(tokens), Some(value)) => {
                let mut parts = value.split(',');
                let matched = tokens
                    .iter()
                    .all(|token| parts.next().is_some_and(|part| token.matches(part)));
                matched && parts.next().is_none()
            }
            (Self::Generic, Some(value)) => !value.is_empty(),
            _ => false,
        }
    }
}

/// Maps attribute tags to grammars.
#[derive(Debug, Clone)]
pub struct GrammarRegistry {
    grammars: BTreeMap<Attribute, Grammar>,
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GrammarRegistry {
    /// Registry holding the grammar of every known attribute.
    pub fn new() -> Self {
        use Token::*;

        let mut grammars = BTreeMap::new();
        grammars.insert(
            Attribute::Weight,
            Grammar::Tokens(vec![SignedDecimal, SignedInteger, OneOf(STABILITY)]),
        );
        grammars.insert(Attribute::Acknowledge, Grammar::Tokens(vec![OneOf(BINARY)]));
        grammars.insert(
            Attribute::Battery,
            Grammar::Tokens(vec![Digits { max_len: 3 }, OneOf(BINARY)]),
        );
        grammars.insert(Attribute::IdleTimeout, Grammar::Tokens(vec![UnsignedInteger]));
        grammars.insert(Attribute::Accuracy, Grammar::Tokens(vec![UnsignedDecimal]));
        grammars.insert(Attribute::LockThreshold, Grammar::Tokens(vec![UnsignedDecimal]));
        grammars.insert(Attribute::Filter, Grammar::Tokens(vec![UnsignedInteger]));
        grammars.insert(Attribute::AutoClose, Grammar::Tokens(vec![UnsignedInteger]));
        grammars.insert(Attribute::ZeroReference, Grammar::Tokens(vec![SignedInteger]));
        grammars.insert(
            Attribute::CalibrationReference,
            Grammar::Tokens(vec![SignedInteger, UnsignedDecimal]),
        );
        for attribute in [
            Attribute::HealthCheck,
            Attribute::PowerOff,
            Attribute::FactoryReset,
            Attribute::Reboot,
        ] {
            grammars.insert(attribute, Grammar::NoValue);
        }

        Self { grammars }
    }

    /// Register or replace the grammar for `attribute`.
    pub fn register(&mut self, attribute: Attribute, grammar: Grammar) -> Option<Grammar> {
        self.grammars.insert(attribute, grammar)
    }

    /// Grammar applied to `attribute`.
    pub fn grammar(&self, attribute: &Attribute) -> &Grammar {
        self.grammars.get(attribute).unwrap_or(&Grammar::Generic)
    }

    /// Returns true if `line` (without delimiter) is a well-formed command.
    pub fn validate(&self, line: &str) -> bool {
        let Some(body) = line.strip_prefix(ATTRIBUTE_TOKEN_PREFIX) else {
            return false;
        };
        let (tag, value) = match body.split_once('=') {
            Some((tag, value)) => (tag, Some(value)),
            None => (body, None),
        };
        if !is_word(tag) {
            return false;
        }
        self.grammar(&Attribute::from_tag(tag)).accepts(value)
    }

    /// Validate, then decode.
    pub fn parse(&self, line: &str) -> Result<AttributeCommand> {
        if !self.validate(line) {
            let attribute = line
                .strip_prefix(ATTRIBUTE_TOKEN_PREFIX)
                .and_then(|body| body.split('=').next())
                .unwrap_or_default()
                .to_string();
            return Err(FrameError::GrammarMismatch {
                attribute,
                line: line.to_string(),
            });
        }
        decode(line)
    }
}

/// Validate `line` against the built-in grammars.
pub fn validate(line: &str) -> bool {
    static DEFAULT: OnceLock<GrammarRegistry> = OnceLock::new();
    DEFAULT.get_or_init(GrammarRegistry::new).validate(line)
}
