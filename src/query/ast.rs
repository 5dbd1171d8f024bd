//! Query AST
//!
//! A query is a boolean tree whose leaves are `[key:]value` tokens:
//!
//! ```text
//! tag:red and not prop:"color=blue"   →   And(Token(tag, red), Not(Token(prop, color=blue)))
//! ```

use std::fmt;

/// Boolean query expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Token(Token),
}

impl Expr {
    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Or(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    pub fn token(key: Option<&str>, value: &str) -> Self {
        Expr::Token(Token::new(key, value))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(l, r) => write!(f, "({} and {})", l, r),
            Expr::Or(l, r) => write!(f, "({} or {})", l, r),
            Expr::Not(e) => write!(f, "not {}", e),
            Expr::Token(t) => write!(f, "{}", t),
        }
    }
}

/// A `[key:]value` leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub key: Option<String>,
    pub value: String,
}

impl Token {
    pub fn new(key: Option<&str>, value: &str) -> Self {
        Self {
            key: key.map(str::to_string),
            value: value.to_string(),
        }
    }

    /// Lowercase key, if any
    pub fn keyword(&self) -> Option<String> {
        self.key.as_deref().map(str::to_lowercase)
    }

    /// Split a dotted relation path (`likes.tag:dog`, `owner..tag:cat`)
    /// into its hops and terminal token
    pub fn path(&self) -> Option<RelPath> {
        let (chain, terminal) = match &self.key {
            Some(key) if key.contains('.') => {
                let (chain, tail) = key.rsplit_once('.')?;
                (chain, Token::new(Some(tail), &self.value))
            }
            None if self.value.ends_with(".*") => {
                let (chain, _) = self.value.rsplit_once('.')?;
                (chain, Token::new(None, "*"))
            }
            _ => return None,
        };

        let full = match &self.key {
            Some(key) => key.as_str(),
            None => self.value.as_str(),
        };
        let labels: Vec<String> = chain
            .split('.')
            .filter(|label| !label.is_empty())
            .map(str::to_lowercase)
            .collect();
        if labels.is_empty() {
            return None;
        }

        Some(RelPath {
            labels,
            forward: full.contains(".."),
            terminal,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}:\"{}\"", key, self.value),
            None => write!(f, "\"{}\"", self.value),
        }
    }
}

/// Relation chain ending in a terminal token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelPath {
    /// Lowercase relation labels, outermost first
    pub labels: Vec<String>,
    /// `..` somewhere in the path flips every hop to the forward direction
    pub forward: bool,
    pub terminal: Token,
}
