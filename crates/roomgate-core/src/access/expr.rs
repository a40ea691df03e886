//! ============================================================================
//! Module Expressions - Boolean gating rules over completed modules
//! ============================================================================
//! Rules are written by hand in the Modules sheet, e.g. `AND(5, 6, OR(7, 8))`
//! or `1 and (2 or 3)`. Keywords are case-insensitive, whitespace is ignored,
//! `&`/`|` may stand in for `AND`/`OR`, and any other word or symbol is
//! stripped. Parentheses bind first, then `AND`, then `OR`.
//!
//! Structural mistakes (unbalanced parentheses, an operator missing an operand,
//! stray commas) are reported as `ExprError` instead of being guessed at.
//! ============================================================================

use std::collections::BTreeSet;
use std::fmt;

/// Why a rule could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("unbalanced parentheses")]
    UnbalancedParens,

    #[error("operator '{0}' is missing an operand")]
    MissingOperand(&'static str),

    #[error("unexpected '{0}'")]
    UnexpectedToken(String),

    #[error("{0}() needs at least one argument")]
    EmptyArguments(&'static str),

    #[error("module index '{0}' is out of range")]
    BadModuleIndex(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Module(u32),
    And,
    Or,
    Open,
    Close,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Module(n) => write!(f, "{}", n),
            Token::And => f.write_str("AND"),
            Token::Or => f.write_str("OR"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let index = digits
                .parse::<u32>()
                .map_err(|_| ExprError::BadModuleIndex(digits.clone()))?;
            tokens.push(Token::Module(index));
            continue;
        }

        if c.is_alphabetic() {
            let mut word = String::new();
            while let Some(&w) = chars.peek() {
                if !w.is_alphabetic() {
                    break;
                }
                word.push(w);
                chars.next();
            }
            match word.to_lowercase().as_str() {
                "and" => tokens.push(Token::And),
                "or" => tokens.push(Token::Or),
                // stray words ("module", "lab") are stripped
                _ => {}
            }
            continue;
        }

        match c {
            '&' => tokens.push(Token::And),
            '|' => tokens.push(Token::Or),
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            ',' => tokens.push(Token::Comma),
            _ => {}
        }
        chars.next();
    }

    Ok(tokens)
}

/// Parsed gating rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Module(u32),
    All(Vec<Expr>),
    Any(Vec<Expr>),
}

impl Expr {
    /// Parse a rule. `Ok(None)` means the rule is empty.
    pub fn parse(src: &str) -> Result<Option<Expr>, ExprError> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(Some(expr)),
            Some(Token::Close) => Err(ExprError::UnbalancedParens),
            Some(other) => Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }

    pub fn evaluate(&self, completed: &BTreeSet<u32>) -> bool {
        match self {
            Expr::Module(index) => completed.contains(index),
            Expr::All(items) => items.iter().all(|e| e.evaluate(completed)),
            Expr::Any(items) => items.iter().any(|e| e.evaluate(completed)),
        }
    }

    /// Every module index the rule mentions
    pub fn modules(&self) -> BTreeSet<u32> {
        let mut out = BTreeSet::new();
        self.collect_modules(&mut out);
        out
    }

    fn collect_modules(&self, out: &mut BTreeSet<u32>) {
        match self {
            Expr::Module(index) => {
                out.insert(*index);
            }
            Expr::All(items) | Expr::Any(items) => {
                for item in items {
                    item.collect_modules(out);
                }
            }
        }
    }
}

/// Parse and evaluate in one step; an empty rule is false
pub fn evaluate(src: &str, completed: &BTreeSet<u32>) -> Result<bool, ExprError> {
    Ok(Expr::parse(src)?
        .map(|e| e.evaluate(completed))
        .unwrap_or(false))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(Token::Or) {
            self.bump();
            if self.at_operand_end() {
                return Err(ExprError::MissingOperand("OR"));
            }
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Any(items)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut items = vec![self.parse_factor()?];
        while self.peek() == Some(Token::And) {
            self.bump();
            if self.at_operand_end() {
                return Err(ExprError::MissingOperand("AND"));
            }
            items.push(self.parse_factor()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::All(items)
        })
    }

    fn at_operand_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Close) | Some(Token::Comma))
    }

    fn parse_factor(&mut self) -> Result<Expr, ExprError> {
        match self.bump() {
            Some(Token::Module(index)) => Ok(Expr::Module(index)),
            Some(Token::Open) => {
                if self.peek() == Some(Token::Close) {
                    return Err(ExprError::UnexpectedToken(")".into()));
                }
                let inner = self.parse_or()?;
                match self.bump() {
                    Some(Token::Close) => Ok(inner),
                    None => Err(ExprError::UnbalancedParens),
                    Some(other) => Err(ExprError::UnexpectedToken(other.to_string())),
                }
            }
            Some(op @ (Token::And | Token::Or)) => {
                let name = if op == Token::And { "AND" } else { "OR" };
                if self.peek() != Some(Token::Open) {
                    return Err(ExprError::MissingOperand(name));
                }
                self.bump();
                let args = self.parse_arguments(name)?;
                Ok(if op == Token::And {
                    Expr::All(args)
                } else {
                    Expr::Any(args)
                })
            }
            Some(Token::Close) => Err(ExprError::UnbalancedParens),
            Some(Token::Comma) => Err(ExprError::UnexpectedToken(",".into())),
            // only reachable inside an unterminated group or call
            None => Err(ExprError::UnbalancedParens),
        }
    }

    /// Arguments of a call-style operator, after its opening parenthesis
    fn parse_arguments(&mut self, name: &'static str) -> Result<Vec<Expr>, ExprError> {
        if self.peek() == Some(Token::Close) {
            return Err(ExprError::EmptyArguments(name));
        }
        let mut args = Vec::new();
        loop {
            if matches!(self.peek(), Some(Token::Comma) | Some(Token::Close)) {
                return Err(ExprError::UnexpectedToken(
                    self.peek().map(|t| t.to_string()).unwrap_or_default(),
                ));
            }
            args.push(self.parse_or()?);
            match self.bump() {
                Some(Token::Comma) => {
                    // tolerate a trailing comma before the closing parenthesis
                    if self.peek() == Some(Token::Close) {
                        self.bump();
                        return Ok(args);
                    }
                }
                Some(Token::Close) => return Ok(args),
                None => return Err(ExprError::UnbalancedParens),
                Some(other) => return Err(ExprError::UnexpectedToken(other.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[u32]) -> BTreeSet<u32> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_call_form() {
        let rule = "AND(1, OR(2, 3))";
        assert!(evaluate(rule, &set(&[1, 3])).unwrap());
        assert!(!evaluate(rule, &set(&[1])).unwrap());
        assert!(!evaluate(rule, &set(&[])).unwrap());
        assert!(evaluate("and(5, 6, or(7, 8))", &set(&[5, 6, 8])).unwrap());
    }

    #[test]
    fn test_empty_rule_is_false() {
        assert!(!evaluate("", &set(&[1, 2])).unwrap());
        assert!(!evaluate("   ", &set(&[1])).unwrap());
        assert_eq!(Expr::parse("n/a").unwrap(), None);
    }

    #[test]
    fn test_infix_precedence() {
        // AND binds tighter than OR
        assert!(evaluate("1 OR 2 AND 3", &set(&[1])).unwrap());
        assert!(!evaluate("1 OR 2 AND 3", &set(&[2])).unwrap());
        assert!(evaluate("(1 OR 2) AND 3", &set(&[2, 3])).unwrap());
        assert!(!evaluate("(1 OR 2) AND 3", &set(&[1])).unwrap());
        assert!(evaluate("1&2|3", &set(&[3])).unwrap());
    }

    #[test]
    fn test_noise_is_stripped() {
        assert!(evaluate("Module 12 and module 4", &set(&[4, 12])).unwrap());
        assert!(evaluate("  4  ", &set(&[4])).unwrap());
        assert_eq!(
            Expr::parse("AND(1, 2)").unwrap().unwrap().modules(),
            set(&[1, 2])
        );
    }

    #[test]
    fn test_multi_digit_indices_are_not_confused() {
        assert!(!evaluate("12", &set(&[1, 2])).unwrap());
        assert!(evaluate("12", &set(&[12])).unwrap());
    }

    #[test]
    fn test_malformed_rules() {
        assert_eq!(Expr::parse("(1 AND 2"), Err(ExprError::UnbalancedParens));
        assert_eq!(Expr::parse("1 AND 2)"), Err(ExprError::UnbalancedParens));
        assert_eq!(Expr::parse("1 AND"), Err(ExprError::MissingOperand("AND")));
        assert_eq!(Expr::parse("OR 2"), Err(ExprError::MissingOperand("OR")));
        assert_eq!(Expr::parse("AND()"), Err(ExprError::EmptyArguments("AND")));
        assert!(matches!(
            Expr::parse("1, 2"),
            Err(ExprError::UnexpectedToken(_))
        ));
        assert!(matches!(Expr::parse("1 2"), Err(ExprError::UnexpectedToken(_))));
        assert_eq!(Expr::parse("AND(1,"), Err(ExprError::UnbalancedParens));
        assert!(matches!(
            Expr::parse("99999999999"),
            Err(ExprError::BadModuleIndex(_))
        ));
    }
}
