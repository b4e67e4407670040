//! Recursive-descent parser for condition expressions.
//!
//! Grammar:
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := not_expr ("and" not_expr)*
//! not_expr   := "not" not_expr | comparison
//! comparison := unary (comp_op unary)*
//! comp_op    := "==" | "!=" | "<" | ">" | "<=" | ">=" | "in" | "not" "in"
//! unary      := "-" unary | primary
//! primary    := literal | "(" expr ")" | "[" [expr ("," expr)* [","]] "]"
//! ```
//!
//! `and`/`or` chains parse into flat operand lists, and nesting through
//! parentheses, brackets, `not` and unary minus is capped at
//! [`MAX_DEPTH`], so tree depth is bounded for any input.

use super::lexer::Token;
use super::value::Value;
use super::ConditionError;

/// Maximum nesting of parentheses, lists, `not` and unary minus.
pub const MAX_DEPTH: usize = 64;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        };
        write!(f, "{}", s)
    }
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    /// Two or more operands.
    And(Vec<Expr>),
    /// Two or more operands.
    Or(Vec<Expr>),
    /// Chained comparison: `a < b < c` means `a < b and b < c`.
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
}

/// Parse a token stream into an expression tree.
pub fn parse(tokens: &[Token]) -> Result<Expr, ConditionError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ConditionError::Syntax(format!(
            "unexpected token {:?} after end of expression",
            token
        ))),
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ConditionError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ConditionError::Syntax(format!(
                "expected {:?}, found {:?}",
                expected, token
            ))),
            None => Err(ConditionError::Syntax(format!(
                "expected {:?}, found end of expression",
                expected
            ))),
        }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ConditionError>,
    ) -> Result<T, ConditionError> {
        if self.depth >= MAX_DEPTH {
            return Err(ConditionError::Syntax(
                "expression nested too deeply".to_string(),
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let first = self.parse_and()?;
        if self.peek() != Some(&Token::Or) {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.peek() == Some(&Token::Or) {
            self.advance();
            operands.push(self.parse_and()?);
        }
        Ok(Expr::Or(operands))
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let first = self.parse_not()?;
        if self.peek() != Some(&Token::And) {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.peek() == Some(&Token::And) {
            self.advance();
            operands.push(self.parse_not()?);
        }
        Ok(Expr::And(operands))
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.nested(Self::parse_not)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let first = self.parse_unary()?;
        let mut rest = Vec::new();

        while let Some(op) = self.comparison_operator() {
            let operand = self.parse_unary()?;
            rest.push((op, operand));
        }

        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    /// Consume a comparison operator if one is next.
    fn comparison_operator(&mut self) -> Option<CmpOp> {
        let op = match self.peek()? {
            Token::Eq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Gt => CmpOp::Gt,
            Token::Le => CmpOp::Le,
            Token::Ge => CmpOp::Ge,
            Token::In => CmpOp::In,
            Token::Not if self.peek_at(1) == Some(&Token::In) => {
                self.advance();
                CmpOp::NotIn
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let token = self
            .advance()
            .ok_or_else(|| ConditionError::Syntax("unexpected end of expression".to_string()))?;

        match token {
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s.clone()))),
            Token::Int(n) => Ok(Expr::Literal(Value::Int(*n))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(*f))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::LParen => self.nested(|p| {
                let inner = p.parse_or()?;
                p.expect(&Token::RParen)?;
                Ok(inner)
            }),
            Token::LBracket => self.nested(Self::parse_list),
            Token::Ident(name) => Err(ConditionError::UnknownName(name.clone())),
            other => Err(ConditionError::Syntax(format!("unexpected token {:?}", other))),
        }
    }

    /// Parse list items after the opening bracket.
    fn parse_list(&mut self) -> Result<Expr, ConditionError> {
        let mut items = Vec::new();

        loop {
            if self.peek() == Some(&Token::RBracket) {
                self.advance();
                break;
            }
            items.push(self.parse_or()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => break,
                Some(other) => {
                    return Err(ConditionError::Syntax(format!(
                        "expected ',' or ']' in list, found {:?}",
                        other
                    )))
                }
                None => return Err(ConditionError::Syntax("unterminated list".to_string())),
            }
        }

        Ok(Expr::List(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::lexer::tokenize;

    fn parse_str(input: &str) -> Result<Expr, ConditionError> {
        parse(&tokenize(input)?)
    }

    #[test]
    fn test_parse_comparison() {
        let expr = parse_str("'10' == '10'").unwrap();
        assert!(matches!(expr, Expr::Compare { ref rest, .. } if rest.len() == 1));
    }

    #[test]
    fn test_parse_precedence() {
        // and binds tighter than or
        let expr = parse_str("1 == 1 or 1 == 2 and 2 == 3").unwrap();
        match expr {
            Expr::Or(operands) => {
                assert_eq!(operands.len(), 2);
                assert!(matches!(operands[1], Expr::And(ref inner) if inner.len() == 2));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_in() {
        let expr = parse_str("'a' not in ['b', 'c']").unwrap();
        match expr {
            Expr::Compare { rest, .. } => {
                assert_eq!(rest[0].0, CmpOp::NotIn);
                assert!(matches!(rest[0].1, Expr::List(ref items) if items.len() == 2));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chained_comparison() {
        let expr = parse_str("1 < 2 <= 3").unwrap();
        assert!(matches!(expr, Expr::Compare { ref rest, .. } if rest.len() == 2));
    }

    #[test]
    fn test_parse_list_trailing_comma() {
        assert!(matches!(parse_str("[1, 2,]").unwrap(), Expr::List(ref items) if items.len() == 2));
        assert!(matches!(parse_str("[]").unwrap(), Expr::List(ref items) if items.is_empty()));
    }

    #[test]
    fn test_parse_flat_chains() {
        let expr = parse_str("1 == 1 and 2 == 2 and 3 == 3 and 4 == 4").unwrap();
        assert!(matches!(expr, Expr::And(ref operands) if operands.len() == 4));
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(parse_str(&ok).is_ok());

        for input in [
            format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1)),
            format!("{}1{}", "[".repeat(10_000), "]".repeat(10_000)),
            format!("{}1", "not ".repeat(10_000)),
            format!("{}1", "-".repeat(10_000)),
        ] {
            assert!(matches!(
                parse_str(&input).unwrap_err(),
                ConditionError::Syntax(ref m) if m.contains("nested too deeply")
            ));
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_str("1 ==").unwrap_err(), ConditionError::Syntax(_)));
        assert!(matches!(parse_str("(1 == 1").unwrap_err(), ConditionError::Syntax(_)));
        assert!(matches!(parse_str("1 1").unwrap_err(), ConditionError::Syntax(_)));
        assert!(matches!(parse_str("[1, 2").unwrap_err(), ConditionError::Syntax(_)));
        assert!(matches!(
            parse_str("status == 'x'").unwrap_err(),
            ConditionError::UnknownName(ref n) if n == "status"
        ));
    }
}
