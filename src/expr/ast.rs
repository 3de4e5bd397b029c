//! Expression AST and parser

use serde_json::Value;

use crate::error::Issue;
use crate::expr::token::{tokenize, Spanned, Token};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Binary operators, loosest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// One node of a parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Ident(String),
    Member {
        object: Box<Expr>,
        field: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        function: String,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Parse `source` into an AST, or return every problem found.
pub fn parse(source: &str) -> Result<Expr, Vec<Issue>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_len: source.len(),
    };
    let expr = parser.ternary().map_err(|issue| vec![issue])?;
    if parser.pos < parser.tokens.len() {
        return Err(vec![Issue {
            message: "unexpected trailing input".to_string(),
            offset: parser.tokens[parser.pos].offset,
        }]);
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    source_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or(self.source_len)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), Issue> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(Issue {
                message: format!("expected {what}"),
                offset: self.offset(),
            })
        }
    }

    fn ternary(&mut self) -> Result<Expr, Issue> {
        let condition = self.or()?;
        if self.eat(&Token::Question) {
            let then = self.ternary()?;
            self.expect(Token::Colon, "':' in conditional")?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(condition)
    }

    fn or(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::And) {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.relation()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.relation()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn relation(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, Issue> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, Issue> {
        if self.eat(&Token::Not) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, Issue> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.bump() {
                    Some(Token::Ident(name)) => name,
                    _ => {
                        return Err(Issue {
                            message: "expected field or method name after '.'".to_string(),
                            offset: self.offset(),
                        });
                    }
                };
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        function: name,
                        receiver: Some(Box::new(expr)),
                        args,
                    };
                } else {
                    expr = Expr::Member {
                        object: Box::new(expr),
                        field: name,
                    };
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.ternary()?;
                self.expect(Token::RBracket, "']' after index")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, Issue> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen, "')' after arguments")?;
            break;
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, Issue> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::Int(value)) => Ok(Expr::Literal(Value::from(value))),
            Some(Token::Float(value)) => Ok(Expr::Literal(Value::from(value))),
            Some(Token::Str(value)) => Ok(Expr::Literal(Value::String(value))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    Ok(Expr::Call {
                        function: name,
                        receiver: None,
                        args,
                    })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.ternary()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.ternary()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(Token::RBracket, "']' after list literal")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = self.ternary()?;
                        self.expect(Token::Colon, "':' in map literal")?;
                        let value = self.ternary()?;
                        entries.push((key, value));
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(Token::RBrace, "'}' after map literal")?;
                        break;
                    }
                }
                Ok(Expr::Map(entries))
            }
            Some(other) => Err(Issue {
                message: format!("unexpected token {other:?}"),
                offset,
            }),
            None => Err(Issue {
                message: "unexpected end of expression".to_string(),
                offset,
            }),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
