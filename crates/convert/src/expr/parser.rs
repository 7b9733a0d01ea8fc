use serde_json::Value;

use super::lexer::{Spanned, Token, tokenize};
use crate::error::ConvertError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// Field lookup on the context value.
    Name(String),
    /// `$name`; the empty name is the context value, `$` is the root input.
    Variable(String),
    /// `lhs.rhs`: evaluates `rhs` with each value produced by `lhs` as context.
    Path(Box<Expr>, Box<Expr>),
    /// `expr[predicate]`: an index when the predicate is a number literal, a filter otherwise.
    Filter(Box<Expr>, Box<Expr>),
    /// `expr[]`: always produce an array.
    KeepArray(Box<Expr>),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Condition {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Object(Vec<(Expr, Expr)>),
    Array(Vec<Expr>),
    Call(String, Vec<Expr>),
    Block(Vec<Expr>),
    Bind(String, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    And,
    Or,
}

pub(crate) fn parse(source: &str) -> Result<Expr, ConvertError> {
    let tokens = tokenize(source)?;

    let mut parser = Parser {
        tokens,
        index: 0,
        end: source.len(),
    };

    let expr = parser.expression(0)?;

    match parser.peek() {
        None => Ok(expr),
        Some(spanned) => Err(syntax(spanned.position, format!("unexpected {}", describe(&spanned.token)))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    end: usize,
}

/// Left binding powers. Postfix `[` binds tighter than `.` so `a.b[0]` indexes each `b`.
fn infix_power(token: &Token) -> Option<u8> {
    let power = match token {
        Token::LeftBracket => 80,
        Token::Dot => 75,
        Token::Star | Token::Slash | Token::Percent => 60,
        Token::Plus | Token::Minus | Token::Ampersand => 50,
        Token::Equal
        | Token::NotEqual
        | Token::Less
        | Token::LessEqual
        | Token::Greater
        | Token::GreaterEqual => 40,
        Token::Name { name, quoted: false } if name == "in" => 40,
        Token::Name { name, quoted: false } if name == "and" => 30,
        Token::Name { name, quoted: false } if name == "or" => 25,
        Token::Question => 20,
        Token::Assign => 10,
        _ => return None,
    };

    Some(power)
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Result<Spanned, ConvertError> {
        let spanned = self
            .tokens
            .get(self.index)
            .cloned()
            .ok_or_else(|| syntax(self.end, "unexpected end of expression"))?;

        self.index += 1;

        Ok(spanned)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConvertError> {
        let spanned = self.next()?;

        if spanned.token == expected {
            Ok(())
        } else {
            Err(syntax(
                spanned.position,
                format!("expected {}, found {}", describe(&expected), describe(&spanned.token)),
            ))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().is_some_and(|s| &s.token == token) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expression(&mut self, min_power: u8) -> Result<Expr, ConvertError> {
        let mut lhs = self.prefix()?;

        loop {
            let Some(spanned) = self.peek() else { break };
            let Some(power) = infix_power(&spanned.token) else { break };

            if power <= min_power {
                break;
            }

            let Spanned { token, position } = self.next()?;

            lhs = match token {
                Token::LeftBracket => {
                    if self.eat(&Token::RightBracket) {
                        Expr::KeepArray(Box::new(lhs))
                    } else {
                        let predicate = self.expression(0)?;
                        self.expect(Token::RightBracket)?;

                        Expr::Filter(Box::new(lhs), Box::new(predicate))
                    }
                }
                Token::Dot => {
                    let rhs = self.expression(power)?;
                    Expr::Path(Box::new(lhs), Box::new(rhs))
                }
                Token::Question => {
                    let then = self.expression(0)?;

                    let otherwise = if self.eat(&Token::Colon) {
                        Some(Box::new(self.expression(power - 1)?))
                    } else {
                        None
                    };

                    Expr::Condition {
                        condition: Box::new(lhs),
                        then: Box::new(then),
                        otherwise,
                    }
                }
                Token::Assign => {
                    let Expr::Variable(name) = lhs else {
                        return Err(syntax(position, "left side of ':=' must be a variable"));
                    };

                    // right associative
                    let value = self.expression(power - 1)?;
                    Expr::Bind(name, Box::new(value))
                }
                token => {
                    let op = binary_op(&token).ok_or_else(|| syntax(position, "unknown operator"))?;
                    let rhs = self.expression(power)?;

                    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
                }
            };
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ConvertError> {
        let Spanned { token, position } = self.next()?;

        match token {
            Token::Number(n) => Ok(Expr::Literal(super::number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Name { name, quoted: false } if name == "true" => Ok(Expr::Literal(Value::Bool(true))),
            Token::Name { name, quoted: false } if name == "false" => Ok(Expr::Literal(Value::Bool(false))),
            Token::Name { name, quoted: false } if name == "null" => Ok(Expr::Literal(Value::Null)),
            Token::Name { name, .. } => Ok(Expr::Name(name)),
            Token::Variable(name) => {
                if self.eat(&Token::LeftParen) {
                    let args = self.list(Token::RightParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Token::Minus => {
                // binds tighter than any binary operator, looser than paths
                let operand = self.expression(70)?;
                Ok(Expr::Negate(Box::new(operand)))
            }
            Token::LeftParen => {
                let mut expressions = Vec::new();

                loop {
                    if self.eat(&Token::RightParen) {
                        break;
                    }

                    expressions.push(self.expression(0)?);

                    if !self.eat(&Token::Semicolon) {
                        self.expect(Token::RightParen)?;
                        break;
                    }
                }

                Ok(Expr::Block(expressions))
            }
            Token::LeftBracket => Ok(Expr::Array(self.list(Token::RightBracket)?)),
            Token::LeftBrace => {
                let mut entries = Vec::new();

                if !self.eat(&Token::RightBrace) {
                    loop {
                        let key = self.expression(0)?;
                        self.expect(Token::Colon)?;
                        let value = self.expression(0)?;

                        entries.push((key, value));

                        if !self.eat(&Token::Comma) {
                            self.expect(Token::RightBrace)?;
                            break;
                        }
                    }
                }

                Ok(Expr::Object(entries))
            }
            token => Err(syntax(position, format!("unexpected {}", describe(&token)))),
        }
    }

    fn list(&mut self, close: Token) -> Result<Vec<Expr>, ConvertError> {
        let mut items = Vec::new();

        if self.eat(&close) {
            return Ok(items);
        }

        loop {
            items.push(self.expression(0)?);

            if !self.eat(&Token::Comma) {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }
}

fn binary_op(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Subtract,
        Token::Star => BinaryOp::Multiply,
        Token::Slash => BinaryOp::Divide,
        Token::Percent => BinaryOp::Modulo,
        Token::Ampersand => BinaryOp::Concat,
        Token::Equal => BinaryOp::Equal,
        Token::NotEqual => BinaryOp::NotEqual,
        Token::Less => BinaryOp::Less,
        Token::LessEqual => BinaryOp::LessEqual,
        Token::Greater => BinaryOp::Greater,
        Token::GreaterEqual => BinaryOp::GreaterEqual,
        Token::Name { name, quoted: false } => match name.as_str() {
            "in" => BinaryOp::In,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            _ => return None,
        },
        _ => return None,
    };

    Some(op)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {n}"),
        Token::Str(s) => format!("string \"{s}\""),
        Token::Name { name, .. } => format!("name '{name}'"),
        Token::Variable(name) => format!("variable '${name}'"),
        Token::Dot => "'.'".into(),
        Token::LeftBracket => "'['".into(),
        Token::RightBracket => "']'".into(),
        Token::LeftBrace => "'{'".into(),
        Token::RightBrace => "'}'".into(),
        Token::LeftParen => "'('".into(),
        Token::RightParen => "')'".into(),
        Token::Comma => "','".into(),
        Token::Colon => "':'".into(),
        Token::Semicolon => "';'".into(),
        Token::Question => "'?'".into(),
        Token::Plus => "'+'".into(),
        Token::Minus => "'-'".into(),
        Token::Star => "'*'".into(),
        Token::Slash => "'/'".into(),
        Token::Percent => "'%'".into(),
        Token::Ampersand => "'&'".into(),
        Token::Equal => "'='".into(),
        Token::NotEqual => "'!='".into(),
        Token::Less => "'<'".into(),
        Token::LessEqual => "'<='".into(),
        Token::Greater => "'>'".into(),
        Token::GreaterEqual => "'>='".into(),
        Token::Assign => "':='".into(),
    }
}

fn syntax(position: usize, message: impl Into<String>) -> ConvertError {
    ConvertError::Syntax {
        position,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::{BinaryOp, Expr, parse};

    #[test]
    fn index_binds_to_the_last_step() {
        let expr = parse("a.b[0]").unwrap();

        let Expr::Path(lhs, rhs) = expr else {
            unreachable!("expected a path");
        };

        assert_eq!(*lhs, Expr::Name("a".into()));
        assert!(matches!(*rhs, Expr::Filter(..)));
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = parse("1 + 2 * 3 = 7 and true").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::And, ..)));
    }

    #[test]
    fn condition_without_else() {
        let expr = parse("stream ? 'yes'").unwrap();
        assert!(matches!(expr, Expr::Condition { otherwise: None, .. }));
    }

    #[test]
    fn object_and_call() {
        insta::assert_debug_snapshot!(parse(r#"{"model": $lowercase(model)}"#).unwrap(), @r#"
        Object(
            [
                (
                    Literal(
                        String("model"),
                    ),
                    Call(
                        "lowercase",
                        [
                            Name(
                                "model",
                            ),
                        ],
                    ),
                ),
            ],
        )
        "#);
    }

    #[test]
    fn binding_requires_a_variable() {
        let error = parse("a := 1").unwrap_err();
        insta::assert_snapshot!(error, @"expression syntax error at 2: left side of ':=' must be a variable");
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let error = parse("a b").unwrap_err();
        insta::assert_snapshot!(error, @"expression syntax error at 2: unexpected name 'b'");
    }

    #[test]
    fn unclosed_object() {
        let error = parse(r#"{"a": 1"#).unwrap_err();
        insta::assert_snapshot!(error, @"expression syntax error at 7: unexpected end of expression");
    }
}
