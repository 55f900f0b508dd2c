//! Type parsing: primitives, named/generic types, and array types whose
//! size may be a literal, a deferred expression, or unspecified.

use super::Parser;
use crate::ast::{ArraySize, PrimitiveKind, Span, Type};
use crate::error::BlochResult;
use crate::lexer::Token;

impl Parser {
    pub(crate) fn peek_starts_type(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::KwInt)
                | Some(Token::KwLong)
                | Some(Token::KwFloat)
                | Some(Token::KwBit)
                | Some(Token::KwBoolean)
                | Some(Token::KwString)
                | Some(Token::KwChar)
                | Some(Token::KwQubit)
                | Some(Token::KwVoid)
                | Some(Token::Ident(_))
        )
    }

    pub(crate) fn parse_type(&mut self) -> BlochResult<Type> {
        let (line, column) = self.current_loc();
        let span = Span::new(line, column);
        let mut base = match self.peek() {
            Some(Token::KwInt) => {
                self.advance();
                Type::Primitive(PrimitiveKind::Int, span)
            }
            Some(Token::KwLong) => {
                self.advance();
                Type::Primitive(PrimitiveKind::Long, span)
            }
            Some(Token::KwFloat) => {
                self.advance();
                Type::Primitive(PrimitiveKind::Float, span)
            }
            Some(Token::KwBit) => {
                self.advance();
                Type::Primitive(PrimitiveKind::Bit, span)
            }
            Some(Token::KwBoolean) => {
                self.advance();
                Type::Primitive(PrimitiveKind::Boolean, span)
            }
            Some(Token::KwString) => {
                self.advance();
                Type::Primitive(PrimitiveKind::String, span)
            }
            Some(Token::KwChar) => {
                self.advance();
                Type::Primitive(PrimitiveKind::Char, span)
            }
            Some(Token::KwQubit) => {
                self.advance();
                Type::Primitive(PrimitiveKind::Qubit, span)
            }
            Some(Token::KwVoid) => {
                self.advance();
                Type::Void(span)
            }
            Some(Token::Ident(_)) => self.parse_named_type(span)?,
            other => {
                return Err(self.err_here(format!(
                    "expected a type, found {}",
                    self.describe(other.cloned())
                )));
            }
        };

        while matches!(self.peek(), Some(Token::BracketOpen)) {
            self.advance();
            let (l, c) = self.current_loc();
            let size = if matches!(self.peek(), Some(Token::BracketClose)) {
                ArraySize::Unspecified
            } else if let Some(Token::IntegerLiteral(n)) = self.peek() {
                let n = *n;
                self.advance();
                if n < 0 {
                    return Err(self.err_at(l, c, "array size cannot be negative"));
                }
                ArraySize::Literal(n as usize)
            } else {
                ArraySize::Expr(Box::new(self.parse_expr()?))
            };
            self.expect(&Token::BracketClose, "closing ']' of array type")?;
            if base.is_void() {
                return Err(self.err_at(l, c, "array element type cannot be void"));
            }
            base = Type::Array {
                element: Box::new(base),
                size,
                span: Span::new(l, c),
            };
        }

        Ok(base)
    }

    fn parse_named_type(&mut self, span: Span) -> BlochResult<Type> {
        let mut path = vec![self.expect_ident("class name")?];
        while matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            path.push(self.expect_ident("qualified name segment")?);
        }

        let type_args = if matches!(self.peek(), Some(Token::OpLt)) {
            self.advance();
            let mut args = vec![self.parse_type()?];
            while matches!(self.peek(), Some(Token::Comma)) {
                self.advance();
                args.push(self.parse_type()?);
            }
            self.expect(&Token::OpGt, "closing '>' of type argument list")?;
            args
        } else {
            Vec::new()
        };

        Ok(Type::Named {
            path,
            type_args,
            span,
        })
    }
}
