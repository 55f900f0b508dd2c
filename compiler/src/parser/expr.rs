//! Pratt-style expression parsing following `BinaryOp::precedence`.

use super::Parser;
use crate::ast::{AssignTarget, BinaryOp, Expr, PostfixOp, Span, UnaryOp};
use crate::error::BlochResult;
use crate::lexer::Token;

impl Parser {
    pub(crate) fn parse_expr(&mut self) -> BlochResult<Expr> {
        self.parse_assignment()
    }

    /// Level 1: `=`, right-associative.
    fn parse_assignment(&mut self) -> BlochResult<Expr> {
        let lhs = self.parse_or()?;
        if matches!(self.peek(), Some(Token::OpAssign)) {
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_assignment()?;
            let target = self.expr_to_assign_target(lhs)?;
            return Ok(Expr::Assign(target, Box::new(rhs), span));
        }
        Ok(lhs)
    }

    fn expr_to_assign_target(&mut self, expr: Expr) -> BlochResult<AssignTarget> {
        match expr {
            Expr::Variable(name, s) => Ok(AssignTarget::Variable(name, s)),
            Expr::MemberAccess(obj, name, s) => Ok(AssignTarget::Member(obj, name, s)),
            Expr::Index(coll, idx, s) => Ok(AssignTarget::Index(coll, idx, s)),
            other => {
                let (l, c) = (other.span().line, other.span().column);
                Err(self.err_at(l, c, "invalid assignment target"))
            }
        }
    }

    /// Level 2: `||`.
    fn parse_or(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OpOrOr)) {
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOp::Or, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 3: `&&`.
    fn parse_and(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_bitor()?;
        while matches!(self.peek(), Some(Token::OpAndAnd)) {
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_bitor()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOp::And, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 4: `|`.
    fn parse_bitor(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_bitxor()?;
        while matches!(self.peek(), Some(Token::OpPipe)) {
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_bitxor()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOp::BitOr, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 5: `^`.
    fn parse_bitxor(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_bitand()?;
        while matches!(self.peek(), Some(Token::OpCaret)) {
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_bitand()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOp::BitXor, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 6: `&`.
    fn parse_bitand(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), Some(Token::OpAmp)) {
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOp::BitAnd, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 7: `==` `!=`.
    fn parse_equality(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::OpEq) => BinaryOp::Eq,
                Some(Token::OpNeq) => BinaryOp::Neq,
                _ => break,
            };
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 8: `< > <= >=`.
    fn parse_relational(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::OpLt) => BinaryOp::Lt,
                Some(Token::OpGt) => BinaryOp::Gt,
                Some(Token::OpLe) => BinaryOp::Le,
                Some(Token::OpGe) => BinaryOp::Ge,
                _ => break,
            };
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 9: `+ -`.
    fn parse_additive(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::OpPlus) => BinaryOp::Add,
                Some(Token::OpMinus) => BinaryOp::Sub,
                _ => break,
            };
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 10: `* / %`.
    fn parse_multiplicative(&mut self) -> BlochResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::OpStar) => BinaryOp::Mul,
                Some(Token::OpSlash) => BinaryOp::Div,
                Some(Token::OpPercent) => BinaryOp::Mod,
                _ => break,
            };
            let span = lhs.span();
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs), span);
        }
        Ok(lhs)
    }

    /// Level 11: prefix `- ! ~`, right-associative, plus the cast heuristic.
    fn parse_unary(&mut self) -> BlochResult<Expr> {
        let (line, column) = self.current_loc();
        let span = Span::new(line, column);
        let op = match self.peek() {
            Some(Token::OpMinus) => Some(UnaryOp::Neg),
            Some(Token::OpBang) => Some(UnaryOp::Not),
            Some(Token::OpTilde) => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(operand), span));
        }
        if matches!(self.peek(), Some(Token::ParenOpen)) {
            if let Some(cast) = self.try_parse_cast(span)? {
                return Ok(cast);
            }
        }
        self.parse_postfix()
    }

    /// `(Type) expr` when the parenthesised contents parse as a type and
    /// the close-paren is followed by something that can start an
    /// expression.
    fn try_parse_cast(&mut self, span: Span) -> BlochResult<Option<Expr>> {
        let saved = self.pos;
        self.advance(); // '('
        let ty = if self.peek_starts_type() {
            self.parse_type().ok()
        } else {
            None
        };
        let ty = match ty {
            Some(ty) if matches!(self.peek(), Some(Token::ParenClose)) => ty,
            _ => {
                self.pos = saved;
                return Ok(None);
            }
        };
        self.advance(); // ')'
        if !self.peek_starts_expr() {
            self.pos = saved;
            return Ok(None);
        }
        let operand = self.parse_unary()?;
        Ok(Some(Expr::Cast(ty, Box::new(operand), span)))
    }

    fn peek_starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::IntegerLiteral(_))
                | Some(Token::LongLiteral(_))
                | Some(Token::FloatLiteral(_))
                | Some(Token::BitLiteral(_))
                | Some(Token::CharLiteral(_))
                | Some(Token::StringLiteral(_))
                | Some(Token::KwTrue)
                | Some(Token::KwFalse)
                | Some(Token::KwNull)
                | Some(Token::KwThis)
                | Some(Token::KwSuper)
                | Some(Token::KwNew)
                | Some(Token::Ident(_))
                | Some(Token::ParenOpen)
                | Some(Token::OpMinus)
                | Some(Token::OpBang)
                | Some(Token::OpTilde)
        )
    }

    /// Level 12: postfix `(args)`, `[idx]`, `.name`, `++`, `--`.
    fn parse_postfix(&mut self) -> BlochResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::ParenOpen) => {
                    let span = expr.span();
                    self.advance();
                    let args = self.parse_arg_list()?;
                    self.expect(&Token::ParenClose, "closing ')' of call arguments")?;
                    expr = Expr::Call(Box::new(expr), args, span);
                }
                Some(Token::BracketOpen) => {
                    let span = expr.span();
                    self.advance();
                    self.reject_negative_index_literal()?;
                    let index = self.parse_expr()?;
                    self.expect(&Token::BracketClose, "closing ']' of index expression")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index), span);
                }
                Some(Token::Dot) => {
                    let span = expr.span();
                    self.advance();
                    let name = self.expect_ident("member name after '.'")?;
                    expr = Expr::MemberAccess(Box::new(expr), name, span);
                }
                Some(Token::OpIncrement) => {
                    let span = expr.span();
                    self.advance();
                    expr = Expr::Postfix(PostfixOp::Inc, Box::new(expr), span);
                }
                Some(Token::OpDecrement) => {
                    let span = expr.span();
                    self.advance();
                    expr = Expr::Postfix(PostfixOp::Dec, Box::new(expr), span);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Constant negative literal indexing (`a[-1]`, `a[-(positive literal)]`)
    /// is rejected at parse time with a dedicated message.
    fn reject_negative_index_literal(&mut self) -> BlochResult<()> {
        let (l, c) = self.current_loc();
        let is_negative = match self.peek() {
            Some(Token::OpMinus) => match self.peek_at(1) {
                Some(Token::IntegerLiteral(_)) | Some(Token::LongLiteral(_)) => true,
                Some(Token::ParenOpen) => {
                    matches!(self.peek_at(2), Some(Token::IntegerLiteral(n)) if *n > 0)
                        || matches!(self.peek_at(2), Some(Token::LongLiteral(n)) if *n > 0)
                }
                _ => false,
            },
            _ => false,
        };
        if is_negative {
            return Err(self.err_at(l, c, "array index cannot be a negative constant"));
        }
        Ok(())
    }

    fn parse_arg_list(&mut self) -> BlochResult<Vec<Expr>> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::ParenClose)) {
            return Ok(args);
        }
        args.push(self.parse_expr()?);
        while matches!(self.peek(), Some(Token::Comma)) {
            self.advance();
            args.push(self.parse_expr()?);
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> BlochResult<Expr> {
        let (line, column) = self.current_loc();
        let span = Span::new(line, column);
        let token = self.peek().cloned();
        match token {
            Some(Token::IntegerLiteral(n)) => {
                self.advance();
                Ok(Expr::IntLiteral(n, span))
            }
            Some(Token::LongLiteral(n)) => {
                self.advance();
                Ok(Expr::LongLiteral(n, span))
            }
            Some(Token::FloatLiteral(f)) => {
                self.advance();
                Ok(Expr::FloatLiteral(f, span))
            }
            Some(Token::BitLiteral(b)) => {
                self.advance();
                Ok(Expr::BitLiteral(b, span))
            }
            Some(Token::CharLiteral(c)) => {
                self.advance();
                Ok(Expr::CharLiteral(c, span))
            }
            Some(Token::StringLiteral(s)) => {
                self.advance();
                Ok(Expr::StringLiteral(s, span))
            }
            Some(Token::KwTrue) => {
                self.advance();
                Ok(Expr::BoolLiteral(true, span))
            }
            Some(Token::KwFalse) => {
                self.advance();
                Ok(Expr::BoolLiteral(false, span))
            }
            Some(Token::KwNull) => {
                self.advance();
                Ok(Expr::NullLiteral(span))
            }
            Some(Token::KwThis) => {
                self.advance();
                Ok(Expr::This(span))
            }
            Some(Token::KwSuper) => {
                self.advance();
                Ok(Expr::Super(span))
            }
            Some(Token::KwNew) => self.parse_new_expr(span),
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(Expr::Variable(name, span))
            }
            Some(Token::ParenOpen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::ParenClose, "closing ')' of parenthesised expression")?;
                Ok(Expr::Paren(Box::new(inner), span))
            }
            Some(Token::BraceOpen) => self.parse_array_literal(span),
            Some(Token::KwMeasure) => {
                self.advance();
                let target = self.parse_unary()?;
                Ok(Expr::Measure(Box::new(target), span))
            }
            other => Err(self.err_at(
                line,
                column,
                format!("expected an expression, found {}", self.describe(other)),
            )),
        }
    }

    fn parse_new_expr(&mut self, span: Span) -> BlochResult<Expr> {
        self.advance(); // 'new'
        let ty = self.parse_type()?;
        self.expect(&Token::ParenOpen, "opening '(' of constructor arguments")?;
        let args = self.parse_arg_list()?;
        self.expect(&Token::ParenClose, "closing ')' of constructor arguments")?;
        Ok(Expr::New(ty, args, span))
    }

    fn parse_array_literal(&mut self, span: Span) -> BlochResult<Expr> {
        self.advance(); // '{'
        let mut elements = Vec::new();
        if !matches!(self.peek(), Some(Token::BraceClose)) {
            elements.push(self.parse_expr()?);
            while matches!(self.peek(), Some(Token::Comma)) {
                self.advance();
                elements.push(self.parse_expr()?);
            }
        }
        self.expect(&Token::BraceClose, "closing '}' of array literal")?;
        Ok(Expr::ArrayLiteral(elements, span))
    }
}
