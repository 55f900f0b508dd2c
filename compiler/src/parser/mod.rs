//! Recursive-descent parser: tokens → `Program`.
//!
//! Unlike a typical error-recovering parser, Bloch's contract is fail-fast
//! with no recovery — the first syntactic violation raises immediately and
//! parsing stops. Declarations and statements live here; type parsing is
//! in `types.rs` and expression parsing (the Pratt precedence ladder) is
//! in `expr.rs`.

mod expr;
mod types;

use crate::ast::*;
use crate::error::{BlochError, BlochResult};
use crate::lexer::{tokenize, SpannedToken, Token};

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

/// Parses a complete source file into a `Program`.
pub fn parse(source: &str) -> BlochResult<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    // -- token cursor helpers -------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _, _)| t)
    }

    fn current_loc(&self) -> (usize, usize) {
        match self.tokens.get(self.pos) {
            Some((_, line, col)) => (*line, *col),
            None => match self.tokens.last() {
                Some((_, line, col)) => (*line, *col),
                None => (1, 1),
            },
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _, _)| t.clone());
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn consume_if(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, context: &str) -> BlochResult<()> {
        if self.check(expected) {
            self.advance();
            Ok(())
        } else {
            let found = self.peek().cloned();
            Err(self.err_here(format!(
                "expected {} ({}), found {}",
                Self::token_text(expected),
                context,
                self.describe(found)
            )))
        }
    }

    fn expect_ident(&mut self, context: &str) -> BlochResult<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.err_here(format!(
                "expected an identifier for {}, found {}",
                context,
                self.describe(other)
            ))),
        }
    }

    fn err_here(&self, message: impl Into<String>) -> BlochError {
        let (line, col) = self.current_loc();
        BlochError::parse(line, col, message)
    }

    fn err_at(&self, line: usize, col: usize, message: impl Into<String>) -> BlochError {
        BlochError::parse(line, col, message)
    }

    fn describe(&self, token: Option<Token>) -> String {
        match token {
            Some(t) => Self::token_text(&t),
            None => "end of input".to_string(),
        }
    }

    fn token_text(token: &Token) -> String {
        match token {
            Token::Ident(name) => name.clone(),
            Token::IntegerLiteral(n) => n.to_string(),
            Token::StringLiteral(s) => format!("{:?}", s),
            Token::BraceOpen => "{".into(),
            Token::BraceClose => "}".into(),
            Token::ParenOpen => "(".into(),
            Token::ParenClose => ")".into(),
            Token::BracketOpen => "[".into(),
            Token::BracketClose => "]".into(),
            Token::Semicolon => ";".into(),
            Token::Comma => ",".into(),
            Token::Colon => ":".into(),
            Token::Dot => ".".into(),
            Token::Arrow => "->".into(),
            Token::OpAssign => "=".into(),
            _ => format!("{:?}", token),
        }
    }

    // -- program -----------------------------------------------------------

    fn parse_program(&mut self) -> BlochResult<Program> {
        let mut program = Program::new();

        while self.peek().is_some() {
            match self.peek() {
                Some(Token::KwImport) => program.imports.push(self.parse_import()?),
                Some(Token::KwClass) | Some(Token::KwStatic) | Some(Token::KwAbstract) => {
                    program.classes.push(self.parse_class()?);
                }
                Some(Token::At) | Some(Token::KwFunction) => {
                    program.functions.push(self.parse_function()?);
                }
                _ => {
                    let stmts = self.parse_stmt_flattened()?;
                    program.top_level_statements.extend(stmts);
                }
            }
        }

        program.shots = program
            .functions
            .iter()
            .find(|f| f.name == "main")
            .and_then(|f| f.shots);

        Ok(program)
    }

    fn parse_import(&mut self) -> BlochResult<ImportDecl> {
        let (line, column) = self.current_loc();
        self.advance(); // import
        let mut path = vec![self.expect_ident("import path segment")?];
        while self.consume_if(&Token::Dot) {
            path.push(self.expect_ident("import path segment")?);
        }
        self.expect(&Token::Semicolon, "';' after import")?;
        Ok(ImportDecl {
            path,
            span: Span::new(line, column),
        })
    }

    // -- annotations ---------------------------------------------------------

    /// `@tracked` is the only annotation legal before a variable declaration;
    /// anything else parsed here is a misplacement error.
    fn parse_var_annotations(&mut self) -> BlochResult<bool> {
        let mut tracked = false;
        while self.check(&Token::At) {
            let (line, col) = self.current_loc();
            self.advance();
            let name = self.expect_ident("annotation name")?;
            match name.as_str() {
                "tracked" => tracked = true,
                other => {
                    return Err(self.err_at(
                        line,
                        col,
                        format!("annotation '@{}' is not valid on a variable declaration", other),
                    ));
                }
            }
        }
        Ok(tracked)
    }

    /// `@quantum` and `@shots(N)` are the only annotations legal before a
    /// function/method declaration.
    fn parse_function_annotations(&mut self) -> BlochResult<(bool, Option<u64>)> {
        let mut is_quantum = false;
        let mut shots = None;
        while self.check(&Token::At) {
            let (line, col) = self.current_loc();
            self.advance();
            let name = self.expect_ident("annotation name")?;
            match name.as_str() {
                "quantum" => is_quantum = true,
                "shots" => {
                    self.expect(&Token::ParenOpen, "'(' after @shots")?;
                    let (nl, nc) = self.current_loc();
                    let n = match self.peek().cloned() {
                        Some(Token::IntegerLiteral(n)) if n > 0 => n as u64,
                        other => {
                            return Err(self.err_at(
                                nl,
                                nc,
                                format!(
                                    "@shots expects a positive integer literal, found {}",
                                    self.describe(other)
                                ),
                            ));
                        }
                    };
                    self.advance();
                    self.expect(&Token::ParenClose, "')' after @shots(N)")?;
                    shots = Some(n);
                }
                other => {
                    return Err(self.err_at(
                        line,
                        col,
                        format!(
                            "annotation '@{}' is not valid on a function or method",
                            other
                        ),
                    ));
                }
            }
        }
        Ok((is_quantum, shots))
    }

    // -- declarations --------------------------------------------------------

    fn parse_function(&mut self) -> BlochResult<FunctionDecl> {
        let (line, column) = self.current_loc();
        let span = Span::new(line, column);
        let (is_quantum, shots) = self.parse_function_annotations()?;
        self.expect(&Token::KwFunction, "'function' keyword")?;
        let name = self.expect_ident("function name")?;

        if name == "main" && is_quantum {
            return Err(self.err_at(line, column, "@quantum is forbidden on 'main'"));
        }

        self.expect(&Token::ParenOpen, "'(' opening parameter list")?;
        let params = self.parse_params()?;
        self.expect(&Token::ParenClose, "')' closing parameter list")?;
        self.expect(&Token::Arrow, "'->' before return type")?;
        let return_type = self.parse_type()?;

        if is_quantum {
            let ok = matches!(return_type, Type::Void(_))
                || matches!(
                    &return_type,
                    Type::Primitive(PrimitiveKind::Bit, _)
                ) || matches!(
                    &return_type,
                    Type::Array { element, .. } if matches!(**element, Type::Primitive(PrimitiveKind::Bit, _))
                );
            if !ok {
                return Err(self.err_at(
                    line,
                    column,
                    "@quantum functions must return bit, bit[], or void",
                ));
            }
        }
        if name != "main" && shots.is_some() {
            return Err(self.err_at(line, column, "@shots(N) is only valid on 'main'"));
        }

        self.expect(&Token::BraceOpen, "'{' opening function body")?;
        let body = self.parse_block_body()?;
        self.expect(&Token::BraceClose, "'}' closing function body")?;

        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            is_quantum,
            shots,
            span,
        })
    }

    fn parse_params(&mut self) -> BlochResult<Vec<Param>> {
        let mut params = Vec::new();
        if self.check(&Token::ParenClose) {
            return Ok(params);
        }
        loop {
            let (line, column) = self.current_loc();
            let ty = self.parse_type()?;
            let name = self.expect_ident("parameter name")?;
            params.push(Param {
                name,
                ty,
                span: Span::new(line, column),
            });
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_class(&mut self) -> BlochResult<ClassDecl> {
        let (line, column) = self.current_loc();
        let span = Span::new(line, column);

        let mut is_static = false;
        let mut is_abstract = false;
        loop {
            match self.peek() {
                Some(Token::KwStatic) if !is_static => {
                    is_static = true;
                    self.advance();
                }
                Some(Token::KwAbstract) if !is_abstract => {
                    is_abstract = true;
                    self.advance();
                }
                _ => break,
            }
        }

        self.expect(&Token::KwClass, "'class' keyword")?;
        let name = self.expect_ident("class name")?;

        let type_params = if self.consume_if(&Token::OpLt) {
            let mut params = vec![self.parse_type_param()?];
            while self.consume_if(&Token::Comma) {
                params.push(self.parse_type_param()?);
            }
            self.expect(&Token::OpGt, "'>' closing type parameter list")?;
            params
        } else {
            Vec::new()
        };

        let base = if self.consume_if(&Token::KwExtends) {
            Some(self.parse_type()?)
        } else {
            None
        };

        self.expect(&Token::BraceOpen, "'{' opening class body")?;
        let default_visibility = if is_static {
            Visibility::Public
        } else {
            Visibility::Private
        };
        let mut members = Vec::new();
        while !self.check(&Token::BraceClose) {
            members.push(self.parse_class_member(&name, default_visibility)?);
        }
        self.expect(&Token::BraceClose, "'}' closing class body")?;

        Ok(ClassDecl {
            name,
            type_params,
            base,
            is_static,
            is_abstract,
            members,
            span,
        })
    }

    fn parse_type_param(&mut self) -> BlochResult<TypeParam> {
        let name = self.expect_ident("type parameter name")?;
        let bound = if self.consume_if(&Token::KwExtends) {
            Some(self.parse_type()?)
        } else {
            None
        };
        Ok(TypeParam { name, bound })
    }

    fn parse_visibility(&mut self, default: Visibility) -> Visibility {
        match self.peek() {
            Some(Token::KwPublic) => {
                self.advance();
                Visibility::Public
            }
            Some(Token::KwPrivate) => {
                self.advance();
                Visibility::Private
            }
            Some(Token::KwProtected) => {
                self.advance();
                Visibility::Protected
            }
            _ => default,
        }
    }

    fn parse_class_member(
        &mut self,
        class_name: &str,
        default_visibility: Visibility,
    ) -> BlochResult<ClassMember> {
        let (line, column) = self.current_loc();
        let span = Span::new(line, column);
        let visibility = self.parse_visibility(default_visibility);

        if self.check(&Token::KwConstructor) {
            self.advance();
            self.expect(&Token::ParenOpen, "'(' opening constructor parameters")?;
            let params = self.parse_params()?;
            self.expect(&Token::ParenClose, "')' closing constructor parameters")?;
            self.expect(&Token::Arrow, "'->' before constructor return name")?;
            let ret_name = self.expect_ident("constructor return-type name")?;
            if ret_name != class_name {
                return Err(self.err_at(
                    line,
                    column,
                    format!(
                        "constructor return-type name must be '{}', found '{}'",
                        class_name, ret_name
                    ),
                ));
            }
            let body = self.parse_member_body()?;
            return Ok(ClassMember::Constructor(ConstructorDecl {
                visibility,
                params,
                body,
                span,
            }));
        }

        if self.check(&Token::KwDestructor) {
            self.advance();
            self.expect(&Token::ParenOpen, "'(' opening destructor parameters")?;
            self.expect(&Token::ParenClose, "')' — destructors take no parameters")?;
            self.expect(&Token::Arrow, "'->' before destructor return type")?;
            let ret = self.parse_type()?;
            if !ret.is_void() {
                return Err(self.err_at(line, column, "destructor must return 'void'"));
            }
            let body = self.parse_member_body()?;
            return Ok(ClassMember::Destructor(DestructorDecl {
                visibility,
                body,
                span,
            }));
        }

        let mut is_static = false;
        let mut is_virtual = false;
        let mut is_override = false;
        loop {
            match self.peek() {
                Some(Token::KwStatic) if !is_static => {
                    is_static = true;
                    self.advance();
                }
                Some(Token::KwVirtual) if !is_virtual => {
                    is_virtual = true;
                    self.advance();
                }
                Some(Token::KwOverride) if !is_override => {
                    is_override = true;
                    self.advance();
                }
                _ => break,
            }
        }

        if self.check(&Token::At) || self.check(&Token::KwFunction) {
            let (is_quantum, _) = self.parse_function_annotations()?;
            self.expect(&Token::KwFunction, "'function' keyword")?;
            let name = self.expect_ident("method name")?;
            self.expect(&Token::ParenOpen, "'(' opening method parameters")?;
            let params = self.parse_params()?;
            self.expect(&Token::ParenClose, "')' closing method parameters")?;
            self.expect(&Token::Arrow, "'->' before method return type")?;
            let return_type = self.parse_type()?;

            let body = if is_virtual && self.check(&Token::Semicolon) {
                self.advance();
                None
            } else {
                self.expect(&Token::BraceOpen, "'{' opening method body")?;
                let stmts = self.parse_block_body()?;
                self.expect(&Token::BraceClose, "'}' closing method body")?;
                Some(stmts)
            };

            return Ok(ClassMember::Method(MethodDecl {
                visibility,
                is_static,
                is_virtual,
                is_override,
                name,
                params,
                return_type,
                body,
                is_quantum,
                span,
            }));
        }

        // field
        let is_final = self.consume_if(&Token::KwFinal);
        let is_tracked = self.parse_var_annotations()?;
        let ty = self.parse_type()?;
        let name = self.expect_ident("field name")?;
        let init = if self.consume_if(&Token::OpAssign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&Token::Semicolon, "';' after field declaration")?;

        Ok(ClassMember::Field(FieldDecl {
            visibility,
            ty,
            name,
            is_final,
            is_static,
            is_tracked,
            init,
            span,
        }))
    }

    fn parse_member_body(&mut self) -> BlochResult<MemberBody> {
        if self.consume_if(&Token::OpAssign) {
            self.expect(&Token::KwDefault, "'default' after '='")?;
            self.expect(&Token::Semicolon, "';' after '= default'")?;
            return Ok(MemberBody::Default);
        }
        self.expect(&Token::BraceOpen, "'{' opening body")?;
        let stmts = self.parse_block_body()?;
        self.expect(&Token::BraceClose, "'}' closing body")?;
        Ok(MemberBody::Block(stmts))
    }

    // -- statements -----------------------------------------------------------

    fn parse_block_body(&mut self) -> BlochResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.check(&Token::BraceClose) && self.peek().is_some() {
            stmts.extend(self.parse_stmt_flattened()?);
        }
        Ok(stmts)
    }

    /// Most statements produce exactly one `Stmt`; a multi-declaration
    /// (`qubit a, b, c;`) produces one per declared name.
    fn parse_stmt_flattened(&mut self) -> BlochResult<Vec<Stmt>> {
        self.parse_stmt()
    }

    fn parse_stmt(&mut self) -> BlochResult<Vec<Stmt>> {
        match self.peek() {
            Some(Token::BraceOpen) => Ok(vec![self.parse_block_stmt()?]),
            Some(Token::KwReturn) => Ok(vec![self.parse_return_stmt()?]),
            Some(Token::KwIf) => Ok(vec![self.parse_if_stmt()?]),
            Some(Token::KwFor) => Ok(vec![self.parse_for_stmt()?]),
            Some(Token::KwWhile) => Ok(vec![self.parse_while_stmt()?]),
            Some(Token::KwEcho) => Ok(vec![self.parse_echo_stmt()?]),
            Some(Token::KwReset) => Ok(vec![self.parse_reset_stmt()?]),
            Some(Token::KwMeasure) => Ok(vec![self.parse_measure_stmt()?]),
            Some(Token::KwDestroy) => Ok(vec![self.parse_destroy_stmt()?]),
            Some(Token::At) | Some(Token::KwFinal) => self.parse_var_decl_stmt(),
            Some(tok) if self.token_starts_primitive_type(tok) => self.parse_var_decl_stmt(),
            Some(Token::Ident(name)) if self.ident_starts_var_decl(&name.clone()) => {
                self.parse_var_decl_stmt()
            }
            _ => Ok(vec![self.parse_expr_or_ternary_stmt()?]),
        }
    }

    fn token_starts_primitive_type(&self, tok: &Token) -> bool {
        matches!(
            tok,
            Token::KwInt
                | Token::KwLong
                | Token::KwFloat
                | Token::KwBit
                | Token::KwBoolean
                | Token::KwString
                | Token::KwChar
                | Token::KwQubit
        )
    }

    /// An identifier starts a variable declaration only when followed by
    /// another identifier (`Type name`), disambiguating `Foo x;` from a
    /// bare expression statement like `foo();` or `foo = 1;`.
    fn ident_starts_var_decl(&self, _name: &str) -> bool {
        let mut offset = 1;
        if matches!(self.peek_at(offset), Some(Token::OpLt)) {
            let mut depth = 1;
            offset += 1;
            while depth > 0 {
                match self.peek_at(offset) {
                    Some(Token::OpLt) => depth += 1,
                    Some(Token::OpGt) => depth -= 1,
                    Some(_) => {}
                    None => return false,
                }
                offset += 1;
            }
        }
        while matches!(self.peek_at(offset), Some(Token::BracketOpen)) {
            offset += 1;
            while !matches!(self.peek_at(offset), Some(Token::BracketClose) | None) {
                offset += 1;
            }
            offset += 1;
        }
        matches!(self.peek_at(offset), Some(Token::Ident(_)))
    }

    fn parse_var_decl_stmt(&mut self) -> BlochResult<Vec<Stmt>> {
        let (line, column) = self.current_loc();
        let span = Span::new(line, column);
        let is_tracked = self.parse_var_annotations()?;
        let is_final = self.consume_if(&Token::KwFinal);
        let ty = self.parse_type()?;
        if ty.is_void() {
            return Err(self.err_at(line, column, "'void' is not a valid variable type"));
        }

        let mut names = vec![self.expect_ident("variable name")?];
        let mut has_initializer = false;
        let init = if self.consume_if(&Token::OpAssign) {
            has_initializer = true;
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut is_multi = false;
        while self.consume_if(&Token::Comma) {
            is_multi = true;
            names.push(self.expect_ident("variable name")?);
        }

        self.expect(&Token::Semicolon, "';' after variable declaration")?;

        if is_multi {
            if !matches!(ty, Type::Primitive(PrimitiveKind::Qubit, _)) {
                return Err(self.err_at(
                    line,
                    column,
                    "multi-declaration is only allowed for 'qubit' variables",
                ));
            }
            if has_initializer {
                return Err(self.err_at(
                    line,
                    column,
                    "multi-declaration cannot carry an initializer",
                ));
            }
        }

        if is_final && init.is_none() {
            return Err(self.err_at(line, column, "'final' variable must have an initializer"));
        }

        Ok(names
            .into_iter()
            .map(|name| {
                Stmt::VarDecl(VarDecl {
                    ty: ty.clone(),
                    name,
                    init: init.clone(),
                    is_final,
                    is_tracked,
                    span,
                })
            })
            .collect())
    }

    fn parse_block_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        let stmts = self.parse_block_body()?;
        self.expect(&Token::BraceClose, "'}' closing block")?;
        Ok(Stmt::Block(stmts, Span::new(line, column)))
    }

    fn parse_return_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        let value = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::Semicolon, "';' after return statement")?;
        Ok(Stmt::Return(value, Span::new(line, column)))
    }

    fn parse_if_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        self.expect(&Token::ParenOpen, "'(' opening if condition")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::ParenClose, "')' closing if condition")?;
        let then_branch = Box::new(self.parse_single_stmt()?);
        let else_branch = if self.consume_if(&Token::KwElse) {
            Some(Box::new(self.parse_single_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If(cond, then_branch, else_branch, Span::new(line, column)))
    }

    fn parse_for_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        self.expect(&Token::ParenOpen, "'(' opening for-loop header")?;

        let init = if self.check(&Token::Semicolon) {
            None
        } else {
            let stmts = self.parse_stmt_flattened_for_init()?;
            Some(Box::new(Stmt::Block(stmts, Span::new(line, column))))
        };
        if init.is_none() {
            self.expect(&Token::Semicolon, "';' after empty for-loop init")?;
        }

        let cond = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::Semicolon, "';' after for-loop condition")?;

        let incr = if self.check(&Token::ParenClose) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::ParenClose, "')' closing for-loop header")?;

        let body = Box::new(self.parse_single_stmt()?);
        Ok(Stmt::For {
            init,
            cond,
            incr,
            body,
            span: Span::new(line, column),
        })
    }

    /// For-loop init clauses are a single declaration or expression,
    /// terminated by `;` inside the header rather than as a free statement.
    fn parse_stmt_flattened_for_init(&mut self) -> BlochResult<Vec<Stmt>> {
        let stmts = self.parse_stmt()?;
        Ok(stmts)
    }

    fn parse_while_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        self.expect(&Token::ParenOpen, "'(' opening while condition")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::ParenClose, "')' closing while condition")?;
        let body = Box::new(self.parse_single_stmt()?);
        Ok(Stmt::While(cond, body, Span::new(line, column)))
    }

    fn parse_echo_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        let value = self.parse_expr()?;
        self.expect(&Token::Semicolon, "';' after echo statement")?;
        Ok(Stmt::Echo(value, Span::new(line, column)))
    }

    fn parse_reset_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        let target = self.parse_expr()?;
        self.expect(&Token::Semicolon, "';' after reset statement")?;
        Ok(Stmt::Reset(target, Span::new(line, column)))
    }

    fn parse_measure_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        let target = self.parse_expr()?;
        self.expect(&Token::Semicolon, "';' after measure statement")?;
        Ok(Stmt::Measure(target, Span::new(line, column)))
    }

    fn parse_destroy_stmt(&mut self) -> BlochResult<Stmt> {
        let (line, column) = self.current_loc();
        self.advance();
        let target = self.parse_expr()?;
        self.expect(&Token::Semicolon, "';' after destroy statement")?;
        Ok(Stmt::Destroy(target, Span::new(line, column)))
    }

    /// A single-statement position (the body of `if`/`for`/`while`), which
    /// also accepts the statement-level ternary form.
    fn parse_single_stmt(&mut self) -> BlochResult<Stmt> {
        self.parse_expr_or_ternary_stmt()
    }

    fn parse_expr_or_ternary_stmt(&mut self) -> BlochResult<Stmt> {
        if self.check(&Token::BraceOpen) {
            return self.parse_block_stmt();
        }
        if matches!(
            self.peek(),
            Some(Token::KwReturn)
                | Some(Token::KwIf)
                | Some(Token::KwFor)
                | Some(Token::KwWhile)
                | Some(Token::KwEcho)
                | Some(Token::KwReset)
                | Some(Token::KwMeasure)
                | Some(Token::KwDestroy)
                | Some(Token::At)
                | Some(Token::KwFinal)
        ) {
            let mut stmts = self.parse_stmt()?;
            return Ok(if stmts.len() == 1 {
                stmts.remove(0)
            } else {
                let span = stmts[0].span();
                Stmt::Block(stmts, span)
            });
        }
        if let Some(tok) = self.peek() {
            if self.token_starts_primitive_type(tok) {
                let mut stmts = self.parse_var_decl_stmt()?;
                return Ok(if stmts.len() == 1 {
                    stmts.remove(0)
                } else {
                    let span = stmts[0].span();
                    Stmt::Block(stmts, span)
                });
            }
        }

        let (line, column) = self.current_loc();
        let span = Span::new(line, column);
        let expr = self.parse_expr()?;

        // A statement-level ternary: `cond ? then : else;` where `then`
        // and `else` are themselves expression statements reduced to
        // statements at this position.
        if self.check(&Token::OpQuestion) {
            self.advance();
            let then_expr = self.parse_expr()?;
            self.expect(&Token::Colon, "':' in ternary statement")?;
            let else_expr = self.parse_expr()?;
            self.expect(&Token::Semicolon, "';' after ternary statement")?;
            let then_stmt = Box::new(Stmt::ExprStmt(then_expr, span));
            let else_stmt = Box::new(Stmt::ExprStmt(else_expr, span));
            return Ok(Stmt::TernaryStmt(expr, then_stmt, else_stmt, span));
        }

        self.expect(&Token::Semicolon, "';' after expression statement")?;
        if let Expr::Assign(AssignTarget::Variable(name, _), value, _) = expr {
            return Ok(Stmt::Assign(name, *value, span));
        }
        Ok(Stmt::ExprStmt(expr, span))
    }
}
