//! Phase B of semantic analysis: the program visitor.
//!
//! Like every other compiler stage, semantic analysis is fail-fast:
//! the first violation found is returned immediately rather than
//! accumulated alongside others.

use std::collections::HashMap;

use crate::ast::*;
use crate::error::BlochResult;

use super::errors::semantic_err;
use super::registry::{build_registry, OBJECT_CLASS};
use super::symbols::{ClassRegistry, MethodInfo, TypeInfo};

#[derive(Debug, Clone)]
struct VarBinding {
    ty: Type,
    is_final: bool,
    initialized: bool,
    /// Initializer expression, kept only for `final int` bindings so that
    /// array-size constant folding can re-fold a reference to one.
    const_value: Option<Expr>,
}

struct Scope {
    vars: HashMap<String, VarBinding>,
}

#[derive(Debug, Clone)]
struct FunctionSig {
    return_type: Type,
    param_types: Vec<Type>,
}

pub struct Analyzer<'a> {
    registry: &'a ClassRegistry,
    functions: &'a HashMap<String, Vec<FunctionSig>>,
    scopes: Vec<Scope>,
    current_class: Option<String>,
    type_params: HashMap<String, Option<Type>>,
    in_static_context: bool,
    in_constructor: bool,
    in_destructor: bool,
    return_type: Type,
    /// Final fields of the current constructor's class that must each be
    /// assigned exactly once as a top-level statement.
    final_field_targets: HashMap<String, bool>,
}

/// Runs both analysis phases over `program`, returning the completed
/// class registry for the evaluator to consume.
pub fn analyze(program: &Program) -> BlochResult<ClassRegistry> {
    let registry = build_registry(program)?;

    let mut functions: HashMap<String, Vec<FunctionSig>> = HashMap::new();
    for f in &program.functions {
        functions.entry(f.name.clone()).or_default().push(FunctionSig {
            return_type: f.return_type.clone(),
            param_types: f.params.iter().map(|p| p.ty.clone()).collect(),
        });
    }

    for class in &program.classes {
        let mut analyzer = Analyzer::new(&registry, &functions);
        analyzer.check_class(class)?;
    }

    for function in &program.functions {
        let mut analyzer = Analyzer::new(&registry, &functions);
        analyzer.check_function(function)?;
    }

    let mut analyzer = Analyzer::new(&registry, &functions);
    analyzer.in_static_context = true;
    analyzer.scopes.push(Scope { vars: HashMap::new() });
    for stmt in &program.top_level_statements {
        analyzer.check_stmt(stmt)?;
    }

    Ok(registry)
}

impl<'a> Analyzer<'a> {
    fn new(registry: &'a ClassRegistry, functions: &'a HashMap<String, Vec<FunctionSig>>) -> Self {
        Self {
            registry,
            functions,
            scopes: Vec::new(),
            current_class: None,
            type_params: HashMap::new(),
            in_static_context: false,
            in_constructor: false,
            in_destructor: false,
            return_type: Type::Void(Span::default()),
            final_field_targets: HashMap::new(),
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(Scope { vars: HashMap::new() });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare_var(&mut self, name: &str, ty: Type, is_final: bool, initialized: bool, span: Span) -> BlochResult<()> {
        self.declare_var_with_const(name, ty, is_final, initialized, None, span)
    }

    fn declare_var_with_const(
        &mut self,
        name: &str,
        ty: Type,
        is_final: bool,
        initialized: bool,
        const_value: Option<Expr>,
        span: Span,
    ) -> BlochResult<()> {
        let scope = self.scopes.last_mut().expect("scope stack must not be empty");
        if scope.vars.contains_key(name) {
            return Err(semantic_err(span, format!("'{}' is already declared in this scope", name)));
        }
        scope.vars.insert(
            name.to_string(),
            VarBinding { ty, is_final, initialized, const_value },
        );
        Ok(())
    }

    fn lookup_var(&self, name: &str) -> Option<&VarBinding> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.vars.get(name) {
                return Some(v);
            }
        }
        None
    }

    // -- classes --------------------------------------------------------

    fn check_class(&mut self, class: &ClassDecl) -> BlochResult<()> {
        self.current_class = Some(class.name.clone());
        self.type_params = class
            .type_params
            .iter()
            .map(|tp| (tp.name.clone(), tp.bound.clone()))
            .collect();

        for member in &class.members {
            match member {
                ClassMember::Field(f) => self.check_field_init(class, f)?,
                ClassMember::Method(m) => self.check_method(class, m)?,
                ClassMember::Constructor(c) => self.check_constructor(class, c)?,
                ClassMember::Destructor(d) => self.check_destructor(class, d)?,
            }
        }
        Ok(())
    }

    fn check_field_init(&mut self, class: &ClassDecl, field: &FieldDecl) -> BlochResult<()> {
        if field.ty.is_void() {
            return Err(semantic_err(field.span, "a field cannot have type 'void'"));
        }
        if let Type::Array { element, .. } = &field.ty {
            if element.is_void() {
                return Err(semantic_err(field.span, "array element type cannot be 'void'"));
            }
        }
        if let Some(init) = &field.init {
            self.in_static_context = field.is_static;
            self.push_scope();
            let init_ty = self.check_expr(init)?;
            let declared = self.type_info_of(&field.ty);
            self.require_assignable_info(&declared, &init_ty, field.span)?;
            self.pop_scope();
        }
        let _ = class;
        Ok(())
    }

    fn check_method(&mut self, class: &ClassDecl, method: &MethodDecl) -> BlochResult<()> {
        self.in_static_context = method.is_static;
        self.in_constructor = false;
        self.in_destructor = false;
        self.return_type = method.return_type.clone();

        if let Some(body) = &method.body {
            self.push_scope();
            for p in &method.params {
                if p.ty.is_void() {
                    return Err(semantic_err(p.span, "a parameter cannot have type 'void'"));
                }
                self.declare_var(&p.name, p.ty.clone(), false, true, p.span)?;
            }
            for stmt in body {
                self.check_stmt(stmt)?;
            }
            self.pop_scope();
        } else if !method.is_virtual {
            return Err(semantic_err(
                method.span,
                format!("non-virtual method '{}' must have a body", method.name),
            ));
        }

        let _ = class;
        Ok(())
    }

    fn check_constructor(&mut self, class: &ClassDecl, ctor: &ConstructorDecl) -> BlochResult<()> {
        self.in_static_context = false;
        self.in_constructor = true;
        self.in_destructor = false;
        self.return_type = Type::simple_named(&class.name, ctor.span);

        let final_fields: Vec<String> = class
            .members
            .iter()
            .filter_map(|m| match m {
                ClassMember::Field(f) if f.is_final && !f.is_static && f.init.is_none() => {
                    Some(f.name.clone())
                }
                _ => None,
            })
            .collect();
        self.final_field_targets = final_fields.iter().map(|n| (n.clone(), false)).collect();

        if let MemberBody::Block(body) = &ctor.body {
            self.push_scope();
            for p in &ctor.params {
                self.declare_var(&p.name, p.ty.clone(), false, true, p.span)?;
            }
            for (idx, stmt) in body.iter().enumerate() {
                self.check_constructor_stmt(stmt, idx == 0, class)?;
            }
            self.pop_scope();
        } else {
            // `= default`: parameters bind to identically-named fields.
            for p in &ctor.params {
                self.final_field_targets.insert(p.name.clone(), true);
            }
        }

        for (name, assigned) in &self.final_field_targets {
            if !assigned {
                return Err(semantic_err(
                    ctor.span,
                    format!("final field '{}' must be assigned as a top-level constructor statement", name),
                ));
            }
        }
        Ok(())
    }

    fn check_constructor_stmt(&mut self, stmt: &Stmt, is_first: bool, class: &ClassDecl) -> BlochResult<()> {
        if let Stmt::ExprStmt(Expr::Call(callee, _, span), _) = stmt {
            if matches!(**callee, Expr::Super(_)) && !is_first {
                return Err(semantic_err(*span, "super(...) must be the first statement in a constructor"));
            }
        }
        if let Some((name, span)) = top_level_field_assign(stmt) {
            if let Some(assigned) = self.final_field_targets.get_mut(name) {
                if *assigned {
                    return Err(semantic_err(
                        span,
                        format!("final field '{}' is assigned more than once", name),
                    ));
                }
                *assigned = true;
            }
        }
        let _ = class;
        self.check_stmt(stmt)
    }

    fn check_destructor(&mut self, class: &ClassDecl, dtor: &DestructorDecl) -> BlochResult<()> {
        self.in_static_context = false;
        self.in_constructor = false;
        self.in_destructor = true;
        self.return_type = Type::Void(dtor.span);
        if let MemberBody::Block(body) = &dtor.body {
            self.push_scope();
            for stmt in body {
                self.check_stmt(stmt)?;
            }
            self.pop_scope();
        }
        let _ = class;
        Ok(())
    }

    // -- free functions ---------------------------------------------------

    fn check_function(&mut self, function: &FunctionDecl) -> BlochResult<()> {
        self.in_static_context = true;
        self.in_constructor = false;
        self.in_destructor = false;
        self.return_type = function.return_type.clone();
        self.push_scope();
        for p in &function.params {
            if p.ty.is_void() {
                return Err(semantic_err(p.span, "a parameter cannot have type 'void'"));
            }
            self.declare_var(&p.name, p.ty.clone(), false, true, p.span)?;
        }
        for stmt in &function.body {
            self.check_stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    // -- statements ---------------------------------------------------------

    fn check_stmt(&mut self, stmt: &Stmt) -> BlochResult<()> {
        match stmt {
            Stmt::VarDecl(v) => self.check_var_decl(v),
            Stmt::Block(stmts, _) => {
                self.push_scope();
                for s in stmts {
                    self.check_stmt(s)?;
                }
                self.pop_scope();
                Ok(())
            }
            Stmt::ExprStmt(e, _) => self.check_expr(e).map(|_| ()),
            Stmt::Return(value, span) => {
                let ty = match value {
                    Some(e) => self.check_expr(e)?,
                    None => TypeInfo::Void,
                };
                if self.return_type.is_void() && value.is_some() {
                    return Err(semantic_err(*span, "cannot return a value from a void function"));
                }
                if !self.return_type.is_void() && value.is_none() {
                    return Err(semantic_err(*span, "missing return value"));
                }
                if !self.return_type.is_void() {
                    self.require_assignable(&self.return_type.clone(), &ty, *span)?;
                }
                Ok(())
            }
            Stmt::If(cond, then_b, else_b, span) => {
                self.require_boolean(cond, *span)?;
                self.check_stmt(then_b)?;
                if let Some(e) = else_b {
                    self.check_stmt(e)?;
                }
                Ok(())
            }
            Stmt::TernaryStmt(cond, then_b, else_b, span) => {
                self.require_boolean(cond, *span)?;
                self.check_stmt(then_b)?;
                self.check_stmt(else_b)
            }
            Stmt::For { init, cond, incr, body, span } => {
                self.push_scope();
                if let Some(init) = init {
                    self.check_stmt(init)?;
                }
                if let Some(cond) = cond {
                    self.require_boolean(cond, *span)?;
                }
                if let Some(incr) = incr {
                    self.check_expr(incr)?;
                }
                self.check_stmt(body)?;
                self.pop_scope();
                Ok(())
            }
            Stmt::While(cond, body, span) => {
                self.require_boolean(cond, *span)?;
                self.check_stmt(body)
            }
            Stmt::Echo(e, _) => self.check_expr(e).map(|_| ()),
            Stmt::Reset(e, span) => self.require_qubit(e, *span),
            Stmt::Measure(e, span) => self.require_qubit(e, *span),
            Stmt::Destroy(e, span) => {
                let ty = self.check_expr(e)?;
                match ty {
                    TypeInfo::Class { .. } => Ok(()),
                    _ => Err(semantic_err(*span, "'destroy' requires a class-typed reference")),
                }
            }
            Stmt::Assign(name, value, span) => {
                let value_ty = self.check_expr(value)?;
                let target_ty = self.resolve_name_type(name, *span)?;
                if let Some(binding) = self.lookup_var(name) {
                    if binding.is_final && binding.initialized {
                        return Err(semantic_err(*span, format!("cannot assign to final variable '{}'", name)));
                    }
                }
                self.require_assignable_info(&target_ty, &value_ty, *span)
            }
        }
    }

    fn check_var_decl(&mut self, v: &VarDecl) -> BlochResult<()> {
        if v.ty.is_void() {
            return Err(semantic_err(v.span, "a variable cannot have type 'void'"));
        }
        if let Type::Array { size: ArraySize::Expr(expr), element, .. } = &v.ty {
            if element.is_void() {
                return Err(semantic_err(v.span, "array element type cannot be 'void'"));
            }
            self.evaluate_const_int(expr)?;
        }
        if v.is_final && v.init.is_none() {
            return Err(semantic_err(v.span, format!("final variable '{}' must have an initializer", v.name)));
        }
        if let Some(init) = &v.init {
            let init_ty = self.check_expr(init)?;
            let declared = self.type_info_of(&v.ty);
            self.require_assignable_info(&declared, &init_ty, v.span)?;
        }
        let const_value = if v.is_final && matches!(v.ty, Type::Primitive(PrimitiveKind::Int, _)) {
            v.init.clone()
        } else {
            None
        };
        self.declare_var_with_const(&v.name, v.ty.clone(), v.is_final, v.init.is_some(), const_value, v.span)
    }

    fn require_boolean(&mut self, expr: &Expr, span: Span) -> BlochResult<()> {
        let ty = self.check_expr(expr)?;
        match ty {
            TypeInfo::Primitive(PrimitiveKind::Boolean) | TypeInfo::Primitive(PrimitiveKind::Bit) => Ok(()),
            _ => Err(semantic_err(span, "condition must be of type 'boolean' or 'bit'")),
        }
    }

    fn require_qubit(&mut self, expr: &Expr, span: Span) -> BlochResult<()> {
        let ty = self.check_expr(expr)?;
        match ty {
            TypeInfo::Primitive(PrimitiveKind::Qubit) => Ok(()),
            TypeInfo::Array(elem) if matches!(*elem, TypeInfo::Primitive(PrimitiveKind::Qubit)) => Ok(()),
            _ => Err(semantic_err(span, "expected a qubit or qubit[] operand")),
        }
    }

    // -- array size constant-folding ------------------------------------------

    fn evaluate_const_int(&mut self, expr: &Expr) -> BlochResult<i64> {
        let value = self.evaluate_const_int_inner(expr)?;
        if value < 0 {
            return Err(semantic_err(expr.span(), "array size must not be negative"));
        }
        Ok(value)
    }

    fn evaluate_const_int_inner(&mut self, expr: &Expr) -> BlochResult<i64> {
        match expr {
            Expr::IntLiteral(n, _) => Ok(*n),
            Expr::LongLiteral(n, _) => Ok(*n),
            Expr::Paren(inner, _) => self.evaluate_const_int_inner(inner),
            Expr::Unary(UnaryOp::Neg, inner, _) => Ok(-self.evaluate_const_int_inner(inner)?),
            Expr::Cast(ty, inner, span) => {
                if matches!(ty, Type::Primitive(PrimitiveKind::Int, _)) {
                    self.evaluate_const_int_inner(inner)
                } else {
                    Err(semantic_err(*span, "array size cast must target 'int'"))
                }
            }
            Expr::Binary(lhs, op, rhs, span) => {
                let l = self.evaluate_const_int_inner(lhs)?;
                let r = self.evaluate_const_int_inner(rhs)?;
                match op {
                    BinaryOp::Add => Ok(l + r),
                    BinaryOp::Sub => Ok(l - r),
                    BinaryOp::Mul => Ok(l * r),
                    BinaryOp::Div => {
                        if r == 0 {
                            Err(semantic_err(*span, "division by zero in constant array size expression"))
                        } else {
                            Ok(l / r)
                        }
                    }
                    BinaryOp::Mod => {
                        if r == 0 {
                            Err(semantic_err(*span, "modulo by zero in constant array size expression"))
                        } else {
                            Ok(l % r)
                        }
                    }
                    _ => Err(semantic_err(*span, "array size expression must be a constant integer expression")),
                }
            }
            Expr::Variable(name, span) => {
                let binding = self
                    .lookup_var(name)
                    .ok_or_else(|| semantic_err(*span, format!("unknown identifier '{}'", name)))?;
                if !binding.is_final || !matches!(binding.ty, Type::Primitive(PrimitiveKind::Int, _)) {
                    return Err(semantic_err(
                        *span,
                        format!("'{}' is not a final int usable in a constant expression", name),
                    ));
                }
                let init = binding
                    .const_value
                    .clone()
                    .ok_or_else(|| semantic_err(*span, format!("'{}' has no constant initializer", name)))?;
                self.evaluate_const_int_inner(&init)
            }
            other => Err(semantic_err(other.span(), "not a constant integer expression")),
        }
    }

    fn resolve_name_type(&mut self, name: &str, span: Span) -> BlochResult<TypeInfo> {
        if let Some(binding) = self.lookup_var(name) {
            return Ok(self.type_info_of(&binding.ty));
        }
        if !self.in_static_context {
            if let Some(class_name) = &self.current_class {
                for ancestor in self.registry.ancestry(class_name) {
                    if let Some(info) = self.registry.get(&ancestor) {
                        if let Some(f) = info.fields.iter().find(|f| f.name == name && !f.is_static) {
                            return Ok(self.type_info_of(&f.ty));
                        }
                    }
                }
            }
        }
        if let Some(class_name) = &self.current_class {
            for ancestor in self.registry.ancestry(class_name) {
                if let Some(info) = self.registry.get(&ancestor) {
                    if let Some(f) = info.fields.iter().find(|f| f.name == name && f.is_static) {
                        return Ok(self.type_info_of(&f.ty));
                    }
                }
            }
        }
        Err(semantic_err(span, format!("unknown identifier '{}'", name)))
    }

    // -- expressions ----------------------------------------------------

    fn check_expr(&mut self, expr: &Expr) -> BlochResult<TypeInfo> {
        match expr {
            Expr::IntLiteral(_, _) => Ok(TypeInfo::Primitive(PrimitiveKind::Int)),
            Expr::LongLiteral(_, _) => Ok(TypeInfo::Primitive(PrimitiveKind::Long)),
            Expr::FloatLiteral(_, _) => Ok(TypeInfo::Primitive(PrimitiveKind::Float)),
            Expr::BitLiteral(_, _) => Ok(TypeInfo::Primitive(PrimitiveKind::Bit)),
            Expr::CharLiteral(_, _) => Ok(TypeInfo::Primitive(PrimitiveKind::Char)),
            Expr::StringLiteral(_, _) => Ok(TypeInfo::Primitive(PrimitiveKind::String)),
            Expr::BoolLiteral(_, _) => Ok(TypeInfo::Primitive(PrimitiveKind::Boolean)),
            Expr::NullLiteral(_) => Ok(TypeInfo::Class { name: "null".into(), type_args: Vec::new() }),
            Expr::This(span) => {
                if self.in_static_context {
                    return Err(semantic_err(*span, "'this' cannot be used in a static context"));
                }
                let name = self.current_class.clone().unwrap_or_else(|| OBJECT_CLASS.to_string());
                Ok(TypeInfo::Class { name, type_args: Vec::new() })
            }
            Expr::Super(span) => {
                if self.in_static_context {
                    return Err(semantic_err(*span, "'super' cannot be used in a static context"));
                }
                let class_name = self
                    .current_class
                    .as_ref()
                    .ok_or_else(|| semantic_err(*span, "'super' used outside a class"))?;
                let info = self.registry.get(class_name).ok_or_else(|| semantic_err(*span, "unknown enclosing class"))?;
                let base = info.base.clone().unwrap_or_else(|| OBJECT_CLASS.to_string());
                Ok(TypeInfo::Class { name: base, type_args: Vec::new() })
            }
            Expr::Variable(name, span) => {
                if self.lookup_var(name).is_none()
                    && !self.field_visible_from_here(name)
                    && self.registry.get(name).is_some()
                {
                    return Ok(TypeInfo::ClassRef(name.clone()));
                }
                self.resolve_name_type(name, *span)
            }
            Expr::Paren(inner, _) => self.check_expr(inner),
            Expr::Unary(op, inner, span) => self.check_unary(*op, inner, *span),
            Expr::Binary(lhs, op, rhs, span) => self.check_binary(lhs, *op, rhs, *span),
            Expr::Postfix(_, inner, span) => {
                let ty = self.check_expr(inner)?;
                match ty {
                    TypeInfo::Primitive(PrimitiveKind::Int) | TypeInfo::Primitive(PrimitiveKind::Long) | TypeInfo::Primitive(PrimitiveKind::Float) => Ok(ty),
                    _ => Err(semantic_err(*span, "'++'/'--' require a numeric operand")),
                }
            }
            Expr::Cast(ty, inner, span) => {
                let inner_ty = self.check_expr(inner)?;
                let is_numeric_non_char = |t: &TypeInfo| {
                    matches!(
                        t,
                        TypeInfo::Primitive(PrimitiveKind::Int)
                            | TypeInfo::Primitive(PrimitiveKind::Long)
                            | TypeInfo::Primitive(PrimitiveKind::Float)
                            | TypeInfo::Primitive(PrimitiveKind::Bit)
                    )
                };
                let target_info = self.type_info_of(ty);
                if !is_numeric_non_char(&inner_ty) || !is_numeric_non_char(&target_info) {
                    return Err(semantic_err(
                        *span,
                        "cast requires both source and target to be numeric non-'char' primitives",
                    ));
                }
                Ok(target_info)
            }
            Expr::Call(callee, args, span) => self.check_call(callee, args, *span),
            Expr::MemberAccess(obj, name, span) => self.check_member_access(obj, name, *span),
            Expr::Index(coll, idx, span) => {
                let coll_ty = self.check_expr(coll)?;
                let idx_ty = self.check_expr(idx)?;
                if !matches!(idx_ty, TypeInfo::Primitive(PrimitiveKind::Int) | TypeInfo::Primitive(PrimitiveKind::Long)) {
                    return Err(semantic_err(*span, "array index must be 'int' or 'long'"));
                }
                match coll_ty {
                    TypeInfo::Array(elem) => Ok(*elem),
                    _ => Err(semantic_err(*span, "indexing requires an array value")),
                }
            }
            Expr::New(ty, args, span) => self.check_new(ty, args, *span),
            Expr::ArrayLiteral(elems, span) => {
                let mut elem_ty = None;
                for e in elems {
                    let t = self.check_expr(e)?;
                    elem_ty.get_or_insert(t);
                }
                let _ = span;
                Ok(TypeInfo::Array(Box::new(elem_ty.unwrap_or(TypeInfo::Void))))
            }
            Expr::Measure(target, span) => {
                self.require_qubit(target, *span)?;
                Ok(TypeInfo::Primitive(PrimitiveKind::Bit))
            }
            Expr::Assign(target, value, span) => {
                let value_ty = self.check_expr(value)?;
                let target_ty = match target {
                    AssignTarget::Variable(name, s) => {
                        let ty = self.resolve_name_type(name, *s)?;
                        if let Some(binding) = self.lookup_var(name) {
                            if binding.is_final && binding.initialized {
                                return Err(semantic_err(*s, format!("cannot assign to final variable '{}'", name)));
                            }
                        }
                        ty
                    }
                    AssignTarget::Member(obj, name, s) => self.check_member_access(obj, name, *s)?,
                    AssignTarget::Index(coll, idx, s) => {
                        let idx_ty = self.check_expr(idx)?;
                        if !matches!(idx_ty, TypeInfo::Primitive(PrimitiveKind::Int) | TypeInfo::Primitive(PrimitiveKind::Long)) {
                            return Err(semantic_err(*s, "array index must be 'int' or 'long'"));
                        }
                        match self.check_expr(coll)? {
                            TypeInfo::Array(elem) => *elem,
                            _ => return Err(semantic_err(*s, "indexing requires an array value")),
                        }
                    }
                };
                self.require_assignable_info(&target_ty, &value_ty, *span)?;
                Ok(value_ty)
            }
        }
    }

    /// True when `name` names an instance field reachable from the
    /// current (non-static) method/constructor context — used only to
    /// disambiguate a bare identifier between "local/field" and
    /// "class-name used as a value" in `check_expr`.
    fn field_visible_from_here(&self, name: &str) -> bool {
        if self.in_static_context {
            return false;
        }
        match &self.current_class {
            Some(class_name) => self.registry.ancestry(class_name).iter().any(|a| {
                self.registry
                    .get(a)
                    .map(|info| info.fields.iter().any(|f| f.name == name))
                    .unwrap_or(false)
            }),
            None => false,
        }
    }

    fn check_unary(&mut self, op: UnaryOp, inner: &Expr, span: Span) -> BlochResult<TypeInfo> {
        let ty = self.check_expr(inner)?;
        match op {
            UnaryOp::Neg => match ty {
                TypeInfo::Primitive(PrimitiveKind::Int)
                | TypeInfo::Primitive(PrimitiveKind::Long)
                | TypeInfo::Primitive(PrimitiveKind::Float) => Ok(ty),
                _ => Err(semantic_err(span, "unary '-' requires a numeric operand")),
            },
            UnaryOp::Not => match ty {
                TypeInfo::Primitive(PrimitiveKind::Boolean) | TypeInfo::Primitive(PrimitiveKind::Bit) => {
                    Ok(TypeInfo::Primitive(PrimitiveKind::Boolean))
                }
                _ => Err(semantic_err(span, "unary '!' requires a 'boolean' or 'bit' operand")),
            },
            UnaryOp::BitNot => match ty {
                TypeInfo::Primitive(PrimitiveKind::Bit) => Ok(ty),
                TypeInfo::Array(ref elem) if matches!(**elem, TypeInfo::Primitive(PrimitiveKind::Bit)) => Ok(ty),
                _ => Err(semantic_err(span, "unary '~' requires a 'bit' or 'bit[]' operand")),
            },
        }
    }

    fn check_binary(&mut self, lhs: &Expr, op: BinaryOp, rhs: &Expr, span: Span) -> BlochResult<TypeInfo> {
        let lty = self.check_expr(lhs)?;
        let rty = self.check_expr(rhs)?;

        match op {
            BinaryOp::Add if matches!(lty, TypeInfo::Primitive(PrimitiveKind::String)) || matches!(rty, TypeInfo::Primitive(PrimitiveKind::String)) => {
                Ok(TypeInfo::Primitive(PrimitiveKind::String))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => self.numeric_promotion(&lty, &rty, span),
            BinaryOp::Div => {
                self.numeric_promotion(&lty, &rty, span)?;
                Ok(TypeInfo::Primitive(PrimitiveKind::Float))
            }
            BinaryOp::Mod => match (&lty, &rty) {
                (TypeInfo::Primitive(PrimitiveKind::Int), TypeInfo::Primitive(PrimitiveKind::Int)) => {
                    Ok(TypeInfo::Primitive(PrimitiveKind::Int))
                }
                (TypeInfo::Primitive(PrimitiveKind::Long), TypeInfo::Primitive(PrimitiveKind::Int))
                | (TypeInfo::Primitive(PrimitiveKind::Int), TypeInfo::Primitive(PrimitiveKind::Long))
                | (TypeInfo::Primitive(PrimitiveKind::Long), TypeInfo::Primitive(PrimitiveKind::Long)) => {
                    Ok(TypeInfo::Primitive(PrimitiveKind::Long))
                }
                _ => Err(semantic_err(span, "'%' requires 'int' or 'long' operands")),
            },
            BinaryOp::Eq | BinaryOp::Neq => self.check_equality(&lty, &rty, span),
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                self.numeric_promotion(&lty, &rty, span)?;
                Ok(TypeInfo::Primitive(PrimitiveKind::Boolean))
            }
            BinaryOp::And | BinaryOp::Or => match (&lty, &rty) {
                (a, b)
                    if is_boolean_like(a) && is_boolean_like(b) =>
                {
                    Ok(TypeInfo::Primitive(PrimitiveKind::Boolean))
                }
                _ => Err(semantic_err(span, "'&&'/'||' require 'boolean'-like operands")),
            },
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => match (&lty, &rty) {
                (TypeInfo::Primitive(PrimitiveKind::Bit), TypeInfo::Primitive(PrimitiveKind::Bit)) => {
                    Ok(TypeInfo::Primitive(PrimitiveKind::Bit))
                }
                (TypeInfo::Array(a), TypeInfo::Array(b)) => {
                    if matches!(**a, TypeInfo::Primitive(PrimitiveKind::Bit)) && matches!(**b, TypeInfo::Primitive(PrimitiveKind::Bit)) {
                        Ok(TypeInfo::Array(Box::new(TypeInfo::Primitive(PrimitiveKind::Bit))))
                    } else {
                        Err(semantic_err(span, "bitwise array operators require 'bit[]' operands"))
                    }
                }
                _ => Err(semantic_err(span, "bitwise operators require 'bit' or 'bit[]' operands")),
            },
        }
    }

    fn numeric_promotion(&self, lty: &TypeInfo, rty: &TypeInfo, span: Span) -> BlochResult<TypeInfo> {
        use PrimitiveKind::*;
        let rank = |t: &TypeInfo| match t {
            TypeInfo::Primitive(Bit) => Some(0),
            TypeInfo::Primitive(Int) => Some(1),
            TypeInfo::Primitive(Long) => Some(2),
            TypeInfo::Primitive(Float) => Some(3),
            _ => None,
        };
        match (rank(lty), rank(rty)) {
            (Some(a), Some(b)) => {
                let max = a.max(b);
                Ok(match max {
                    0 | 1 => TypeInfo::Primitive(Int),
                    2 => TypeInfo::Primitive(Long),
                    _ => TypeInfo::Primitive(Float),
                })
            }
            _ => Err(semantic_err(span, "operator requires numeric operands")),
        }
    }

    fn check_equality(&self, lty: &TypeInfo, rty: &TypeInfo, span: Span) -> BlochResult<TypeInfo> {
        let is_null = |t: &TypeInfo| matches!(t, TypeInfo::Class { name, .. } if name == "null");
        if is_null(lty) || is_null(rty) {
            let other_ok = |t: &TypeInfo| matches!(t, TypeInfo::Class { .. }) || is_null(t);
            if other_ok(lty) && other_ok(rty) {
                return Ok(TypeInfo::Primitive(PrimitiveKind::Boolean));
            }
            return Err(semantic_err(span, "'null' can only be compared against a class reference"));
        }
        match (lty, rty) {
            (TypeInfo::Class { .. }, TypeInfo::Class { .. }) => Ok(TypeInfo::Primitive(PrimitiveKind::Boolean)),
            (a, b) if is_boolean_like(a) && is_boolean_like(b) => Ok(TypeInfo::Primitive(PrimitiveKind::Boolean)),
            (TypeInfo::Primitive(a), TypeInfo::Primitive(b)) if a == b => Ok(TypeInfo::Primitive(PrimitiveKind::Boolean)),
            (TypeInfo::Primitive(_), TypeInfo::Primitive(_)) => {
                self.numeric_promotion(lty, rty, span)?;
                Ok(TypeInfo::Primitive(PrimitiveKind::Boolean))
            }
            _ => Err(semantic_err(span, "operands of '=='/'!=' are not comparable")),
        }
    }

    fn check_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> BlochResult<TypeInfo> {
        let arg_types: Vec<TypeInfo> = args
            .iter()
            .map(|a| self.check_expr(a))
            .collect::<BlochResult<Vec<_>>>()?;

        if let Expr::Variable(name, _) = callee {
            if super::symbols::BUILTIN_GATES.contains_key(name.as_str()) {
                return Ok(TypeInfo::Void);
            }
            if let Some(overloads) = self.functions.get(name) {
                return self.select_function_overload(name, overloads, &arg_types, span);
            }
            // Not a gate or top-level function: an implicit `this.name(args)`.
            if self.in_static_context || self.current_class.is_none() {
                return Err(semantic_err(span, format!("unknown function '{}'", name)));
            }
            let class_name = self.current_class.clone().unwrap();
            return self.resolve_method_call(&TypeInfo::Class { name: class_name, type_args: Vec::new() }, name, &arg_types, span);
        }
        if let Expr::MemberAccess(obj, name, mspan) = callee {
            let obj_ty = self.check_expr(obj)?;
            return self.resolve_method_call(&obj_ty, name, &arg_types, *mspan);
        }
        Err(semantic_err(span, "call target is not callable"))
    }

    fn select_function_overload(
        &self,
        name: &str,
        overloads: &[FunctionSig],
        arg_types: &[TypeInfo],
        span: Span,
    ) -> BlochResult<TypeInfo> {
        let mut best: Option<(u32, &FunctionSig)> = None;
        let mut ambiguous = false;
        for sig in overloads {
            if sig.param_types.len() != arg_types.len() {
                continue;
            }
            let cost = match self.params_cost(&sig.param_types, arg_types) {
                Some(c) => c,
                None => continue,
            };
            match &best {
                None => best = Some((cost, sig)),
                Some((bc, _)) if cost < *bc => {
                    best = Some((cost, sig));
                    ambiguous = false;
                }
                Some((bc, _)) if cost == *bc => ambiguous = true,
                _ => {}
            }
        }
        if ambiguous {
            return Err(semantic_err(span, format!("ambiguous call to function '{}'", name)));
        }
        match best {
            Some((_, sig)) => Ok(self.type_info_of(&sig.return_type)),
            None => Err(semantic_err(span, format!("no overload of '{}' matches this argument list", name))),
        }
    }

    /// Sums per-argument `conversion_cost` for overload ranking.
    fn params_cost(&self, param_types: &[Type], arg_types: &[TypeInfo]) -> Option<u32> {
        let mut total = 0u32;
        for (p, a) in param_types.iter().zip(arg_types) {
            total += self.conversion_cost(&self.type_info_of(p), a)?;
        }
        Some(total)
    }

    fn conversion_cost(&self, target: &TypeInfo, value: &TypeInfo) -> Option<u32> {
        if let TypeInfo::Class { name, .. } = value {
            if name == "null" {
                return match target {
                    TypeInfo::Class { .. } => Some(0),
                    _ => None,
                };
            }
        }
        match (target, value) {
            (TypeInfo::Primitive(a), TypeInfo::Primitive(b)) => {
                self.conversion_cost_primitive(*a, *b).map(|c| c as u32)
            }
            (TypeInfo::Array(a), TypeInfo::Array(b)) => {
                if self.is_assignable(a, b) {
                    Some(0)
                } else {
                    None
                }
            }
            (TypeInfo::Class { name: tn, .. }, TypeInfo::Class { name: vn, .. }) => {
                self.registry.distance_in_inheritance(vn, tn).map(|d| d as u32)
            }
            (TypeInfo::TypeParam(a), TypeInfo::TypeParam(b)) if a == b => Some(0),
            (TypeInfo::TypeParam(_), TypeInfo::Class { .. }) => Some(0),
            _ => None,
        }
    }

    fn resolve_method_call(
        &self,
        obj_ty: &TypeInfo,
        name: &str,
        arg_types: &[TypeInfo],
        span: Span,
    ) -> BlochResult<TypeInfo> {
        let (class_name, static_only) = match obj_ty {
            TypeInfo::Class { name, .. } => (name.clone(), false),
            TypeInfo::ClassRef(name) => (name.clone(), true),
            TypeInfo::TypeParam(p) => {
                let bound = self
                    .type_params
                    .get(p)
                    .and_then(|b| b.clone())
                    .ok_or_else(|| semantic_err(span, format!("type parameter '{}' is not bound to a class type", p)))?;
                let bn = bound
                    .class_name()
                    .ok_or_else(|| semantic_err(span, format!("type parameter '{}' is not bound to a class type", p)))?
                    .to_string();
                (bn, false)
            }
            _ => return Err(semantic_err(span, "member access requires a class-typed value")),
        };

        // `super.method()` already resolves against the base class: its
        // receiver type is computed as the base in the `Expr::Super` arm
        // of `check_expr`, so a plain ancestry walk from `class_name` is
        // correct for both a normal and a `super` receiver.
        let ancestry = self.registry.ancestry(&class_name);

        let mut best: Option<(u32, &MethodInfo)> = None;
        let mut ambiguous = false;
        for ancestor in &ancestry {
            let info = match self.registry.get(ancestor) {
                Some(i) => i,
                None => continue,
            };
            for m in &info.methods {
                if m.name != name || m.param_types.len() != arg_types.len() {
                    continue;
                }
                if static_only && !m.is_static {
                    continue;
                }
                let cost = match self.params_cost(&m.param_types, arg_types) {
                    Some(c) => c,
                    None => continue,
                };
                match &best {
                    None => best = Some((cost, m)),
                    Some((bc, _)) if cost < *bc => {
                        best = Some((cost, m));
                        ambiguous = false;
                    }
                    Some((bc, _)) if cost == *bc => ambiguous = true,
                    _ => {}
                }
            }
            // Once we've found at least one candidate on the nearest
            // ancestor that declares this name, stop: a derived class's
            // own overloads shadow the base's (absent `override`, new
            // signatures are simply additional overloads collected by
            // the registry already, so a single ancestry walk suffices).
        }
        if ambiguous {
            return Err(semantic_err(span, format!("ambiguous call to method '{}'", name)));
        }
        match best {
            Some((_, m)) => {
                if static_only && !m.is_static {
                    return Err(semantic_err(span, format!("'{}' is not a static method of '{}'", name, class_name)));
                }
                self.check_visibility(&class_name, m.visibility, &m.owner, span)?;
                Ok(self.type_info_of(&m.return_type))
            }
            None => Err(semantic_err(span, format!("no method '{}' matching this call on '{}'", name, class_name))),
        }
    }

    /// Private members are visible only from within the declaring class;
    /// protected members from the declaring class or any subclass;
    /// public members unconditionally.
    fn check_visibility(&self, _accessor_static_class: &str, visibility: Visibility, owner: &str, span: Span) -> BlochResult<()> {
        let accessor = match &self.current_class {
            Some(c) => c.clone(),
            None => {
                return match visibility {
                    Visibility::Public => Ok(()),
                    _ => Err(semantic_err(span, "member is not accessible from top-level code")),
                }
            }
        };
        match visibility {
            Visibility::Public => Ok(()),
            Visibility::Private => {
                if accessor == owner {
                    Ok(())
                } else {
                    Err(semantic_err(span, format!("member of '{}' is private", owner)))
                }
            }
            Visibility::Protected => {
                if self.registry.is_subclass_of(&accessor, owner) || self.registry.is_subclass_of(owner, &accessor) {
                    Ok(())
                } else {
                    Err(semantic_err(span, format!("member of '{}' is protected", owner)))
                }
            }
        }
    }

    fn check_member_access(&mut self, obj: &Expr, name: &str, span: Span) -> BlochResult<TypeInfo> {
        let obj_ty = self.check_expr(obj)?;
        let (class_name, static_only) = match &obj_ty {
            TypeInfo::Class { name, .. } => (name.clone(), false),
            TypeInfo::ClassRef(name) => (name.clone(), true),
            TypeInfo::TypeParam(p) => {
                let bound = self
                    .type_params
                    .get(p)
                    .and_then(|b| b.clone())
                    .ok_or_else(|| semantic_err(span, format!("type parameter '{}' is not bound to a class type", p)))?;
                let bn = bound
                    .class_name()
                    .ok_or_else(|| semantic_err(span, format!("type parameter '{}' is not bound to a class type", p)))?
                    .to_string();
                (bn, false)
            }
            _ => return Err(semantic_err(span, "member access requires a class-typed value")),
        };
        for ancestor in self.registry.ancestry(&class_name) {
            if let Some(info) = self.registry.get(&ancestor) {
                if let Some(f) = info.fields.iter().find(|f| f.name == name) {
                    if static_only && !f.is_static {
                        return Err(semantic_err(span, format!("'{}' is not a static field of '{}'", name, class_name)));
                    }
                    self.check_visibility(&class_name, f.visibility, &f.owner_class, span)?;
                    return Ok(self.type_info_of(&f.ty));
                }
            }
        }
        Err(semantic_err(span, format!("class '{}' has no field '{}'", class_name, name)))
    }

    fn check_new(&mut self, ty: &Type, args: &[Expr], span: Span) -> BlochResult<TypeInfo> {
        let class_name = ty
            .class_name()
            .ok_or_else(|| semantic_err(span, "'new' requires a class type"))?
            .to_string();
        let info = self
            .registry
            .get(&class_name)
            .ok_or_else(|| semantic_err(span, format!("unknown class '{}'", class_name)))?;
        if info.is_static {
            return Err(semantic_err(span, format!("cannot instantiate static class '{}'", class_name)));
        }
        if info.is_abstract {
            return Err(semantic_err(span, format!("cannot instantiate abstract class '{}'", class_name)));
        }
        let arg_types: Vec<TypeInfo> = args
            .iter()
            .map(|a| self.check_expr(a))
            .collect::<BlochResult<Vec<_>>>()?;

        let mut best: Option<u32> = None;
        let mut ambiguous = false;
        for c in &info.constructors {
            if c.param_types.len() != arg_types.len() {
                continue;
            }
            let cost = match self.params_cost(&c.param_types, &arg_types) {
                Some(c) => c,
                None => continue,
            };
            match best {
                None => best = Some(cost),
                Some(b) if cost < b => {
                    best = Some(cost);
                    ambiguous = false;
                }
                Some(b) if cost == b => ambiguous = true,
                _ => {}
            }
        }
        if ambiguous {
            return Err(semantic_err(span, format!("ambiguous constructor call for '{}'", class_name)));
        }
        if best.is_none() {
            return Err(semantic_err(
                span,
                format!("no constructor of '{}' accepts this argument list", class_name),
            ));
        }

        let type_args: Vec<TypeInfo> = match ty {
            Type::Named { type_args, .. } => type_args.iter().map(|t| self.type_info_of(t)).collect(),
            _ => Vec::new(),
        };
        if !info.type_params.is_empty() && !type_args.is_empty() {
            if type_args.len() != info.type_params.len() {
                return Err(semantic_err(span, "wrong number of type arguments"));
            }
            for (ta, tp) in type_args.iter().zip(&info.type_params) {
                if let Some(bound) = &tp.bound {
                    let bound_name = bound.class_name().unwrap_or_default();
                    if let TypeInfo::Class { name, .. } = ta {
                        if !self.registry.is_subclass_of(name, bound_name) {
                            return Err(semantic_err(
                                span,
                                format!("type argument '{}' does not satisfy bound '{}'", name, bound_name),
                            ));
                        }
                    }
                }
            }
        }
        Ok(TypeInfo::Class { name: class_name, type_args })
    }

    fn type_info_of(&self, ty: &Type) -> TypeInfo {
        match ty {
            Type::Primitive(p, _) => TypeInfo::Primitive(*p),
            Type::Void(_) => TypeInfo::Void,
            Type::Array { element, .. } => TypeInfo::Array(Box::new(self.type_info_of(element))),
            Type::Named { path, type_args, .. } => {
                let name = path.last().cloned().unwrap_or_default();
                if self.type_params.contains_key(&name) {
                    TypeInfo::TypeParam(name)
                } else {
                    TypeInfo::Class {
                        name,
                        type_args: type_args.iter().map(|t| self.type_info_of(t)).collect(),
                    }
                }
            }
        }
    }

    fn require_assignable(&self, target: &Type, value: &TypeInfo, span: Span) -> BlochResult<()> {
        let target_info = self.type_info_of(target);
        self.require_assignable_info(&target_info, value, span)
    }

    fn require_assignable_info(&self, target: &TypeInfo, value: &TypeInfo, span: Span) -> BlochResult<()> {
        if self.is_assignable(target, value) {
            Ok(())
        } else {
            Err(semantic_err(span, "value is not assignable to the target type"))
        }
    }

    /// `is_assignable`: structural/nominal compatibility check.
    fn is_assignable(&self, target: &TypeInfo, value: &TypeInfo) -> bool {
        if let TypeInfo::Class { name, .. } = value {
            if name == "null" {
                return matches!(target, TypeInfo::Class { .. });
            }
        }
        match (target, value) {
            (TypeInfo::Primitive(a), TypeInfo::Primitive(b)) => a == b || self.conversion_cost_primitive(*a, *b).is_some(),
            (TypeInfo::Array(a), TypeInfo::Array(b)) => {
                // Array assignment requires exactly-equal element types,
                // not mere widening.
                **a == **b
            }
            (TypeInfo::Class { name: tn, type_args: ta }, TypeInfo::Class { name: vn, type_args: va }) => {
                self.registry.is_subclass_of(vn, tn) && (ta.is_empty() || va.is_empty() || ta == va)
            }
            (TypeInfo::TypeParam(a), TypeInfo::TypeParam(b)) => a == b,
            (TypeInfo::TypeParam(_), TypeInfo::Class { .. }) => true,
            _ => false,
        }
    }

    /// Numeric widening cost used to rank overload candidates:
    /// `0` exact, `1` widening `int -> long`, `None` incompatible.
    fn conversion_cost_primitive(&self, target: PrimitiveKind, value: PrimitiveKind) -> Option<u8> {
        use PrimitiveKind::*;
        match (target, value) {
            (a, b) if a == b => Some(0),
            (Long, Int) => Some(1),
            _ => None,
        }
    }
}

fn is_boolean_like(t: &TypeInfo) -> bool {
    matches!(
        t,
        TypeInfo::Primitive(PrimitiveKind::Boolean) | TypeInfo::Primitive(PrimitiveKind::Bit)
    )
}

/// Recognises a direct field assignment at constructor top level, either
/// bare (`x = v;`, reduced to `Stmt::Assign` by the parser) or through
/// `this` (`this.x = v;`, which stays an `Expr::Assign` statement).
fn top_level_field_assign(stmt: &Stmt) -> Option<(&str, Span)> {
    match stmt {
        Stmt::Assign(name, _value, span) => Some((name.as_str(), *span)),
        Stmt::ExprStmt(Expr::Assign(AssignTarget::Member(receiver, name, _), _value, span), _) => {
            if matches!(**receiver, Expr::This(_)) {
                Some((name.as_str(), *span))
            } else {
                None
            }
        }
        _ => None,
    }
}
