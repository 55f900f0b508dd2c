//! Builds `RuntimeClass` instances from the semantic analyser's
//! `ClassRegistry` plus the original class declarations, instantiating
//! generic classes lazily per distinct type-argument tuple.
//!
//! Instantiation is memoized by a canonical string key, `Name` for a
//! non-generic class or `Name<A,B,...>` for a generic one, so `new
//! Box<Int>()` used twice in a program shares one `RuntimeClass` (and
//! therefore one set of static fields) across both call sites.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bloch_compiler::ast::{
    AssignTarget, ClassDecl, ClassMember, Expr, Param, Stmt, Type,
};
use bloch_compiler::error::{BlochError, BlochResult};
use bloch_compiler::semantics::symbols::type_signature_key;
use bloch_compiler::semantics::{ClassInfo, ClassRegistry, MethodInfo, OBJECT_CLASS};

use crate::heap::{MemberBodyRef, RuntimeClass, RuntimeConstructor, RuntimeDestructor, RuntimeField, RuntimeMethod};

pub struct ClassTable {
    decls: HashMap<String, Rc<ClassDecl>>,
    registry: ClassRegistry,
    cache: RefCell<HashMap<String, Rc<RuntimeClass>>>,
}

fn substitute_type(ty: &Type, subst: &HashMap<String, Type>) -> Type {
    match ty {
        Type::Named { path, type_args, .. } if path.len() == 1 && type_args.is_empty() => {
            match subst.get(&path[0]) {
                Some(replacement) => replacement.clone(),
                None => ty.clone(),
            }
        }
        Type::Named { path, type_args, span } => Type::Named {
            path: path.clone(),
            type_args: type_args.iter().map(|t| substitute_type(t, subst)).collect(),
            span: *span,
        },
        Type::Array { element, size, span } => Type::Array {
            element: Box::new(substitute_type(element, subst)),
            size: size.clone(),
            span: *span,
        },
        Type::Primitive(..) | Type::Void(_) => ty.clone(),
    }
}

/// Rewrites every `Type` node reachable from a method/constructor/destructor
/// body so a generic class's instantiations see their own type parameters
/// already resolved to concrete types, matching the way field and
/// parameter types are substituted at class-build time (generic classes
/// are erased-and-instantiated lazily: each distinct type-argument tuple
/// produces a `RuntimeClass` whose members have already had type
/// parameters substituted, bodies included).
fn substitute_stmts(stmts: &[Stmt], subst: &HashMap<String, Type>) -> Vec<Stmt> {
    stmts.iter().map(|s| substitute_stmt(s, subst)).collect()
}

fn substitute_stmt(stmt: &Stmt, subst: &HashMap<String, Type>) -> Stmt {
    match stmt {
        Stmt::VarDecl(v) => Stmt::VarDecl(bloch_compiler::ast::VarDecl {
            ty: substitute_type(&v.ty, subst),
            name: v.name.clone(),
            init: v.init.as_ref().map(|e| substitute_expr(e, subst)),
            is_final: v.is_final,
            is_tracked: v.is_tracked,
            span: v.span,
        }),
        Stmt::Block(stmts, span) => Stmt::Block(substitute_stmts(stmts, subst), *span),
        Stmt::ExprStmt(e, span) => Stmt::ExprStmt(substitute_expr(e, subst), *span),
        Stmt::Return(e, span) => Stmt::Return(e.as_ref().map(|e| substitute_expr(e, subst)), *span),
        Stmt::If(cond, then, else_, span) => Stmt::If(
            substitute_expr(cond, subst),
            Box::new(substitute_stmt(then, subst)),
            else_.as_ref().map(|e| Box::new(substitute_stmt(e, subst))),
            *span,
        ),
        Stmt::TernaryStmt(cond, then, else_, span) => Stmt::TernaryStmt(
            substitute_expr(cond, subst),
            Box::new(substitute_stmt(then, subst)),
            Box::new(substitute_stmt(else_, subst)),
            *span,
        ),
        Stmt::For { init, cond, incr, body, span } => Stmt::For {
            init: init.as_ref().map(|s| Box::new(substitute_stmt(s, subst))),
            cond: cond.as_ref().map(|e| substitute_expr(e, subst)),
            incr: incr.as_ref().map(|e| substitute_expr(e, subst)),
            body: Box::new(substitute_stmt(body, subst)),
            span: *span,
        },
        Stmt::While(cond, body, span) => Stmt::While(
            substitute_expr(cond, subst),
            Box::new(substitute_stmt(body, subst)),
            *span,
        ),
        Stmt::Echo(e, span) => Stmt::Echo(substitute_expr(e, subst), *span),
        Stmt::Reset(e, span) => Stmt::Reset(substitute_expr(e, subst), *span),
        Stmt::Measure(e, span) => Stmt::Measure(substitute_expr(e, subst), *span),
        Stmt::Destroy(e, span) => Stmt::Destroy(substitute_expr(e, subst), *span),
        Stmt::Assign(name, e, span) => Stmt::Assign(name.clone(), substitute_expr(e, subst), *span),
    }
}

fn substitute_expr(expr: &Expr, subst: &HashMap<String, Type>) -> Expr {
    match expr {
        Expr::IntLiteral(..)
        | Expr::LongLiteral(..)
        | Expr::FloatLiteral(..)
        | Expr::BitLiteral(..)
        | Expr::CharLiteral(..)
        | Expr::StringLiteral(..)
        | Expr::BoolLiteral(..)
        | Expr::NullLiteral(_)
        | Expr::Variable(..)
        | Expr::This(_)
        | Expr::Super(_) => expr.clone(),
        Expr::Paren(inner, span) => Expr::Paren(Box::new(substitute_expr(inner, subst)), *span),
        Expr::Unary(op, inner, span) => Expr::Unary(*op, Box::new(substitute_expr(inner, subst)), *span),
        Expr::Binary(lhs, op, rhs, span) => Expr::Binary(
            Box::new(substitute_expr(lhs, subst)),
            *op,
            Box::new(substitute_expr(rhs, subst)),
            *span,
        ),
        Expr::Postfix(op, inner, span) => Expr::Postfix(*op, Box::new(substitute_expr(inner, subst)), *span),
        Expr::Cast(ty, inner, span) => Expr::Cast(
            substitute_type(ty, subst),
            Box::new(substitute_expr(inner, subst)),
            *span,
        ),
        Expr::Call(callee, args, span) => Expr::Call(
            Box::new(substitute_expr(callee, subst)),
            args.iter().map(|a| substitute_expr(a, subst)).collect(),
            *span,
        ),
        Expr::MemberAccess(receiver, name, span) => {
            Expr::MemberAccess(Box::new(substitute_expr(receiver, subst)), name.clone(), *span)
        }
        Expr::Index(arr, idx, span) => Expr::Index(
            Box::new(substitute_expr(arr, subst)),
            Box::new(substitute_expr(idx, subst)),
            *span,
        ),
        Expr::New(ty, args, span) => Expr::New(
            substitute_type(ty, subst),
            args.iter().map(|a| substitute_expr(a, subst)).collect(),
            *span,
        ),
        Expr::ArrayLiteral(items, span) => {
            Expr::ArrayLiteral(items.iter().map(|i| substitute_expr(i, subst)).collect(), *span)
        }
        Expr::Measure(target, span) => Expr::Measure(Box::new(substitute_expr(target, subst)), *span),
        Expr::Assign(target, rhs, span) => Expr::Assign(
            substitute_assign_target(target, subst),
            Box::new(substitute_expr(rhs, subst)),
            *span,
        ),
    }
}

fn substitute_assign_target(target: &AssignTarget, subst: &HashMap<String, Type>) -> AssignTarget {
    match target {
        AssignTarget::Variable(name, span) => AssignTarget::Variable(name.clone(), *span),
        AssignTarget::Member(receiver, name, span) => {
            AssignTarget::Member(Box::new(substitute_expr(receiver, subst)), name.clone(), *span)
        }
        AssignTarget::Index(arr, idx, span) => AssignTarget::Index(
            Box::new(substitute_expr(arr, subst)),
            Box::new(substitute_expr(idx, subst)),
            *span,
        ),
    }
}

fn canonical_name(class_name: &str, type_args: &[Type]) -> String {
    if type_args.is_empty() {
        return class_name.to_string();
    }
    let joined = type_args.iter().map(type_signature_key).collect::<Vec<_>>().join(",");
    format!("{}<{}>", class_name, joined)
}

impl ClassTable {
    pub fn new(program: &bloch_compiler::ast::Program, registry: ClassRegistry) -> Self {
        let mut decls = HashMap::new();
        for class in &program.classes {
            decls.insert(class.name.clone(), Rc::new(class.clone()));
        }
        ClassTable {
            decls,
            registry,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Returns the already-instantiated `RuntimeClass`, if any, without
    /// building a new one.
    pub fn peek(&self, canonical: &str) -> Option<Rc<RuntimeClass>> {
        self.cache.borrow().get(canonical).cloned()
    }

    /// Every class instantiated so far, for the collector to walk when
    /// marking static-field roots.
    pub fn instantiated_classes(&self) -> Vec<Rc<RuntimeClass>> {
        self.cache.borrow().values().cloned().collect()
    }

    pub fn instantiate(&self, class_name: &str, type_args: &[Type]) -> BlochResult<Rc<RuntimeClass>> {
        let canonical = canonical_name(class_name, type_args);
        if let Some(existing) = self.cache.borrow().get(&canonical) {
            return Ok(Rc::clone(existing));
        }

        let info = self
            .registry
            .get(class_name)
            .ok_or_else(|| BlochError::generic(format!("unknown class '{}'", class_name)))?;

        let subst: HashMap<String, Type> = info
            .type_params
            .iter()
            .zip(type_args.iter())
            .map(|(tp, ta)| (tp.name.clone(), ta.clone()))
            .collect();

        let base_rc = self.instantiate_base(class_name, info, &subst)?;

        let fields = self.build_fields(class_name, info, &base_rc, &subst);
        let methods = self.build_methods(class_name, info, &base_rc, &subst)?;
        let constructors = self.build_constructors(class_name, info, &subst)?;
        let destructor = self.build_destructor(class_name, info, &subst)?;

        let runtime_class = Rc::new(RuntimeClass {
            name: canonical.clone(),
            base: base_rc,
            fields,
            static_fields: RefCell::new(HashMap::new()),
            methods,
            constructors,
            destructor,
            type_args: type_args.iter().map(type_signature_key).collect(),
            has_tracked_fields: info.has_tracked_fields(),
            is_static: info.is_static,
            statics_initialized: std::cell::Cell::new(false),
        });

        self.cache.borrow_mut().insert(canonical, Rc::clone(&runtime_class));
        Ok(runtime_class)
    }

    fn instantiate_base(
        &self,
        class_name: &str,
        info: &ClassInfo,
        subst: &HashMap<String, Type>,
    ) -> BlochResult<Option<Rc<RuntimeClass>>> {
        let Some(base_name) = &info.base else {
            return Ok(None);
        };
        if class_name == OBJECT_CLASS {
            return Ok(None);
        }
        let base_type_args = self
            .decls
            .get(class_name)
            .and_then(|d| d.base.as_ref())
            .map(|ty| match ty {
                Type::Named { type_args, .. } => type_args.iter().map(|t| substitute_type(t, subst)).collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();
        Ok(Some(self.instantiate(base_name, &base_type_args)?))
    }

    fn build_fields(
        &self,
        class_name: &str,
        info: &ClassInfo,
        base_rc: &Option<Rc<RuntimeClass>>,
        subst: &HashMap<String, Type>,
    ) -> Vec<RuntimeField> {
        let mut fields = Vec::new();
        if let Some(base) = base_rc {
            fields.extend(base.fields.iter().cloned());
        }

        let decl = self.decls.get(class_name);
        for field_info in info.fields.iter().filter(|f| f.owner_class == class_name) {
            let init = decl.and_then(|d| {
                d.members.iter().find_map(|m| match m {
                    ClassMember::Field(f) if f.name == field_info.name => f.init.as_ref(),
                    _ => None,
                })
            }).map(|e| substitute_expr(e, subst));
            fields.push(RuntimeField {
                name: field_info.name.clone(),
                ty: substitute_type(&field_info.ty, subst),
                is_static: field_info.is_static,
                is_final: field_info.is_final,
                is_tracked: field_info.is_tracked,
                init,
                owner: class_name.to_string(),
            });
        }
        fields
    }

    fn build_methods(
        &self,
        class_name: &str,
        info: &ClassInfo,
        base_rc: &Option<Rc<RuntimeClass>>,
        subst: &HashMap<String, Type>,
    ) -> BlochResult<Vec<Rc<RuntimeMethod>>> {
        let mut methods: Vec<Rc<RuntimeMethod>> = match base_rc {
            Some(base) => base.methods.clone(),
            None => Vec::new(),
        };

        let Some(decl) = self.decls.get(class_name) else {
            return Ok(methods);
        };

        for method_info in info.methods.iter().filter(|m| m.owner == class_name) {
            let decl_method = decl.members.iter().find_map(|m| match m {
                ClassMember::Method(md) if signature_matches(md, method_info) => Some(md),
                _ => None,
            });
            let Some(decl_method) = decl_method else {
                continue;
            };
            let params: Vec<Param> = decl_method
                .params
                .iter()
                .map(|p| Param {
                    name: p.name.clone(),
                    ty: substitute_type(&p.ty, subst),
                    span: p.span,
                })
                .collect();
            let body = match &decl_method.body {
                Some(stmts) if subst.is_empty() => Some(Rc::new(stmts.clone())),
                Some(stmts) => Some(Rc::new(substitute_stmts(stmts, subst))),
                None => None,
            };
            let runtime_method = Rc::new(RuntimeMethod {
                name: method_info.name.clone(),
                params,
                return_type: substitute_type(&method_info.return_type, subst),
                body,
                is_static: method_info.is_static,
                is_virtual: method_info.is_virtual,
                signature: method_info.signature_string.clone(),
                owner: class_name.to_string(),
            });
            if let Some(slot) = methods.iter_mut().find(|m| m.signature == runtime_method.signature) {
                *slot = runtime_method;
            } else {
                methods.push(runtime_method);
            }
        }

        Ok(methods)
    }

    fn build_constructors(
        &self,
        class_name: &str,
        info: &ClassInfo,
        subst: &HashMap<String, Type>,
    ) -> BlochResult<Vec<Rc<RuntimeConstructor>>> {
        if class_name == OBJECT_CLASS {
            return Ok(vec![Rc::new(RuntimeConstructor {
                params: Vec::new(),
                body: MemberBodyRef::Default,
                owner: OBJECT_CLASS.to_string(),
            })]);
        }
        let Some(decl) = self.decls.get(class_name) else {
            return Ok(Vec::new());
        };
        let decl_ctors: Vec<&bloch_compiler::ast::ConstructorDecl> = decl
            .members
            .iter()
            .filter_map(|m| match m {
                ClassMember::Constructor(c) => Some(c),
                _ => None,
            })
            .collect();

        let mut out = Vec::with_capacity(info.constructors.len());
        for ctor_decl in decl_ctors.iter() {
            let params: Vec<Param> = ctor_decl
                .params
                .iter()
                .map(|p| Param {
                    name: p.name.clone(),
                    ty: substitute_type(&p.ty, subst),
                    span: p.span,
                })
                .collect();
            let body = match &ctor_decl.body {
                bloch_compiler::ast::MemberBody::Default => MemberBodyRef::Default,
                bloch_compiler::ast::MemberBody::Block(stmts) if subst.is_empty() => {
                    MemberBodyRef::Block(Rc::new(stmts.clone()))
                }
                bloch_compiler::ast::MemberBody::Block(stmts) => {
                    MemberBodyRef::Block(Rc::new(substitute_stmts(stmts, subst)))
                }
            };
            out.push(Rc::new(RuntimeConstructor {
                params,
                body,
                owner: class_name.to_string(),
            }));
        }
        Ok(out)
    }

    fn build_destructor(
        &self,
        class_name: &str,
        info: &ClassInfo,
        subst: &HashMap<String, Type>,
    ) -> BlochResult<Option<Rc<RuntimeDestructor>>> {
        if !info.has_destructor {
            return Ok(None);
        }
        let Some(decl) = self.decls.get(class_name) else {
            return Ok(None);
        };
        let decl_dtor = decl.members.iter().find_map(|m| match m {
            ClassMember::Destructor(d) => Some(d),
            _ => None,
        });
        let Some(decl_dtor) = decl_dtor else {
            return Ok(None);
        };
        let body = match &decl_dtor.body {
            bloch_compiler::ast::MemberBody::Default => MemberBodyRef::Default,
            bloch_compiler::ast::MemberBody::Block(stmts) if subst.is_empty() => {
                MemberBodyRef::Block(Rc::new(stmts.clone()))
            }
            bloch_compiler::ast::MemberBody::Block(stmts) => {
                MemberBodyRef::Block(Rc::new(substitute_stmts(stmts, subst)))
            }
        };
        Ok(Some(Rc::new(RuntimeDestructor {
            body,
            owner: class_name.to_string(),
        })))
    }
}

fn signature_matches(decl: &bloch_compiler::ast::MethodDecl, info: &MethodInfo) -> bool {
    if decl.name != info.name || decl.params.len() != info.param_types.len() {
        return false;
    }
    decl.params
        .iter()
        .zip(info.param_types.iter())
        .all(|(p, t)| type_signature_key(&p.ty) == type_signature_key(t))
}
