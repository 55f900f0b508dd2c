//! Phase A of semantic analysis: build the class registry before any
//! expression is type-checked.
//!
//! Classes are processed in topological inheritance order (base before
//! derived) so that field offsets and vtables can simply extend the base
//! class's. `Object` is synthesized as the implicit root for every class
//! that does not name an explicit `extends` clause.

use std::collections::{HashMap, HashSet};

use crate::ast::{ClassDecl, ClassMember, Program, Visibility};
use crate::error::BlochResult;

use super::errors::semantic_err;
use super::symbols::{
    ClassInfo, ClassRegistry, ConstructorInfo, FieldInfo, MethodInfo, TypeParamInfo,
};

pub const OBJECT_CLASS: &str = "Object";

pub fn build_registry(program: &Program) -> BlochResult<ClassRegistry> {
    let mut registry = ClassRegistry::default();
    registry.classes.insert(
        OBJECT_CLASS.to_string(),
        ClassInfo {
            name: OBJECT_CLASS.to_string(),
            base: None,
            is_static: false,
            is_abstract: false,
            type_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: vec![ConstructorInfo {
                visibility: Visibility::Public,
                param_types: Vec::new(),
                has_body: true,
                is_default: true,
            }],
            has_destructor: false,
            destructor_visibility: None,
            destructor_is_default: false,
            abstract_methods: Vec::new(),
        },
    );

    let mut by_name: HashMap<&str, &ClassDecl> = HashMap::new();
    for class in &program.classes {
        if class.name == OBJECT_CLASS {
            return Err(semantic_err(
                class.span,
                "'Object' is the implicit root class and cannot be declared explicitly",
            ));
        }
        if by_name.insert(&class.name, class).is_some() {
            return Err(semantic_err(
                class.span,
                format!("class '{}' is declared more than once", class.name),
            ));
        }
    }

    let order = topological_order(&program.classes)?;

    for name in order {
        let decl = by_name[name.as_str()];
        let base_name = match &decl.base {
            Some(ty) => {
                let bn = ty
                    .class_name()
                    .ok_or_else(|| semantic_err(ty.span(), "base type must be a class name"))?
                    .to_string();
                if bn == OBJECT_CLASS {
                    return Err(semantic_err(
                        ty.span(),
                        "'Object' is the implicit root of every class and cannot be named explicitly as a base",
                    ));
                }
                if !registry.classes.contains_key(&bn) {
                    return Err(semantic_err(
                        ty.span(),
                        format!("unknown base class '{}'", bn),
                    ));
                }
                Some(bn)
            }
            None => Some(OBJECT_CLASS.to_string()),
        };

        let base_info = base_name.as_ref().and_then(|b| registry.classes.get(b)).cloned();

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut constructors = Vec::new();
        let mut has_destructor = false;
        let mut destructor_visibility = None;
        let mut destructor_is_default = false;
        let mut seen_field_names = HashSet::new();
        let mut seen_signatures = HashSet::new();

        if let Some(base) = &base_info {
            fields.extend(base.fields.clone());
            methods.extend(base.methods.clone());
            for f in &fields {
                seen_field_names.insert(f.name.clone());
            }
            for m in &methods {
                seen_signatures.insert(m.signature_string.clone());
            }
        }

        let mut offset = fields.len();

        for member in &decl.members {
            match member {
                ClassMember::Field(f) => {
                    if !seen_field_names.insert(f.name.clone()) {
                        return Err(semantic_err(
                            f.span,
                            format!("duplicate field '{}' in class '{}'", f.name, decl.name),
                        ));
                    }
                    fields.push(FieldInfo {
                        name: f.name.clone(),
                        visibility: f.visibility,
                        is_static: f.is_static,
                        is_final: f.is_final,
                        is_tracked: f.is_tracked,
                        has_initializer: f.init.is_some(),
                        ty: f.ty.clone(),
                        owner_class: decl.name.clone(),
                        offset_within_owner: offset,
                        source_loc: f.span,
                    });
                    offset += 1;
                }
                ClassMember::Method(m) => {
                    let sig = MethodInfo::signature_of(
                        &m.name,
                        &m.params.iter().map(|p| p.ty.clone()).collect::<Vec<_>>(),
                    );
                    if decl.is_static && (m.is_virtual || m.is_override) {
                        return Err(semantic_err(
                            m.span,
                            "a static class cannot declare virtual or override methods",
                        ));
                    }
                    if m.is_static && (m.is_virtual || m.is_override) {
                        return Err(semantic_err(
                            m.span,
                            "a static method cannot be virtual or override",
                        ));
                    }
                    if m.is_override {
                        let base_method = base_info
                            .as_ref()
                            .and_then(|b| b.methods.iter().find(|bm| bm.signature_string == sig));
                        match base_method {
                            Some(bm) if !bm.is_virtual || bm.is_static => {
                                return Err(semantic_err(
                                    m.span,
                                    format!(
                                        "method '{}' overrides a non-virtual base method",
                                        m.name
                                    ),
                                ))
                            }
                            Some(bm) if crate::semantics::symbols::type_signature_key(&bm.return_type)
                                != crate::semantics::symbols::type_signature_key(&m.return_type) =>
                            {
                                return Err(semantic_err(
                                    m.span,
                                    format!(
                                        "method '{}' override must have the same return type as the base method",
                                        m.name
                                    ),
                                ))
                            }
                            Some(_) => {}
                            None => {
                                return Err(semantic_err(
                                    m.span,
                                    format!(
                                        "method '{}' marked override has no matching virtual base method",
                                        m.name
                                    ),
                                ))
                            }
                        }
                    }
                    if !seen_signatures.insert(sig.clone()) && !m.is_override {
                        return Err(semantic_err(
                            m.span,
                            format!("duplicate method signature '{}' in class '{}'", sig, decl.name),
                        ));
                    }
                    let info = MethodInfo {
                        name: m.name.clone(),
                        visibility: m.visibility,
                        is_static: m.is_static,
                        is_virtual: m.is_virtual,
                        is_override: m.is_override,
                        has_body: m.body.is_some(),
                        owner: decl.name.clone(),
                        return_type: m.return_type.clone(),
                        param_types: m.params.iter().map(|p| p.ty.clone()).collect(),
                        signature_string: sig.clone(),
                    };
                    if let Some(existing) = methods.iter_mut().find(|mi| mi.signature_string == sig) {
                        *existing = info;
                    } else {
                        methods.push(info);
                    }
                }
                ClassMember::Constructor(c) => {
                    if decl.is_static {
                        return Err(semantic_err(
                            c.span,
                            "a static class cannot declare a constructor",
                        ));
                    }
                    constructors.push(ConstructorInfo {
                        visibility: c.visibility,
                        param_types: c.params.iter().map(|p| p.ty.clone()).collect(),
                        has_body: matches!(c.body, crate::ast::MemberBody::Block(_)),
                        is_default: matches!(c.body, crate::ast::MemberBody::Default),
                    });
                }
                ClassMember::Destructor(d) => {
                    if decl.is_static {
                        return Err(semantic_err(
                            d.span,
                            "a static class cannot declare a destructor",
                        ));
                    }
                    if has_destructor {
                        return Err(semantic_err(
                            d.span,
                            format!("class '{}' declares more than one destructor", decl.name),
                        ));
                    }
                    has_destructor = true;
                    destructor_visibility = Some(d.visibility);
                    destructor_is_default = matches!(d.body, crate::ast::MemberBody::Default);
                }
            }
        }

        if !decl.is_static && constructors.is_empty() {
            return Err(semantic_err(
                decl.span,
                format!("class '{}' must declare at least one constructor", decl.name),
            ));
        }

        // Recompute from the final merged method list rather than only the
        // members declared on this class: a method this class neither
        // overrides nor implements still leaves the base's "virtual, no
        // body" entry in `methods` (unreplaced), so the class stays
        // abstract until some descendant actually provides a body.
        let abstract_methods: Vec<String> = methods
            .iter()
            .filter(|m| m.is_virtual && !m.has_body)
            .map(|m| m.signature_string.clone())
            .collect();
        let is_abstract = decl.is_abstract || !abstract_methods.is_empty();

        registry.classes.insert(
            decl.name.clone(),
            ClassInfo {
                name: decl.name.clone(),
                base: if decl.is_static { None } else { base_name },
                is_static: decl.is_static,
                is_abstract,
                type_params: decl
                    .type_params
                    .iter()
                    .map(|tp| TypeParamInfo {
                        name: tp.name.clone(),
                        bound: tp.bound.clone(),
                    })
                    .collect(),
                fields,
                methods,
                constructors,
                has_destructor,
                destructor_visibility,
                destructor_is_default,
                abstract_methods,
            },
        );
    }

    Ok(registry)
}

/// Returns class names in base-before-derived order, rejecting
/// inheritance cycles.
fn topological_order(classes: &[ClassDecl]) -> BlochResult<Vec<String>> {
    let mut order = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut visiting: HashSet<String> = HashSet::new();
    let by_name: HashMap<&str, &ClassDecl> =
        classes.iter().map(|c| (c.name.as_str(), c)).collect();

    fn visit(
        name: &str,
        by_name: &HashMap<&str, &ClassDecl>,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> BlochResult<()> {
        if visited.contains(name) {
            return Ok(());
        }
        let decl = match by_name.get(name) {
            Some(d) => *d,
            None => return Ok(()),
        };
        if visiting.contains(name) {
            return Err(semantic_err(
                decl.span,
                format!("inheritance cycle detected at class '{}'", name),
            ));
        }
        visiting.insert(name.to_string());
        if let Some(base) = &decl.base {
            if let Some(base_name) = base.class_name() {
                visit(base_name, by_name, visited, visiting, order)?;
            }
        }
        visiting.remove(name);
        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    for class in classes {
        visit(&class.name, &by_name, &mut visited, &mut visiting, &mut order)?;
    }

    Ok(order)
}
