//! Class registry entities built during Phase A of semantic analysis.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::ast::{Span, Type, Visibility};

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub is_tracked: bool,
    pub has_initializer: bool,
    pub ty: Type,
    pub owner_class: String,
    pub offset_within_owner: usize,
    pub source_loc: Span,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub has_body: bool,
    pub owner: String,
    pub return_type: Type,
    pub param_types: Vec<Type>,
    pub signature_string: String,
}

impl MethodInfo {
    pub fn signature_of(name: &str, param_types: &[Type]) -> String {
        let joined = param_types
            .iter()
            .map(type_signature_key)
            .collect::<Vec<_>>()
            .join(",");
        format!("{}({})", name, joined)
    }
}

/// A canonical, structural key for a type used in signature comparisons.
/// Class name equality is sufficient here; full generic-argument matching
/// happens against the concrete, instantiated `RuntimeClass` at call time.
pub fn type_signature_key(ty: &Type) -> String {
    match ty {
        Type::Primitive(p, _) => p.name().to_string(),
        Type::Named { path, .. } => path.join("."),
        Type::Array { element, .. } => format!("{}[]", type_signature_key(element)),
        Type::Void(_) => "void".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ConstructorInfo {
    pub visibility: Visibility,
    pub param_types: Vec<Type>,
    pub has_body: bool,
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    pub is_static: bool,
    pub is_abstract: bool,
    pub type_params: Vec<TypeParamInfo>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub constructors: Vec<ConstructorInfo>,
    pub has_destructor: bool,
    pub destructor_visibility: Option<Visibility>,
    pub destructor_is_default: bool,
    /// Signature strings of methods declared `virtual` with no body —
    /// a class with any of these is implicitly abstract.
    pub abstract_methods: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TypeParamInfo {
    pub name: String,
    pub bound: Option<Type>,
}

impl ClassInfo {
    pub fn method_signatures(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.signature_string.as_str()).collect()
    }

    pub fn has_tracked_fields(&self) -> bool {
        self.fields.iter().any(|f| f.is_tracked)
    }
}

/// A resolved type occurring in a signature, annotation, or cast: either a
/// primitive, a concrete/generic class reference, or a class type-parameter
/// standing in for a not-yet-substituted generic argument.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfo {
    Primitive(crate::ast::PrimitiveKind),
    Class {
        name: String,
        type_args: Vec<TypeInfo>,
    },
    /// The type of a bare class-name expression used as a first-class
    /// value: the receiver of a static member access or of `new`.
    /// Distinct from `Class` so that `Foo.bar()` is type-checked against
    /// `Foo`'s static members only, never its instance ones.
    ClassRef(String),
    Array(Box<TypeInfo>),
    Void,
    TypeParam(String),
}

/// The full set of registered classes, keyed by name, plus the implicit
/// `Object` root every class ultimately derives from.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    pub classes: HashMap<String, ClassInfo>,
}

impl ClassRegistry {
    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// Walks from `name` to the root, inclusive, following `base` links.
    pub fn ancestry(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(name.to_string());
        while let Some(c) = current {
            let info = match self.classes.get(&c) {
                Some(i) => i,
                None => break,
            };
            chain.push(c.clone());
            current = info.base.clone();
        }
        chain
    }

    pub fn is_subclass_of(&self, sub: &str, base: &str) -> bool {
        if sub == base {
            return true;
        }
        self.ancestry(sub).iter().any(|c| c == base)
    }

    /// Distance from `sub` up to `base` in the inheritance chain, used by
    /// `conversion_cost`; `None` if unrelated.
    pub fn distance_in_inheritance(&self, sub: &str, base: &str) -> Option<usize> {
        self.ancestry(sub).iter().position(|c| c == base)
    }

    /// Finds the best-matching method across `class_name`'s ancestry,
    /// returning the owner class name alongside the signature.
    pub fn resolve_method(&self, class_name: &str, signature: &str) -> Option<&MethodInfo> {
        for ancestor in self.ancestry(class_name) {
            if let Some(info) = self.classes.get(&ancestor) {
                if let Some(m) = info.methods.iter().find(|m| m.signature_string == signature) {
                    return Some(m);
                }
            }
        }
        None
    }
}

lazy_static! {
    /// Built-in quantum gate signatures: name → arity. Every
    /// gate returns `void` and its arguments are `qubit`; `rx`/`ry`/`rz`
    /// take one extra `float` angle argument before the qubit.
    pub static ref BUILTIN_GATES: HashMap<&'static str, usize> = {
        let mut m = HashMap::new();
        m.insert("h", 1);
        m.insert("x", 1);
        m.insert("y", 1);
        m.insert("z", 1);
        m.insert("cx", 2);
        m.insert("rx", 2);
        m.insert("ry", 2);
        m.insert("rz", 2);
        m
    };
}

pub fn is_rotation_gate(name: &str) -> bool {
    matches!(name, "rx" | "ry" | "rz")
}
