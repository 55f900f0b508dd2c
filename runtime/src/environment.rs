//! Lexical scope stack and the name-resolution fallback chain used by
//! expression/statement evaluation.
//!
//! Lookup order for a bare identifier is: innermost-to-outermost local
//! scope, then (if a receiver `this` is bound) instance fields, then
//! the enclosing class's static fields walking up its ancestry. A name
//! that resolves at none of those levels is a semantic-analyser bug,
//! not a runtime condition — the analyser already proved every bare
//! identifier resolves somewhere.

use std::collections::HashMap;
use std::rc::Rc;

use crate::heap::{ObjectRef, RuntimeClass};
use crate::value::Value;

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    is_final: bool,
    is_tracked: bool,
}

#[derive(Debug, Default)]
struct Scope {
    bindings: HashMap<String, Binding>,
}

/// One call frame's worth of local scopes plus the receiver/class
/// context bare identifiers fall back to.
pub struct Environment {
    scopes: Vec<Scope>,
    pub this_obj: Option<ObjectRef>,
    pub current_class: Option<Rc<RuntimeClass>>,
}

pub enum LookupResult {
    Local(Value),
    InstanceField(usize),
    StaticField(Rc<RuntimeClass>, String),
    Unresolved,
}

impl Environment {
    pub fn new(this_obj: Option<ObjectRef>, current_class: Option<Rc<RuntimeClass>>) -> Self {
        Environment {
            scopes: vec![Scope::default()],
            this_obj,
            current_class,
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        debug_assert!(!self.scopes.is_empty(), "popped the frame's outermost scope");
    }

    pub fn declare(&mut self, name: &str, value: Value, is_final: bool) {
        self.declare_tracked(name, value, is_final, false);
    }

    /// Declares a local binding, recording whether it carries `@tracked`
    /// so `measure` knows whether to aggregate its outcome.
    pub fn declare_tracked(&mut self, name: &str, value: Value, is_final: bool, is_tracked: bool) {
        let top = self.scopes.last_mut().expect("at least one scope");
        top.bindings.insert(name.to_string(), Binding { value, is_final, is_tracked });
    }

    fn find_local(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.bindings.get(name))
    }

    fn find_local_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes.iter_mut().rev().find_map(|s| s.bindings.get_mut(name))
    }

    fn instance_field_index(&self, name: &str) -> Option<usize> {
        let obj = self.this_obj.as_ref()?;
        let class = obj.borrow().class.clone();
        class
            .fields
            .iter()
            .filter(|f| !f.is_static)
            .position(|f| f.name == name)
    }

    fn static_owner(&self, name: &str) -> Option<Rc<RuntimeClass>> {
        let mut class = self.current_class.clone();
        while let Some(c) = class {
            if c.static_fields.borrow().contains_key(name) {
                return Some(c);
            }
            class = c.base.clone();
        }
        None
    }

    /// Resolves a bare identifier through the full fallback chain
    /// without mutating anything, for read access.
    pub fn resolve(&self, name: &str) -> LookupResult {
        if let Some(binding) = self.find_local(name) {
            return LookupResult::Local(binding.value.clone());
        }
        if let Some(idx) = self.instance_field_index(name) {
            return LookupResult::InstanceField(idx);
        }
        if let Some(owner) = self.static_owner(name) {
            return LookupResult::StaticField(owner, name.to_string());
        }
        LookupResult::Unresolved
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.find_local(name).is_some()
    }

    pub fn is_final_local(&self, name: &str) -> bool {
        self.find_local(name).map(|b| b.is_final).unwrap_or(false)
    }

    pub fn is_tracked_local(&self, name: &str) -> bool {
        self.find_local(name).map(|b| b.is_tracked).unwrap_or(false)
    }

    /// Every local binding's current value across every scope of this
    /// frame, for the garbage collector to mark as a root.
    pub fn local_values(&self) -> impl Iterator<Item = &Value> {
        self.scopes.iter().flat_map(|s| s.bindings.values().map(|b| &b.value))
    }

    /// `@tracked` bindings declared directly in the innermost scope, for
    /// the evaluator to aggregate as that scope closes. Callers
    /// at a function/method/constructor/destructor top scope (which is
    /// never wrapped in its own `push_scope`/`pop_scope` pair) call this
    /// on the frame's sole scope just before returning.
    pub fn top_scope_tracked(&self) -> Vec<(String, Value)> {
        match self.scopes.last() {
            Some(scope) => scope
                .bindings
                .iter()
                .filter(|(_, b)| b.is_tracked)
                .map(|(name, b)| (name.clone(), b.value.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Assigns to an already-resolved local binding. Callers must check
    /// `resolve` first to route instance/static-field assignment
    /// through the object/class storage instead.
    pub fn assign_local(&mut self, name: &str, value: Value) {
        if let Some(binding) = self.find_local_mut(name) {
            binding.value = value;
        }
    }
}
