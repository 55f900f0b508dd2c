//! Runtime values.
//!
//! `Value` is the tagged union the tree-walking evaluator passes around.
//! Arrays and objects are reference types: cloning a `Value::Array` or
//! `Value::Object` shares the same backing storage, matching the way
//! `new` and array literals hand out heap/array handles rather than
//! copies.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bloch_compiler::ast::{ArraySize, BinaryOp, Expr, PrimitiveKind, Type, UnaryOp};

use crate::environment::{Environment, LookupResult};
use crate::heap::ObjectRef;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Long(i64),
    Float(f64),
    Bit(u8),
    Boolean(bool),
    String(String),
    Char(char),
    /// Index into the evaluator's qubit table, not the raw simulator
    /// amplitude index (those coincide only until qubits are recycled).
    Qubit(usize),
    Array(ArrayRef),
    /// `None` is Bloch's `null` (only inhabits the `Object` variant with
    /// an absent reference).
    Object(Option<ObjectRef>),
    /// A first-class reference to a class, used as the receiver of a
    /// static member access or of `new`.
    ClassRef(String),
    Void,
}

impl Value {
    /// `env` resolves any `final int` locals that a declared array size
    /// expression (e.g. `int[N] arr;`) refers to; callers with no
    /// meaningful local scope (static field initialization) pass an
    /// empty `Environment`, which only affects sizes that reference a
    /// local — literal and Unspecified sizes fold without it.
    pub fn default_for(ty: &Type, evaluator: &mut crate::evaluator::RuntimeEvaluator, env: &Environment, label: &str) -> Value {
        match ty {
            Type::Primitive(PrimitiveKind::Int, _) => Value::Int(0),
            Type::Primitive(PrimitiveKind::Long, _) => Value::Long(0),
            Type::Primitive(PrimitiveKind::Float, _) => Value::Float(0.0),
            Type::Primitive(PrimitiveKind::Bit, _) => Value::Bit(0),
            Type::Primitive(PrimitiveKind::Boolean, _) => Value::Boolean(false),
            Type::Primitive(PrimitiveKind::String, _) => Value::String(String::new()),
            Type::Primitive(PrimitiveKind::Char, _) => Value::Char('\0'),
            Type::Primitive(PrimitiveKind::Qubit, _) => Value::Qubit(evaluator.alloc_qubit(label.to_string())),
            Type::Array { element, size, .. } => {
                let len = array_len(size, env);
                let items = (0..len).map(|_| Value::default_for(element, evaluator, env, label)).collect();
                Value::Array(Rc::new(RefCell::new(items)))
            }
            Type::Named { .. } => Value::Object(None),
            Type::Void(_) => Value::Void,
        }
    }

    /// Truthiness used by `if`/`while`/`&&`/`||` short paths:
    /// non-zero numeric, `true` boolean, a `1` bit, or any non-null
    /// reference.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Long(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bit(b) => *b != 0,
            Value::Boolean(b) => *b,
            Value::Object(obj) => obj.is_some(),
            Value::String(_) | Value::Char(_) | Value::Array(_) | Value::ClassRef(_) | Value::Qubit(_) => true,
            Value::Void => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Bit(_) => "bit",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Char(_) => "char",
            Value::Qubit(_) => "qubit",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::ClassRef(_) => "class",
            Value::Void => "void",
        }
    }
}

/// Printable form used by `echo` and tracked-outcome rendering.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Char(c) => write!(f, "'{}'", c),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Bit(b) => write!(f, "{}", b),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Long(n) => write!(f, "{}", n),
            Value::Qubit(idx) => write!(f, "qubit#{}", idx),
            Value::Array(items) => {
                let items = items.borrow();
                let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{{ {} }}", rendered.join(", "))
            }
            Value::Object(Some(obj)) => write!(f, "<{} object>", obj.borrow().class.name),
            Value::Object(None) => write!(f, "null"),
            Value::ClassRef(name) => write!(f, "<class {}>", name),
            Value::Void => write!(f, "void"),
        }
    }
}

fn array_len(size: &ArraySize, env: &Environment) -> usize {
    match size {
        ArraySize::Literal(n) => *n,
        ArraySize::Unspecified => 0,
        ArraySize::Expr(expr) => const_int(expr, env)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0),
    }
}

/// Folds the handful of expression shapes an array-size expression can
/// take (literal arithmetic over int/long literals and `final int`
/// locals); anything else yields `None` and the array falls back to
/// length 0, matching the semantic analyser's own `evaluate_const_int`
/// restrictions (only these shapes are accepted there either).
fn const_int(expr: &Expr, env: &Environment) -> Option<i64> {
    match expr {
        Expr::IntLiteral(n, _) => Some(*n),
        Expr::LongLiteral(n, _) => Some(*n),
        Expr::Paren(inner, _) => const_int(inner, env),
        Expr::Unary(UnaryOp::Neg, inner, _) => const_int(inner, env).map(|v| -v),
        Expr::Binary(lhs, op, rhs, _) => {
            let l = const_int(lhs, env)?;
            let r = const_int(rhs, env)?;
            match op {
                BinaryOp::Add => Some(l + r),
                BinaryOp::Sub => Some(l - r),
                BinaryOp::Mul => Some(l * r),
                BinaryOp::Div if r != 0 => Some(l / r),
                BinaryOp::Mod if r != 0 => Some(l % r),
                _ => None,
            }
        }
        Expr::Cast(ty, inner, _) if matches!(ty, Type::Primitive(PrimitiveKind::Int, _)) => {
            const_int(inner, env)
        }
        Expr::Variable(name, _) => match env.resolve(name) {
            LookupResult::Local(Value::Int(n)) => Some(n),
            LookupResult::Local(Value::Long(n)) => Some(n),
            _ => None,
        },
        _ => None,
    }
}
