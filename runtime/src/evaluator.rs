//! The tree-walking evaluator: statement/expression execution,
//! object lifecycle, quantum primitives, tracked-outcome aggregation
//! and the GC integration point.
//!
//! One `RuntimeEvaluator` owns exactly one run of a program. Shots are
//! orchestrated by the caller (`bin/blochc.rs`) constructing a fresh
//! evaluator per shot — nothing here is reused across shots.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bloch_compiler::ast::{
    self, AssignTarget, BinaryOp, Expr, FunctionDecl, PostfixOp, Program, Stmt, Type, UnaryOp, VarDecl,
};
use bloch_compiler::error::{BlochError, BlochResult};
use bloch_compiler::semantics::{symbols::BUILTIN_GATES, ClassRegistry};

use crate::classes::ClassTable;
use crate::environment::{Environment, LookupResult};
use crate::heap::{MemberBodyRef, Object, RuntimeClass, RuntimeMethod};
use crate::qubits::QubitTable;
use crate::value::Value;

/// Outcome of executing a statement: either control fell through, or a
/// `return` is unwinding toward the enclosing call frame. Bloch has no
/// `break`/`continue`, so this is the only non-local control flow the
/// evaluator needs to thread through loops and blocks.
enum Flow {
    Normal,
    Return(Value),
}

/// What `execute` hands back to the caller once the program has run to
/// completion.
pub struct ExecutionReport {
    pub qasm: String,
    /// `label -> outcome string -> how many times it occurred`, ready
    /// for the CLI's aggregate table.
    pub tracked_outcomes: HashMap<String, HashMap<String, u64>>,
    /// Printable form of every `echo` argument, in source order, flushed
    /// once execution completes.
    pub echo_lines: Vec<String>,
}

pub struct RuntimeEvaluator {
    classes: ClassTable,
    functions: HashMap<String, Rc<FunctionDecl>>,
    top_level: Program,
    qubits: QubitTable,
    heap: crate::heap::Heap,
    tracked: HashMap<String, HashMap<String, u64>>,
    echo_buffer: Vec<String>,
    echo_enabled: bool,
    warn_on_exit: bool,
}

/// The chain of ancestor call frames still live up the Rust call stack,
/// outermost first. A function/method/constructor/destructor call
/// extends this with its caller's own frame before executing its body,
/// so every local variable anywhere on the call stack — not just the
/// innermost frame — is reachable as a GC root.
type Frames<'a> = [&'a Environment];

fn extend_frames<'a>(frames: &Frames<'a>, env: &'a Environment) -> Vec<&'a Environment> {
    let mut extended = Vec::with_capacity(frames.len() + 1);
    extended.extend_from_slice(frames);
    extended.push(env);
    extended
}

impl RuntimeEvaluator {
    pub fn new(program: &Program, registry: ClassRegistry) -> Self {
        let functions = program
            .functions
            .iter()
            .map(|f| (f.name.clone(), Rc::new(f.clone())))
            .collect();
        RuntimeEvaluator {
            classes: ClassTable::new(program, registry),
            functions,
            top_level: program.clone(),
            qubits: QubitTable::new(),
            heap: crate::heap::Heap::new(),
            tracked: HashMap::new(),
            echo_buffer: Vec::new(),
            echo_enabled: true,
            warn_on_exit: false,
        }
    }

    pub fn registry(&self) -> &ClassRegistry {
        self.classes.registry()
    }

    /// Allocates a fresh qubit handle; exposed for `Value::default_for`.
    pub fn alloc_qubit(&mut self, label: String) -> usize {
        self.qubits.allocate(label)
    }

    /// Enables or disables `echo` output. Enabled by default.
    pub fn set_echo(&mut self, enabled: bool) {
        self.echo_enabled = enabled;
    }

    /// Whether a non-fatal diagnostic should be printed when the program
    /// exits, independent of any fatal `Runtime` error. Disabled
    /// by default.
    pub fn set_warn_on_exit(&mut self, enabled: bool) {
        self.warn_on_exit = enabled;
    }

    /// Runs the program to completion and joins the background collector.
    /// A program built around a `function main()` entry point
    /// runs that function; a bare script with no `main` runs its
    /// top-level statements directly instead.
    pub fn execute(mut self) -> BlochResult<ExecutionReport> {
        let mut env = Environment::new(None, None);
        let outcome = if let Some(main_fn) = self.functions.get("main").cloned() {
            self.invoke_function(&main_fn, Vec::new(), main_fn.span, &[]).map(|_| ())
        } else {
            let statements = self.top_level.top_level_statements.clone();
            (|| {
                for stmt in &statements {
                    match self.exec_stmt(stmt, &mut env, &[])? {
                        Flow::Normal => {}
                        Flow::Return(_) => break,
                    }
                }
                Ok(())
            })()
        };
        self.record_scope_tracked_outcomes(&env);
        self.heap.shutdown();
        if self.warn_on_exit && outcome.is_err() {
            eprintln!("[WARNING]: program exited with a runtime error");
        }
        outcome?;
        Ok(ExecutionReport {
            qasm: self.qubits.get_qasm(),
            tracked_outcomes: self.tracked,
            echo_lines: self.echo_buffer,
        })
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt], env: &mut Environment, frames: &Frames) -> BlochResult<Flow> {
        env.push_scope();
        let result = self.exec_stmt_seq(stmts, env, frames);
        self.record_scope_tracked_outcomes(env);
        env.pop_scope();
        result
    }

    fn exec_stmt_seq(&mut self, stmts: &[Stmt], env: &mut Environment, frames: &Frames) -> BlochResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt, env, frames)? {
                Flow::Normal => {}
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &mut Environment, frames: &Frames) -> BlochResult<Flow> {
        self.maybe_collect(env, frames);
        match stmt {
            Stmt::VarDecl(decl) => {
                self.exec_var_decl(decl, env, frames)?;
                Ok(Flow::Normal)
            }
            Stmt::Block(stmts, _) => self.exec_block(stmts, env, frames),
            Stmt::ExprStmt(expr, _) => {
                self.eval_expr(expr, env, frames)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(expr, _) => {
                let value = match expr {
                    Some(e) => self.eval_expr(e, env, frames)?,
                    None => Value::Void,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If(cond, then_branch, else_branch, _) => {
                if self.eval_expr(cond, env, frames)?.is_truthy() {
                    self.exec_stmt(then_branch, env, frames)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch, env, frames)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::TernaryStmt(cond, then_branch, else_branch, _) => {
                if self.eval_expr(cond, env, frames)?.is_truthy() {
                    self.exec_stmt(then_branch, env, frames)
                } else {
                    self.exec_stmt(else_branch, env, frames)
                }
            }
            Stmt::For { init, cond, incr, body, .. } => {
                env.push_scope();
                if let Some(init) = init {
                    match self.exec_stmt(init, env, frames)? {
                        Flow::Normal => {}
                        flow @ Flow::Return(_) => {
                            env.pop_scope();
                            return Ok(flow);
                        }
                    }
                }
                let result = loop {
                    let keep_going = match cond {
                        Some(c) => self.eval_expr(c, env, frames)?.is_truthy(),
                        None => true,
                    };
                    if !keep_going {
                        break Ok(Flow::Normal);
                    }
                    match self.exec_stmt(body, env, frames)? {
                        Flow::Normal => {}
                        flow @ Flow::Return(_) => break Ok(flow),
                    }
                    if let Some(incr) = incr {
                        self.eval_expr(incr, env, frames)?;
                    }
                };
                self.record_scope_tracked_outcomes(env);
                env.pop_scope();
                result
            }
            Stmt::While(cond, body, _) => {
                while self.eval_expr(cond, env, frames)?.is_truthy() {
                    match self.exec_stmt(body, env, frames)? {
                        Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Echo(expr, _) => {
                let value = self.eval_expr(expr, env, frames)?;
                if self.echo_enabled {
                    self.echo_buffer.push(value.to_string());
                }
                Ok(Flow::Normal)
            }
            Stmt::Reset(expr, _) => {
                self.for_each_qubit_handle(expr, env, frames, |table, handle| table.reset(handle))?;
                Ok(Flow::Normal)
            }
            Stmt::Measure(expr, span) => {
                self.measure_target(expr, env, frames, *span)?;
                Ok(Flow::Normal)
            }
            Stmt::Destroy(expr, span) => {
                let value = self.eval_expr(expr, env, frames)?;
                self.destroy_value(value, *span, frames)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign(name, expr, span) => {
                let value = self.eval_expr(expr, env, frames)?;
                self.assign_target(&AssignTarget::Variable(name.clone(), *span), value, env, frames)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_var_decl(&mut self, decl: &VarDecl, env: &mut Environment, frames: &Frames) -> BlochResult<()> {
        let value = match &decl.init {
            Some(expr) => self.eval_expr(expr, env, frames)?,
            None => Value::default_for(&decl.ty, self, env, &decl.name),
        };
        env.declare_tracked(&decl.name, value, decl.is_final, decl.is_tracked);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Quantum primitives
    // ---------------------------------------------------------------

    fn qubit_handle_of(&mut self, expr: &Expr, env: &mut Environment, frames: &Frames) -> BlochResult<usize> {
        match self.eval_expr(expr, env, frames)? {
            Value::Qubit(handle) => Ok(handle),
            other => Err(rt_err(
                loc_of(expr),
                format!("expected a qubit, found a {}", other.type_name()),
            )),
        }
    }

    fn for_each_qubit_handle(
        &mut self,
        expr: &Expr,
        env: &mut Environment,
        frames: &Frames,
        mut f: impl FnMut(&mut QubitTable, usize),
    ) -> BlochResult<()> {
        match self.eval_expr(expr, env, frames)? {
            Value::Qubit(handle) => {
                f(&mut self.qubits, handle);
                Ok(())
            }
            Value::Array(items) => {
                let handles: Vec<usize> = items
                    .borrow()
                    .iter()
                    .map(|v| match v {
                        Value::Qubit(h) => Ok(*h),
                        other => Err(rt_err(
                            loc_of(expr),
                            format!("expected an array of qubits, found a {}", other.type_name()),
                        )),
                    })
                    .collect::<BlochResult<_>>()?;
                for handle in handles {
                    f(&mut self.qubits, handle);
                }
                Ok(())
            }
            other => Err(rt_err(
                loc_of(expr),
                format!("expected a qubit or qubit array, found a {}", other.type_name()),
            )),
        }
    }

    fn measure_target(&mut self, expr: &Expr, env: &mut Environment, frames: &Frames, span: ast::Span) -> BlochResult<Value> {
        match self.eval_expr(expr, env, frames)? {
            Value::Qubit(handle) => {
                if self.qubits.is_measured(handle) {
                    return Err(rt_err(
                        span,
                        format!("{} has already been measured", describe_qubit_target(expr)),
                    ));
                }
                let outcome = self.qubits.measure(handle);
                Ok(Value::Bit(outcome))
            }
            Value::Array(items) => {
                let mut bits = Vec::new();
                let handles: Vec<usize> = items
                    .borrow()
                    .iter()
                    .map(|v| match v {
                        Value::Qubit(h) => Ok(*h),
                        other => Err(rt_err(
                            span,
                            format!("expected an array of qubits, found a {}", other.type_name()),
                        )),
                    })
                    .collect::<BlochResult<_>>()?;
                for handle in handles {
                    if self.qubits.is_measured(handle) {
                        return Err(rt_err(
                            span,
                            format!("{} has already been measured", describe_qubit_target(expr)),
                        ));
                    }
                    let outcome = self.qubits.measure(handle);
                    bits.push(outcome);
                }
                Ok(Value::Array(Rc::new(RefCell::new(
                    bits.into_iter().map(Value::Bit).collect(),
                ))))
            }
            other => Err(rt_err(
                span,
                format!("cannot measure a {}", other.type_name()),
            )),
        }
    }

    fn record_tracked(&mut self, label: String, outcome: String) {
        *self.tracked.entry(label).or_default().entry(outcome).or_insert(0) += 1;
    }

    /// Composes and records the outcome string for every `@tracked`
    /// local declared directly in `env`'s innermost scope, as that scope
    /// closes. A single tracked qubit contributes `"0"`/`"1"` if
    /// measured, else `"?"`; a tracked qubit array contributes the
    /// concatenation of its elements' bits if every element has been
    /// measured, else `"?"`.
    fn record_scope_tracked_outcomes(&mut self, env: &Environment) {
        for (name, value) in env.top_scope_tracked() {
            match value {
                Value::Qubit(handle) => {
                    let outcome = match self.qubits.outcome(handle) {
                        Some(bit) => bit.to_string(),
                        None => "?".to_string(),
                    };
                    self.record_tracked(format!("qubit {}", name), outcome);
                }
                Value::Array(items) => {
                    let handles: Vec<usize> = items
                        .borrow()
                        .iter()
                        .filter_map(|v| match v {
                            Value::Qubit(h) => Some(*h),
                            _ => None,
                        })
                        .collect();
                    if handles.is_empty() {
                        continue;
                    }
                    let outcome = if handles.iter().all(|h| self.qubits.outcome(*h).is_some()) {
                        handles.iter().map(|h| self.qubits.outcome(*h).unwrap().to_string()).collect()
                    } else {
                        "?".to_string()
                    };
                    self.record_tracked(format!("qubit[] {}", name), outcome);
                }
                _ => {}
            }
        }
    }

    fn destroy_value(&mut self, value: Value, span: ast::Span, frames: &Frames) -> BlochResult<()> {
        match value {
            Value::Qubit(handle) => {
                self.qubits.release(handle);
                Ok(())
            }
            Value::Object(Some(obj)) => self.run_destructor_chain(&obj, span, frames),
            Value::Object(None) => Ok(()),
            Value::Array(items) => {
                for item in items.borrow().iter().cloned() {
                    self.destroy_value(item, span, frames)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ---------------------------------------------------------------
    // Garbage collection
    // ---------------------------------------------------------------

    /// Marks every object reachable from a live root: the instance
    /// receiver, every class's static fields, and — critically — every
    /// local binding in every scope of every frame still on the call
    /// stack (`env` plus `frames`, its ancestors). Only once every live
    /// scope has contributed its roots is an unmarked object provably
    /// garbage.
    fn maybe_collect(&mut self, env: &Environment, frames: &Frames) {
        if !self.heap.should_collect() {
            return;
        }
        self.heap.clear_request();
        let live = self.heap.snapshot_live();
        for obj in &live {
            obj.borrow_mut().gc_mark = false;
        }

        for frame in frames.iter().copied().chain(std::iter::once(env)) {
            if let Some(this_obj) = &frame.this_obj {
                mark_object(this_obj);
            }
            for value in frame.local_values() {
                mark_value(value);
            }
        }
        for class in self.classes.instantiated_classes() {
            for value in class.static_fields.borrow().values() {
                mark_value(value);
            }
        }

        for obj in &live {
            let should_sweep = {
                let b = obj.borrow();
                !b.gc_mark && !b.class.has_tracked_fields && !b.destroyed
            };
            if should_sweep {
                let mut b = obj.borrow_mut();
                b.destroyed = true;
                b.skip_destructor = true;
                b.fields.clear();
            }
        }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn eval_expr(&mut self, expr: &Expr, env: &mut Environment, frames: &Frames) -> BlochResult<Value> {
        match expr {
            Expr::IntLiteral(n, _) => Ok(Value::Int(*n)),
            Expr::LongLiteral(n, _) => Ok(Value::Long(*n)),
            Expr::FloatLiteral(f, _) => Ok(Value::Float(*f)),
            Expr::BitLiteral(b, _) => Ok(Value::Bit(*b)),
            Expr::CharLiteral(c, _) => Ok(Value::Char(*c)),
            Expr::StringLiteral(s, _) => Ok(Value::String(s.clone())),
            Expr::BoolLiteral(b, _) => Ok(Value::Boolean(*b)),
            Expr::NullLiteral(_) => Ok(Value::Object(None)),
            Expr::Variable(name, span) => self.eval_variable(name, *span, env),
            Expr::This(span) => env
                .this_obj
                .clone()
                .map(|o| Value::Object(Some(o)))
                .ok_or_else(|| rt_err(*span, "'this' used outside an instance context")),
            Expr::Super(span) => env
                .this_obj
                .clone()
                .map(|o| Value::Object(Some(o)))
                .ok_or_else(|| rt_err(*span, "'super' used outside an instance context")),
            Expr::Paren(inner, _) => self.eval_expr(inner, env, frames),
            Expr::Unary(op, inner, span) => self.eval_unary(*op, inner, *span, env, frames),
            Expr::Binary(lhs, op, rhs, span) => self.eval_binary(lhs, *op, rhs, *span, env, frames),
            Expr::Postfix(op, inner, span) => self.eval_postfix(*op, inner, *span, env, frames),
            Expr::Cast(ty, inner, span) => {
                let value = self.eval_expr(inner, env, frames)?;
                cast_value(ty, value, *span)
            }
            Expr::Call(callee, args, span) => self.eval_call(callee, args, *span, env, frames),
            Expr::MemberAccess(receiver, name, span) => self.eval_member_access(receiver, name, *span, env, frames),
            Expr::Index(array, index, span) => self.eval_index(array, index, *span, env, frames),
            Expr::New(ty, args, span) => self.eval_new(ty, args, *span, env, frames),
            Expr::ArrayLiteral(items, _) => {
                let values = items
                    .iter()
                    .map(|e| self.eval_expr(e, env, frames))
                    .collect::<BlochResult<Vec<_>>>()?;
                Ok(Value::Array(Rc::new(RefCell::new(values))))
            }
            Expr::Measure(target, span) => self.measure_target(target, env, frames, *span),
            Expr::Assign(target, rhs, _) => {
                let value = self.eval_expr(rhs, env, frames)?;
                self.assign_target(target, value.clone(), env, frames)?;
                Ok(value)
            }
        }
    }

    fn eval_variable(&mut self, name: &str, span: ast::Span, env: &mut Environment) -> BlochResult<Value> {
        match env.resolve(name) {
            LookupResult::Local(v) => Ok(v),
            LookupResult::InstanceField(idx) => {
                let obj = env.this_obj.clone().expect("instance field resolved without a receiver");
                Ok(obj.borrow().fields[idx].clone())
            }
            LookupResult::StaticField(class, field_name) => {
                self.ensure_statics_initialized(&class, &[])?;
                Ok(class.static_fields.borrow().get(&field_name).cloned().unwrap())
            }
            LookupResult::Unresolved => {
                if self.classes.registry().get(name).is_some() {
                    Ok(Value::ClassRef(name.to_string()))
                } else {
                    Err(rt_err(span, format!("undefined name '{}'", name)))
                }
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, inner: &Expr, span: ast::Span, env: &mut Environment, frames: &Frames) -> BlochResult<Value> {
        let value = self.eval_expr(inner, env, frames)?;
        match (op, &value) {
            (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
            (UnaryOp::Neg, Value::Long(n)) => Ok(Value::Long(-n)),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
            (UnaryOp::BitNot, Value::Int(n)) => Ok(Value::Int(!n)),
            (UnaryOp::BitNot, Value::Long(n)) => Ok(Value::Long(!n)),
            (UnaryOp::BitNot, Value::Bit(b)) => Ok(Value::Bit(if *b == 0 { 1 } else { 0 })),
            _ => Err(rt_err(
                span,
                format!("operator cannot apply to a {}", value.type_name()),
            )),
        }
    }

    fn eval_postfix(&mut self, op: PostfixOp, inner: &Expr, span: ast::Span, env: &mut Environment, frames: &Frames) -> BlochResult<Value> {
        let before = self.eval_expr(inner, env, frames)?;
        let after = match (&op, &before) {
            (PostfixOp::Inc, Value::Int(n)) => Value::Int(n + 1),
            (PostfixOp::Dec, Value::Int(n)) => Value::Int(n - 1),
            (PostfixOp::Inc, Value::Long(n)) => Value::Long(n + 1),
            (PostfixOp::Dec, Value::Long(n)) => Value::Long(n - 1),
            (PostfixOp::Inc, Value::Float(f)) => Value::Float(f + 1.0),
            (PostfixOp::Dec, Value::Float(f)) => Value::Float(f - 1.0),
            _ => {
                return Err(rt_err(
                    span,
                    format!("operator cannot apply to a {}", before.type_name()),
                ))
            }
        };
        let target = expr_to_assign_target(inner)?;
        self.assign_target(&target, after, env, frames)?;
        Ok(before)
    }

    fn eval_binary(
        &mut self,
        lhs: &Expr,
        op: BinaryOp,
        rhs: &Expr,
        span: ast::Span,
        env: &mut Environment,
        frames: &Frames,
    ) -> BlochResult<Value> {
        if op == BinaryOp::And {
            let l = self.eval_expr(lhs, env, frames)?;
            if !l.is_truthy() {
                return Ok(Value::Boolean(false));
            }
            return Ok(Value::Boolean(self.eval_expr(rhs, env, frames)?.is_truthy()));
        }
        if op == BinaryOp::Or {
            let l = self.eval_expr(lhs, env, frames)?;
            if l.is_truthy() {
                return Ok(Value::Boolean(true));
            }
            return Ok(Value::Boolean(self.eval_expr(rhs, env, frames)?.is_truthy()));
        }

        let l = self.eval_expr(lhs, env, frames)?;
        let r = self.eval_expr(rhs, env, frames)?;
        apply_binary(op, l, r, span)
    }

    fn eval_index(&mut self, array_expr: &Expr, index_expr: &Expr, span: ast::Span, env: &mut Environment, frames: &Frames) -> BlochResult<Value> {
        let array = match self.eval_expr(array_expr, env, frames)? {
            Value::Array(a) => a,
            other => {
                return Err(rt_err(
                    span,
                    format!("cannot index a {}", other.type_name()),
                ))
            }
        };
        let index = index_of(self.eval_expr(index_expr, env, frames)?, span)?;
        let items = array.borrow();
        let len = items.len();
        items
            .get(index)
            .cloned()
            .ok_or_else(|| rt_err(span, format!("index {} out of bounds for length {}", index, len)))
    }

    fn eval_member_access(&mut self, receiver: &Expr, name: &str, span: ast::Span, env: &mut Environment, frames: &Frames) -> BlochResult<Value> {
        if matches!(receiver, Expr::Super(_)) {
            let this_obj = env
                .this_obj
                .clone()
                .ok_or_else(|| rt_err(span, "'super' used outside an instance context"))?;
            let base = env
                .current_class
                .as_ref()
                .and_then(|c| c.base.clone())
                .ok_or_else(|| rt_err(span, "class has no base class"))?;
            if let Some(idx) = base.fields.iter().filter(|f| !f.is_static).position(|f| f.name == name) {
                return Ok(this_obj.borrow().fields[idx].clone());
            }
        }
        let receiver_value = self.eval_expr(receiver, env, frames)?;
        self.read_member(receiver_value, name, span)
    }

    fn read_member(&mut self, receiver: Value, name: &str, span: ast::Span) -> BlochResult<Value> {
        match receiver {
            Value::Object(Some(obj)) => {
                let class = obj.borrow().class.clone();
                if let Some(idx) = class.fields.iter().filter(|f| !f.is_static).position(|f| f.name == name) {
                    return Ok(obj.borrow().fields[idx].clone());
                }
                Err(rt_err(span, format!("no field '{}' on this object", name)))
            }
            Value::Object(None) => Err(rt_err(span, "null reference")),
            Value::ClassRef(class_name) => {
                let class = self.classes.instantiate(&class_name, &[])?;
                self.ensure_statics_initialized(&class, &[])?;
                class
                    .static_fields
                    .borrow()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| rt_err(span, format!("no static field '{}' on class '{}'", name, class_name)))
            }
            other => Err(rt_err(
                span,
                format!("cannot access member '{}' on a {}", name, other.type_name()),
            )),
        }
    }

    fn assign_target(&mut self, target: &AssignTarget, value: Value, env: &mut Environment, frames: &Frames) -> BlochResult<()> {
        match target {
            AssignTarget::Variable(name, span) => {
                if env.is_local(name) {
                    env.assign_local(name, value);
                    return Ok(());
                }
                match env.resolve(name) {
                    LookupResult::InstanceField(idx) => {
                        let obj = env.this_obj.clone().expect("instance field resolved without a receiver");
                        obj.borrow_mut().fields[idx] = value;
                        Ok(())
                    }
                    LookupResult::StaticField(class, field_name) => {
                        self.ensure_statics_initialized(&class, frames)?;
                        class.static_fields.borrow_mut().insert(field_name, value);
                        Ok(())
                    }
                    _ => Err(rt_err(*span, format!("cannot assign to '{}'", name))),
                }
            }
            AssignTarget::Member(receiver, name, span) => {
                let receiver_value = self.eval_expr(receiver, env, frames)?;
                match receiver_value {
                    Value::Object(Some(obj)) => {
                        let class = obj.borrow().class.clone();
                        let idx = class
                            .fields
                            .iter()
                            .filter(|f| !f.is_static)
                            .position(|f| f.name == *name)
                            .ok_or_else(|| rt_err(*span, format!("no field '{}' on this object", name)))?;
                        obj.borrow_mut().fields[idx] = value;
                        Ok(())
                    }
                    Value::ClassRef(class_name) => {
                        let class = self.classes.instantiate(&class_name, &[])?;
                        self.ensure_statics_initialized(&class, frames)?;
                        class.static_fields.borrow_mut().insert(name.clone(), value);
                        Ok(())
                    }
                    Value::Object(None) => Err(rt_err(*span, "null reference")),
                    other => Err(rt_err(
                        *span,
                        format!("cannot assign member '{}' on a {}", name, other.type_name()),
                    )),
                }
            }
            AssignTarget::Index(array_expr, index_expr, span) => {
                let array = match self.eval_expr(array_expr, env, frames)? {
                    Value::Array(a) => a,
                    other => {
                        return Err(rt_err(
                            *span,
                            format!("cannot index a {}", other.type_name()),
                        ))
                    }
                };
                let index = index_of(self.eval_expr(index_expr, env, frames)?, *span)?;
                let mut items = array.borrow_mut();
                if index >= items.len() {
                    return Err(rt_err(*span, format!("index {} out of bounds for length {}", index, items.len())));
                }
                items[index] = value;
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------
    // Calls: free functions, gates, method dispatch
    // ---------------------------------------------------------------

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], span: ast::Span, env: &mut Environment, frames: &Frames) -> BlochResult<Value> {
        match callee {
            Expr::Variable(name, _) => self.eval_bare_call(name, args, span, env, frames),
            Expr::MemberAccess(receiver, name, _) if matches!(receiver.as_ref(), Expr::Super(_)) => {
                let this_obj = env
                    .this_obj
                    .clone()
                    .ok_or_else(|| rt_err(span, "'super' used outside an instance context"))?;
                let base = env
                    .current_class
                    .as_ref()
                    .and_then(|c| c.base.clone())
                    .ok_or_else(|| rt_err(span, "class has no base class"))?;
                let values = self.eval_args(args, env, frames)?;
                let method = select_overload(base.methods.iter().filter(|m| m.name == *name), &values)
                    .ok_or_else(|| rt_err(span, format!("no matching method 'super.{}'", name)))?;
                let child_frames = extend_frames(frames, env);
                self.invoke_method(method, Some(this_obj), &base, values, span, &child_frames)
            }
            Expr::MemberAccess(receiver, name, _) => {
                let receiver_value = self.eval_expr(receiver, env, frames)?;
                let values = self.eval_args(args, env, frames)?;
                let child_frames = extend_frames(frames, env);
                self.dispatch_method_call(receiver_value, name, values, span, &child_frames)
            }
            other => Err(rt_err(
                loc_of(other),
                "this expression cannot be called",
            )),
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &mut Environment, frames: &Frames) -> BlochResult<Vec<Value>> {
        args.iter().map(|a| self.eval_expr(a, env, frames)).collect()
    }

    fn eval_bare_call(&mut self, name: &str, args: &[Expr], span: ast::Span, env: &mut Environment, frames: &Frames) -> BlochResult<Value> {
        if let Some(arity) = BUILTIN_GATES.get(name) {
            let values = self.eval_args(args, env, frames)?;
            if values.len() != *arity {
                return Err(rt_err(span, format!("gate '{}' expects {} argument(s)", name, arity)));
            }
            return self.apply_gate(name, &values, span);
        }

        if let Some(function) = self.functions.get(name).cloned() {
            let values = self.eval_args(args, env, frames)?;
            let child_frames = extend_frames(frames, env);
            return self.invoke_function(&function, values, span, &child_frames);
        }

        if env.this_obj.is_some() {
            let values = self.eval_args(args, env, frames)?;
            let this_obj = env.this_obj.clone().unwrap();
            let class = this_obj.borrow().class.clone();
            if let Some(method) = select_overload(class.methods.iter().filter(|m| m.name == name), &values) {
                let method = Rc::clone(method);
                let child_frames = extend_frames(frames, env);
                return self.invoke_method(&method, Some(this_obj), &class, values, span, &child_frames);
            }
        }

        Err(rt_err(span, format!("undefined function '{}'", name)))
    }

    fn apply_gate(&mut self, name: &str, args: &[Value], span: ast::Span) -> BlochResult<Value> {
        let qubit_at = |args: &[Value], idx: usize| -> BlochResult<usize> {
            match args.get(idx) {
                Some(Value::Qubit(h)) => Ok(*h),
                _ => Err(rt_err(span, format!("gate '{}' expects a qubit argument", name))),
            }
        };
        let angle_at = |args: &[Value], idx: usize| -> BlochResult<f64> {
            match args.get(idx) {
                Some(Value::Float(f)) => Ok(*f),
                Some(Value::Int(n)) => Ok(*n as f64),
                _ => Err(rt_err(span, format!("gate '{}' expects a float angle", name))),
            }
        };
        match name {
            "h" => self.qubits.h(qubit_at(args, 0)?),
            "x" => self.qubits.x(qubit_at(args, 0)?),
            "y" => self.qubits.y(qubit_at(args, 0)?),
            "z" => self.qubits.z(qubit_at(args, 0)?),
            "cx" => self.qubits.cx(qubit_at(args, 0)?, qubit_at(args, 1)?),
            "rx" => self.qubits.rx(qubit_at(args, 0)?, angle_at(args, 1)?),
            "ry" => self.qubits.ry(qubit_at(args, 0)?, angle_at(args, 1)?),
            "rz" => self.qubits.rz(qubit_at(args, 0)?, angle_at(args, 1)?),
            _ => return Err(rt_err(span, format!("unknown gate '{}'", name))),
        }
        Ok(Value::Void)
    }

    fn dispatch_method_call(&mut self, receiver: Value, name: &str, args: Vec<Value>, span: ast::Span, frames: &Frames) -> BlochResult<Value> {
        match receiver {
            Value::Object(Some(obj)) => {
                let class = obj.borrow().class.clone();
                let method = select_overload(class.methods.iter().filter(|m| m.name == name), &args)
                    .ok_or_else(|| rt_err(span, format!("no matching method '{}'", name)))?;
                let method = Rc::clone(method);
                self.invoke_method(&method, Some(obj), &class, args, span, frames)
            }
            Value::Object(None) => Err(rt_err(span, "null reference")),
            Value::ClassRef(class_name) => {
                let class = self.classes.instantiate(&class_name, &[])?;
                let method = select_overload(class.methods.iter().filter(|m| m.name == name && m.is_static), &args)
                    .ok_or_else(|| rt_err(span, format!("no matching static method '{}'", name)))?;
                let method = Rc::clone(method);
                self.invoke_method(&method, None, &class, args, span, frames)
            }
            other => Err(rt_err(
                span,
                format!("cannot call '{}' on a {}", name, other.type_name()),
            )),
        }
    }

    fn invoke_function(&mut self, function: &FunctionDecl, args: Vec<Value>, span: ast::Span, frames: &Frames) -> BlochResult<Value> {
        let mut env = Environment::new(None, None);
        for (param, value) in function.params.iter().zip(args.into_iter()) {
            env.declare(&param.name, value, false);
        }
        let flow = self.exec_stmt_seq(&function.body, &mut env, frames);
        self.record_scope_tracked_outcomes(&env);
        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => {
                if function.return_type.is_void() {
                    Ok(Value::Void)
                } else {
                    Err(rt_err(span, format!("function '{}' fell off its end without returning", function.name)))
                }
            }
        }
    }

    fn invoke_method(
        &mut self,
        method: &RuntimeMethod,
        this_obj: Option<crate::heap::ObjectRef>,
        owner_class: &Rc<RuntimeClass>,
        args: Vec<Value>,
        span: ast::Span,
        frames: &Frames,
    ) -> BlochResult<Value> {
        let Some(body) = &method.body else {
            return Err(rt_err(span, format!("method '{}' has no implementation", method.name)));
        };
        let defining_class = self.find_owner_class(owner_class, &method.owner);
        let mut env = Environment::new(this_obj, defining_class);
        for (param, value) in method.params.iter().zip(args.into_iter()) {
            env.declare(&param.name, value, false);
        }
        let flow = self.exec_stmt_seq(body, &mut env, frames);
        self.record_scope_tracked_outcomes(&env);
        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::Void),
        }
    }

    fn find_owner_class(&self, leaf: &Rc<RuntimeClass>, owner_name: &str) -> Option<Rc<RuntimeClass>> {
        let mut current = Some(Rc::clone(leaf));
        while let Some(c) = current {
            let bare = c.name.split('<').next().unwrap_or(&c.name);
            if bare == owner_name {
                return Some(c);
            }
            current = c.base.clone();
        }
        Some(Rc::clone(leaf))
    }

    // ---------------------------------------------------------------
    // Object construction / destruction
    // ---------------------------------------------------------------

    fn eval_new(&mut self, ty: &Type, args: &[Expr], span: ast::Span, env: &mut Environment, frames: &Frames) -> BlochResult<Value> {
        let Type::Named { path, type_args, .. } = ty else {
            return Err(rt_err(span, "'new' requires a class type"));
        };
        let class_name = path.last().cloned().unwrap_or_default();
        let resolved_type_args: Vec<Type> = type_args.clone();
        let class = self.classes.instantiate(&class_name, &resolved_type_args)?;
        let values = self.eval_args(args, env, frames)?;

        let mut fields = Vec::with_capacity(class.fields.len());
        for field in &class.fields {
            if field.is_static {
                continue;
            }
            fields.push(Value::default_for(&field.ty, self, env, &field.name));
        }

        let obj = Rc::new(RefCell::new(Object {
            class: Rc::clone(&class),
            fields,
            destroyed: false,
            skip_destructor: false,
            gc_mark: false,
        }));
        self.heap.register(&obj);

        let child_frames = extend_frames(frames, env);
        self.run_constructor_chain(&obj, &class, values, span, &child_frames)?;

        Ok(Value::Object(Some(obj)))
    }

    /// Runs the field initialisers declared directly on `class` (not
    /// those inherited from a base), matching the per-level step of the
    /// constructor chain rather than a single whole-hierarchy pass.
    fn run_field_initializers(&mut self, obj: &crate::heap::ObjectRef, class: &Rc<RuntimeClass>, frames: &Frames) -> BlochResult<()> {
        let owner = bare_class_name(&class.name);
        for (idx, field) in class.fields.iter().filter(|f| !f.is_static).enumerate() {
            if field.owner != owner {
                continue;
            }
            if let Some(init) = &field.init {
                let mut env = Environment::new(Some(Rc::clone(obj)), Some(Rc::clone(class)));
                let value = self.eval_expr(init, &mut env, frames)?;
                obj.borrow_mut().fields[idx] = value;
            }
        }
        Ok(())
    }

    /// For a `= default` constructor, copies each parameter into the
    /// field of the same name declared directly on `class`; binding is
    /// restricted to the class's own fields.
    fn copy_default_constructor_params(
        &mut self,
        obj: &crate::heap::ObjectRef,
        class: &Rc<RuntimeClass>,
        ctor: &crate::heap::RuntimeConstructor,
        args: &[Value],
        span: ast::Span,
    ) -> BlochResult<()> {
        let owner = bare_class_name(&class.name);
        for (param, value) in ctor.params.iter().zip(args.iter().cloned()) {
            let idx = class
                .fields
                .iter()
                .filter(|f| !f.is_static)
                .position(|f| f.name == param.name && f.owner == owner)
                .ok_or_else(|| {
                    rt_err(
                        span,
                        format!("default constructor parameter '{}' has no matching field", param.name),
                    )
                })?;
            obj.borrow_mut().fields[idx] = value;
        }
        Ok(())
    }

    /// If `stmts` opens with an explicit `super(args)` call, evaluates
    /// those arguments and recurses into the matching base constructor,
    /// returning the remaining statements with that leading call
    /// stripped. Otherwise invokes the implicit zero-argument base
    /// constructor and returns `stmts` unchanged.
    fn run_leading_super_call<'a>(
        &mut self,
        obj: &crate::heap::ObjectRef,
        class: &Rc<RuntimeClass>,
        stmts: &'a [Stmt],
        env: &mut Environment,
        frames: &Frames,
        span: ast::Span,
    ) -> BlochResult<&'a [Stmt]> {
        if let Some(Stmt::ExprStmt(Expr::Call(callee, call_args, call_span), _)) = stmts.first() {
            if matches!(callee.as_ref(), Expr::Super(_)) {
                let values = self.eval_args(call_args, env, frames)?;
                if let Some(base) = &class.base {
                    let child_frames = extend_frames(frames, env);
                    self.run_constructor_chain(obj, base, values, *call_span, &child_frames)?;
                }
                return Ok(&stmts[1..]);
            }
        }
        if let Some(base) = &class.base {
            let child_frames = extend_frames(frames, env);
            self.run_constructor_chain(obj, base, Vec::new(), span, &child_frames)?;
        }
        Ok(stmts)
    }

    /// Runs constructors root-to-leaf: selects the
    /// overload for `class`, recurses into the base (either via an
    /// explicit leading `super(args)` or implicitly with no arguments),
    /// runs this class's own field initialisers, then executes the
    /// remaining body — or, for a `= default` constructor, copies
    /// parameters into same-named fields instead of running a body.
    fn run_constructor_chain(
        &mut self,
        obj: &crate::heap::ObjectRef,
        class: &Rc<RuntimeClass>,
        args: Vec<Value>,
        span: ast::Span,
        frames: &Frames,
    ) -> BlochResult<()> {
        let ctor = select_overload(class.constructors.iter(), &args)
            .ok_or_else(|| rt_err(span, format!("no matching constructor for '{}'", class.name)))?;
        let ctor = Rc::clone(ctor);
        let mut env = Environment::new(Some(Rc::clone(obj)), Some(Rc::clone(class)));
        for (param, value) in ctor.params.iter().zip(args.iter().cloned()) {
            env.declare(&param.name, value, false);
        }
        match &ctor.body {
            MemberBodyRef::Default => {
                if let Some(base) = &class.base {
                    let child_frames = extend_frames(frames, &env);
                    self.run_constructor_chain(obj, base, Vec::new(), span, &child_frames)?;
                }
                self.run_field_initializers(obj, class, frames)?;
                self.copy_default_constructor_params(obj, class, &ctor, &args, span)?;
            }
            MemberBodyRef::Block(stmts) => {
                let rest = self.run_leading_super_call(obj, class, stmts, &mut env, frames, span)?;
                self.run_field_initializers(obj, class, frames)?;
                let flow = self.exec_stmt_seq(rest, &mut env, frames);
                self.record_scope_tracked_outcomes(&env);
                flow?;
            }
        }
        Ok(())
    }

    fn run_destructor_chain(&mut self, obj: &crate::heap::ObjectRef, span: ast::Span, frames: &Frames) -> BlochResult<()> {
        if obj.borrow().destroyed {
            return Ok(());
        }
        obj.borrow_mut().destroyed = true;
        let skip = obj.borrow().skip_destructor;
        if !skip {
            self.record_object_tracked_outcomes(obj);
            let class = obj.borrow().class.clone();
            self.run_destructor_level(obj, &class, span, frames)?;
        }
        Ok(())
    }

    fn run_destructor_level(&mut self, obj: &crate::heap::ObjectRef, class: &Rc<RuntimeClass>, span: ast::Span, frames: &Frames) -> BlochResult<()> {
        if let Some(destructor) = &class.destructor {
            let defining_class = self.find_owner_class(class, &destructor.owner);
            let mut env = Environment::new(Some(Rc::clone(obj)), defining_class);
            if let MemberBodyRef::Block(stmts) = &destructor.body {
                let flow = self.exec_stmt_seq(stmts, &mut env, frames);
                self.record_scope_tracked_outcomes(&env);
                flow?;
            }
        }
        if let Some(base) = &class.base {
            self.run_destructor_level(obj, base, span, frames)?;
        }
        Ok(())
    }

    /// At destruction, every `@tracked` instance field still holding a
    /// measured qubit/bit contributes its outcome to the aggregate
    /// table, keyed `ClassName.fieldName`.
    fn record_object_tracked_outcomes(&mut self, obj: &crate::heap::ObjectRef) {
        let (class, fields) = {
            let b = obj.borrow();
            (b.class.clone(), b.fields.clone())
        };
        for (field, value) in class.fields.iter().filter(|f| !f.is_static).zip(fields.iter()) {
            if !field.is_tracked {
                continue;
            }
            let label = format!("{}.{}", field.owner, field.name);
            match value {
                Value::Bit(b) => self.record_tracked(label, b.to_string()),
                Value::Qubit(handle) => {
                    if let Some(outcome) = self.qubits.outcome(*handle) {
                        self.record_tracked(label, outcome.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    fn ensure_statics_initialized(&mut self, class: &Rc<RuntimeClass>, frames: &Frames) -> BlochResult<()> {
        if class.statics_initialized.get() {
            return Ok(());
        }
        class.statics_initialized.set(true);
        let empty_env = Environment::new(None, None);
        for field in class.fields.iter().filter(|f| f.is_static) {
            let default = Value::default_for(&field.ty, self, &empty_env, &field.name);
            class.static_fields.borrow_mut().insert(field.name.clone(), default);
        }
        for field in class.fields.iter().filter(|f| f.is_static) {
            if let Some(init) = &field.init {
                let mut env = Environment::new(None, self.find_owner_class(class, &field.owner));
                let value = self.eval_expr(init, &mut env, frames)?;
                class.static_fields.borrow_mut().insert(field.name.clone(), value);
            }
        }
        Ok(())
    }
}

fn mark_object(obj: &crate::heap::ObjectRef) {
    {
        let mut b = obj.borrow_mut();
        if b.gc_mark {
            return;
        }
        b.gc_mark = true;
    }
    let fields = obj.borrow().fields.clone();
    for field in &fields {
        mark_value(field);
    }
}

fn mark_value(value: &Value) {
    match value {
        Value::Object(Some(obj)) => mark_object(obj),
        Value::Array(items) => {
            for item in items.borrow().iter() {
                mark_value(item);
            }
        }
        _ => {}
    }
}

fn loc_of(expr: &Expr) -> ast::Span {
    expr.span()
}

/// Strips a generic instantiation's `<A,B,...>` suffix, e.g. `"Box<Int>"`
/// -> `"Box"`, matching the bare name `FieldInfo::owner` is recorded
/// under (classes.rs builds fields/methods per template, not per
/// instantiation).
fn bare_class_name(name: &str) -> &str {
    name.split('<').next().unwrap_or(name)
}

fn rt_err(span: ast::Span, message: impl Into<String>) -> BlochError {
    BlochError::runtime(span.line, span.column, message)
}

fn describe_qubit_target(expr: &Expr) -> String {
    match expr {
        Expr::Variable(name, _) => format!("qubit {}", name),
        Expr::Index(array, index, _) => {
            let base = match array.as_ref() {
                Expr::Variable(name, _) => name.clone(),
                _ => "qubit".to_string(),
            };
            match index.as_ref() {
                Expr::IntLiteral(n, _) => format!("qubit {}[{}]", base, n),
                _ => format!("qubit {}[]", base),
            }
        }
        Expr::MemberAccess(_, name, _) => format!("qubit {}", name),
        _ => "qubit".to_string(),
    }
}

fn expr_to_assign_target(expr: &Expr) -> BlochResult<AssignTarget> {
    match expr {
        Expr::Variable(name, span) => Ok(AssignTarget::Variable(name.clone(), *span)),
        Expr::MemberAccess(receiver, name, span) => {
            Ok(AssignTarget::Member(receiver.clone(), name.clone(), *span))
        }
        Expr::Index(array, index, span) => Ok(AssignTarget::Index(array.clone(), index.clone(), *span)),
        other => Err(rt_err(loc_of(other), "expression is not assignable")),
    }
}

fn index_of(value: Value, span: ast::Span) -> BlochResult<usize> {
    match value {
        Value::Int(n) if n >= 0 => Ok(n as usize),
        Value::Long(n) if n >= 0 => Ok(n as usize),
        Value::Int(n) | Value::Long(n) => Err(rt_err(span, format!("negative array index {}", n))),
        other => Err(rt_err(span, format!("array index must be numeric, found a {}", other.type_name()))),
    }
}

fn cast_value(ty: &Type, value: Value, span: ast::Span) -> BlochResult<Value> {
    use bloch_compiler::ast::PrimitiveKind as P;
    let Type::Primitive(kind, _) = ty else {
        return Ok(value);
    };
    let as_f64 = |v: &Value| -> Option<f64> {
        match v {
            Value::Int(n) => Some(*n as f64),
            Value::Long(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Bit(b) => Some(*b as f64),
            _ => None,
        }
    };
    match kind {
        P::Int => as_f64(&value).map(|f| Value::Int(f as i64)),
        P::Long => as_f64(&value).map(|f| Value::Long(f as i64)),
        P::Float => as_f64(&value).map(Value::Float),
        P::Bit => as_f64(&value).map(|f| Value::Bit(if f != 0.0 { 1 } else { 0 })),
        P::Boolean => match value {
            Value::Boolean(b) => Some(Value::Boolean(b)),
            _ => None,
        },
        P::String => Some(Value::String(value.to_string())),
        P::Char => match value {
            Value::Char(c) => Some(Value::Char(c)),
            _ => None,
        },
        P::Qubit => match value {
            Value::Qubit(h) => Some(Value::Qubit(h)),
            _ => None,
        },
    }
    .ok_or_else(|| rt_err(span, format!("cannot cast a {} to {}", value.type_name(), kind.name())))
}

/// Dispatches a binary operator over two already-evaluated operands.
/// `bit` behaves as a one-bit unsigned integer that promotes to `int`
/// whenever it meets a wider numeric type or an operator `bit_binary`
/// doesn't itself implement, mirroring the semantic analyser's
/// `numeric_promotion` ranking (`Bit` is the narrowest rung on the same
/// ladder as `Int`/`Long`/`Float`) so the runtime never rejects an
/// operator combination the analyser already accepted.
fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value, span: ast::Span) -> BlochResult<Value> {
    use Value::*;
    match op {
        BinaryOp::Eq => return Ok(Boolean(values_equal(&lhs, &rhs))),
        BinaryOp::Neq => return Ok(Boolean(!values_equal(&lhs, &rhs))),
        _ => {}
    }

    match (lhs, rhs) {
        (String(a), String(b)) if op == BinaryOp::Add => Ok(String(a + &b)),
        (Int(a), Int(b)) => int_binary(op, a, b, span),
        (Long(a), Long(b)) => long_binary(op, a, b, span),
        (Int(a), Long(b)) => long_binary(op, a, b, span),
        (Long(a), Int(b)) => long_binary(op, a, b, span),
        (Float(a), Float(b)) => float_binary(op, a, b, span),
        (Int(a), Float(b)) => float_binary(op, a as f64, b, span),
        (Float(a), Int(b)) => float_binary(op, a, b as f64, span),
        (Long(a), Float(b)) => float_binary(op, a as f64, b, span),
        (Float(a), Long(b)) => float_binary(op, a, b as f64, span),
        (Bit(a), Bit(b)) => bit_binary(op, a, b, span),
        (Bit(a), Int(b)) => int_binary(op, a as i64, b, span),
        (Int(a), Bit(b)) => int_binary(op, a, b as i64, span),
        (Bit(a), Long(b)) => long_binary(op, a as i64, b, span),
        (Long(a), Bit(b)) => long_binary(op, a, b as i64, span),
        (Bit(a), Float(b)) => float_binary(op, a as f64, b, span),
        (Float(a), Bit(b)) => float_binary(op, a, b as f64, span),
        (l, r) => Err(rt_err(
            span,
            format!("operator cannot apply to a {} and a {}", l.type_name(), r.type_name()),
        )),
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64, span: ast::Span) -> BlochResult<Value> {
    match op {
        BinaryOp::Add => Ok(Value::Int(a + b)),
        BinaryOp::Sub => Ok(Value::Int(a - b)),
        BinaryOp::Mul => Ok(Value::Int(a * b)),
        // `/` always yields a float, matching the type the analyser gives
        // every division expression regardless of operand type.
        BinaryOp::Div => checked_div_f64(a as f64, b as f64, span).map(Value::Float),
        BinaryOp::Mod => checked_rem(a, b, span).map(Value::Int),
        BinaryOp::Lt => Ok(Value::Boolean(a < b)),
        BinaryOp::Gt => Ok(Value::Boolean(a > b)),
        BinaryOp::Le => Ok(Value::Boolean(a <= b)),
        BinaryOp::Ge => Ok(Value::Boolean(a >= b)),
        BinaryOp::BitAnd => Ok(Value::Int(a & b)),
        BinaryOp::BitOr => Ok(Value::Int(a | b)),
        BinaryOp::BitXor => Ok(Value::Int(a ^ b)),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Eq | BinaryOp::Neq => unreachable!(),
    }
}

fn long_binary(op: BinaryOp, a: i64, b: i64, span: ast::Span) -> BlochResult<Value> {
    if op == BinaryOp::Div {
        return checked_div_f64(a as f64, b as f64, span).map(Value::Float);
    }
    int_binary(op, a, b, span).map(|v| match v {
        Value::Int(n) => Value::Long(n),
        Value::Boolean(b) => Value::Boolean(b),
        other => other,
    })
}

fn float_binary(op: BinaryOp, a: f64, b: f64, span: ast::Span) -> BlochResult<Value> {
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div => checked_div_f64(a, b, span).map(Value::Float),
        BinaryOp::Mod => {
            if b == 0.0 {
                Err(rt_err(span, "modulo by zero"))
            } else {
                Ok(Value::Float(a % b))
            }
        }
        BinaryOp::Lt => Ok(Value::Boolean(a < b)),
        BinaryOp::Gt => Ok(Value::Boolean(a > b)),
        BinaryOp::Le => Ok(Value::Boolean(a <= b)),
        BinaryOp::Ge => Ok(Value::Boolean(a >= b)),
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
            Err(rt_err(span, "bitwise operators require integral operands"))
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Eq | BinaryOp::Neq => unreachable!(),
    }
}

/// `bit` arithmetic/comparison operators promote both operands to `int`
/// first (mirroring `numeric_promotion`'s `Bit ⊂ Int` ranking) so every
/// operator `int_binary` accepts, `bit_binary` accepts too; only the
/// bitwise trio stays in `bit`'s own one-bit domain.
fn bit_binary(op: BinaryOp, a: u8, b: u8, span: ast::Span) -> BlochResult<Value> {
    match op {
        BinaryOp::BitAnd => Ok(Value::Bit(a & b)),
        BinaryOp::BitOr => Ok(Value::Bit(a | b)),
        BinaryOp::BitXor => Ok(Value::Bit(a ^ b)),
        _ => int_binary(op, a as i64, b as i64, span),
    }
}

fn checked_div(a: i64, b: i64, span: ast::Span) -> BlochResult<i64> {
    if b == 0 {
        Err(rt_err(span, "division by zero"))
    } else {
        Ok(a / b)
    }
}

fn checked_div_f64(a: f64, b: f64, span: ast::Span) -> BlochResult<f64> {
    if b == 0.0 {
        Err(rt_err(span, "division by zero"))
    } else {
        Ok(a / b)
    }
}

fn checked_rem(a: i64, b: i64, span: ast::Span) -> BlochResult<i64> {
    if b == 0 {
        Err(rt_err(span, "modulo by zero"))
    } else {
        Ok(a % b)
    }
}

/// Structural equality for `==`: value types compare by value,
/// objects compare by identity, `null` equals only `null`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Int(x), Value::Long(y)) | (Value::Long(y), Value::Int(x)) => *x == *y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Bit(x), Value::Bit(y)) => x == y,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Qubit(x), Value::Qubit(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => match (x, y) {
            (None, None) => true,
            (Some(x), Some(y)) => Rc::ptr_eq(x, y),
            _ => false,
        },
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::ClassRef(x), Value::ClassRef(y)) => x == y,
        _ => false,
    }
}

fn value_cost_against(value: &Value, ty: &Type) -> Option<u32> {
    use bloch_compiler::ast::PrimitiveKind as P;
    match (value, ty) {
        (Value::Int(_), Type::Primitive(P::Int, _)) => Some(0),
        (Value::Int(_), Type::Primitive(P::Long, _)) => Some(1),
        (Value::Int(_), Type::Primitive(P::Float, _)) => Some(2),
        (Value::Long(_), Type::Primitive(P::Long, _)) => Some(0),
        (Value::Long(_), Type::Primitive(P::Float, _)) => Some(2),
        (Value::Float(_), Type::Primitive(P::Float, _)) => Some(0),
        (Value::Bit(_), Type::Primitive(P::Bit, _)) => Some(0),
        (Value::Boolean(_), Type::Primitive(P::Boolean, _)) => Some(0),
        (Value::String(_), Type::Primitive(P::String, _)) => Some(0),
        (Value::Char(_), Type::Primitive(P::Char, _)) => Some(0),
        (Value::Qubit(_), Type::Primitive(P::Qubit, _)) => Some(0),
        (Value::Array(_), Type::Array { .. }) => Some(0),
        (Value::Object(None), Type::Named { .. }) => Some(0),
        (Value::Object(Some(obj)), Type::Named { path, .. }) => {
            let target = path.last()?;
            let class = obj.borrow().class.clone();
            let bare_target = target.as_str();
            class
                .ancestry()
                .iter()
                .position(|c| c.name.split('<').next().unwrap_or(&c.name) == bare_target)
                .map(|d| d as u32)
        }
        _ => None,
    }
}

/// Picks the best-matching overload among same-name candidates by
/// summing each argument's conversion cost against the candidate's
/// declared parameter types, mirroring the semantic analyser's
/// `conversion_cost` ranking but over concrete runtime values.
fn select_overload<'a, T, I>(candidates: I, args: &[Value]) -> Option<&'a T>
where
    T: HasParams,
    I: Iterator<Item = &'a T>,
{
    let mut best: Option<(&'a T, u32)> = None;
    for candidate in candidates {
        let params = candidate.params();
        if params.len() != args.len() {
            continue;
        }
        let mut total = 0u32;
        let mut ok = true;
        for (param, arg) in params.iter().zip(args.iter()) {
            match value_cost_against(arg, &param.ty) {
                Some(cost) => total += cost,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            continue;
        }
        if best.as_ref().map(|(_, b)| total < *b).unwrap_or(true) {
            best = Some((candidate, total));
        }
    }
    best.map(|(c, _)| c)
}

trait HasParams {
    fn params(&self) -> &[ast::Param];
}

impl HasParams for RuntimeMethod {
    fn params(&self) -> &[ast::Param] {
        &self.params
    }
}

impl HasParams for crate::heap::RuntimeConstructor {
    fn params(&self) -> &[ast::Param] {
        &self.params
    }
}

impl HasParams for FunctionDecl {
    fn params(&self) -> &[ast::Param] {
        &self.params
    }
}

impl<T: HasParams> HasParams for Rc<T> {
    fn params(&self) -> &[ast::Param] {
        self.as_ref().params()
    }
}
