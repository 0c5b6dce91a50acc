//! Tree-walking interpreter for the lowered host subset.
//!
//! Flatten markers, contexts and observation blocks are rejected: the
//! interpreter only ever sees what the lowering emits, plus ordinary
//! host code around it. Stream operators are dispatched as methods by
//! the names in `OperatorNames`; a non-stream receiver is wrapped as a
//! single-value stream first.

use crate::error::EvalError;
use crate::operators;
use crate::stream::{Event, Observer, Stream, Subscription};
use crate::value::Value;
use obsctx_core::ast::{BinaryOp, Body, Expr, Function, Literal, Param, Program, Stmt, UnaryOp};
use obsctx_core::OperatorNames;
use rust_decimal::Decimal;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::str::FromStr;
use tracing::warn;

// ──────────────────────────────────────────────
// Environments
// ──────────────────────────────────────────────

struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

/// A mutable scope shared by every closure created in it.
#[derive(Clone)]
pub struct Env {
    frame: Rc<RefCell<Frame>>,
}

impl Env {
    pub fn root() -> Env {
        Env {
            frame: Rc::new(RefCell::new(Frame {
                vars: HashMap::new(),
                parent: None,
            })),
        }
    }

    pub fn child(&self) -> Env {
        Env {
            frame: Rc::new(RefCell::new(Frame {
                vars: HashMap::new(),
                parent: Some(self.clone()),
            })),
        }
    }

    pub fn define(&self, name: &str, value: Value) {
        self.frame.borrow_mut().vars.insert(name.to_owned(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let frame = self.frame.borrow();
        match frame.vars.get(name) {
            Some(v) => Some(v.clone()),
            None => frame.parent.as_ref().and_then(|p| p.lookup(name)),
        }
    }

    /// Update the innermost existing binding; false if there is none.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let parent = {
            let mut frame = self.frame.borrow_mut();
            if let Some(slot) = frame.vars.get_mut(name) {
                *slot = value;
                return true;
            }
            frame.parent.clone()
        };
        match parent {
            Some(p) => p.assign(name, value),
            None => false,
        }
    }
}

/// An arrow function together with the scope it was created in.
pub struct Closure {
    pub func: Function,
    pub env: Env,
}

enum Flow {
    Normal,
    Return(Value),
}

// ──────────────────────────────────────────────
// Evaluation
// ──────────────────────────────────────────────

/// Cheap handle captured by stream callbacks.
#[derive(Clone)]
struct Machine {
    ops: Rc<OperatorNames>,
}

impl Machine {
    fn exec_block(&self, stmts: &[Stmt], env: &Env) -> Result<Flow, EvalError> {
        for stmt in stmts {
            if let Flow::Return(v) = self.exec_stmt(stmt, env)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&self, stmt: &Stmt, env: &Env) -> Result<Flow, EvalError> {
        match stmt {
            Stmt::Let { name, value, .. } => {
                let v = self.eval(value, env)?;
                env.define(name, v);
            }
            Stmt::Assign { name, value, .. } => {
                let v = self.eval(value, env)?;
                if !env.assign(name, v) {
                    return Err(EvalError::UnboundVariable { name: name.clone() });
                }
            }
            Stmt::Create { .. } | Stmt::ChainCreate { .. } => {
                return Err(EvalError::NotLowered {
                    construct: "creation shorthand",
                })
            }
            Stmt::Expr(e) => {
                self.eval(e, env)?;
            }
            Stmt::Return(Some(e)) => return Ok(Flow::Return(self.eval(e, env)?)),
            Stmt::Return(None) => return Ok(Flow::Return(Value::Null)),
        }
        Ok(Flow::Normal)
    }

    fn eval_all(&self, exprs: &[Expr], env: &Env) -> Result<Vec<Value>, EvalError> {
        exprs.iter().map(|e| self.eval(e, env)).collect()
    }

    fn eval(&self, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(lit) => literal(lit),
            Expr::Ident(name) => env
                .lookup(name)
                .ok_or_else(|| EvalError::UnboundVariable { name: name.clone() }),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand, env)?;
                unary(*op, v)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, env)?;
                match op {
                    BinaryOp::And if !l.is_truthy() => Ok(l),
                    BinaryOp::Or if l.is_truthy() => Ok(l),
                    BinaryOp::Coalesce if !matches!(l, Value::Null) => Ok(l),
                    BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => self.eval(right, env),
                    _ => {
                        let r = self.eval(right, env)?;
                        binary(*op, &l, &r)
                    }
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.is_truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Call { callee, args } => {
                if let Expr::Member { object, property } = callee.as_ref() {
                    let receiver = self.eval(object, env)?;
                    let args = self.eval_all(args, env)?;
                    return self.call_method(receiver, property, args);
                }
                let f = self.eval(callee, env)?;
                let args = self.eval_all(args, env)?;
                self.call(&f, args)
            }
            Expr::Member { object, property } => {
                let v = self.eval(object, env)?;
                member(&v, property)
            }
            Expr::Index { object, index } => {
                let v = self.eval(object, env)?;
                let i = self.eval(index, env)?;
                match (v, i) {
                    (Value::Array(items), Value::Int(i)) => Ok(usize::try_from(i)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(Value::Null)),
                    (v, i) => Err(EvalError::TypeError {
                        message: format!("cannot index {} with {}", v.type_name(), i.type_name()),
                    }),
                }
            }
            Expr::Array(items) => Ok(Value::Array(self.eval_all(items, env)?)),
            Expr::Arrow(func) => Ok(Value::Function(Rc::new(Closure {
                func: (**func).clone(),
                env: env.clone(),
            }))),
            Expr::Flatten(_) => Err(EvalError::NotLowered {
                construct: "flatten marker",
            }),
            Expr::Context(_) => Err(EvalError::NotLowered {
                construct: "observable context",
            }),
            Expr::Observe(_) => Err(EvalError::NotLowered {
                construct: "observation block",
            }),
        }
    }

    fn call(&self, f: &Value, args: Vec<Value>) -> Result<Value, EvalError> {
        match f {
            Value::Function(closure) => self.call_closure(closure, args),
            Value::Native(native) => (native.func)(args),
            other => Err(EvalError::NotCallable {
                what: other.type_name().to_owned(),
            }),
        }
    }

    fn call_closure(&self, closure: &Closure, args: Vec<Value>) -> Result<Value, EvalError> {
        let env = closure.env.child();
        let mut args = args.into_iter();
        for param in &closure.func.params {
            bind_param(&env, param, args.next().unwrap_or(Value::Null))?;
        }
        match &closure.func.body {
            Body::Expr(e) => self.eval(e, &env),
            Body::Block(stmts) => match self.exec_block(stmts, &env)? {
                Flow::Return(v) => Ok(v),
                Flow::Normal => Ok(Value::Null),
            },
        }
    }

    fn call_method(&self, receiver: Value, method: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let ops = &self.ops;
        if method == ops.transform {
            let f = args.into_iter().next().ok_or_else(|| EvalError::TypeError {
                message: format!("{} expects a function", method),
            })?;
            let stream = operators::transform(receiver.into_stream(), self.callback(f));
            return Ok(Value::Stream(stream));
        }
        if method == ops.flatten_latest {
            return Ok(Value::Stream(operators::flatten_latest(receiver.into_stream())));
        }
        if method == ops.default_until_first {
            return Ok(Value::Stream(operators::default_until_first(
                receiver.into_stream(),
            )));
        }
        if method == ops.subscribe {
            return Ok(Value::Subscription(self.subscribe(receiver.into_stream(), args)));
        }
        match (&receiver, method) {
            (Value::Subscription(sub), "unsubscribe") => {
                sub.unsubscribe();
                Ok(Value::Null)
            }
            _ => {
                let f = member(&receiver, method)?;
                self.call(&f, args)
            }
        }
    }

    fn callback(&self, f: Value) -> Rc<dyn Fn(Value) -> Result<Value, Value>> {
        let machine = self.clone();
        Rc::new(move |v| machine.call(&f, vec![v]).map_err(EvalError::into_value))
    }

    /// Run an error handler, or log the error when there is none.
    fn handle_error(&self, handler: Option<&Value>, error: Value) {
        match handler {
            Some(h) => {
                if let Err(e) = self.call(h, vec![error]) {
                    warn!(error = %e, "error handler failed");
                }
            }
            None => warn!(error = %error, "unhandled stream error"),
        }
    }

    /// `subscribe(next, error, complete)`: missing or `null` handlers are
    /// skipped. A failing next handler is routed to the error handler.
    /// The subscription is released after any terminal event, once the
    /// handler has run.
    fn subscribe(&self, stream: Stream, handlers: Vec<Value>) -> Subscription {
        let mut handlers = handlers.into_iter().map(|h| match h {
            Value::Null => None,
            other => Some(other),
        });
        let on_next = handlers.next().flatten();
        let on_error = handlers.next().flatten();
        let on_complete = handlers.next().flatten();

        let handle = Subscription::new();
        let done = Rc::new(Cell::new(false));
        let machine = self.clone();
        let owner = handle.clone();
        let observer = Observer::new(move |event| {
            if done.get() {
                return;
            }
            match event {
                Event::Next(v) => {
                    if let Some(f) = &on_next {
                        if let Err(e) = machine.call(f, vec![v]) {
                            done.set(true);
                            machine.handle_error(on_error.as_ref(), e.into_value());
                            owner.unsubscribe();
                        }
                    }
                }
                Event::Error(e) => {
                    done.set(true);
                    machine.handle_error(on_error.as_ref(), e);
                    owner.unsubscribe();
                }
                Event::Complete => {
                    done.set(true);
                    if let Some(f) = &on_complete {
                        if let Err(e) = machine.call(f, vec![]) {
                            warn!(error = %e, "completion handler failed");
                        }
                    }
                    owner.unsubscribe();
                }
            }
        });
        handle.add_child(stream.subscribe(observer));
        handle
    }
}

fn bind_param(env: &Env, param: &Param, arg: Value) -> Result<(), EvalError> {
    match param {
        Param::Name(n) => env.define(n, arg),
        Param::Tuple(names) => match arg {
            Value::Array(items) => {
                let mut items = items.into_iter();
                for n in names {
                    env.define(n, items.next().unwrap_or(Value::Null));
                }
            }
            other => {
                return Err(EvalError::TypeError {
                    message: format!("cannot destructure {} as a tuple", other.type_name()),
                })
            }
        },
    }
    Ok(())
}

fn member(v: &Value, property: &str) -> Result<Value, EvalError> {
    match (v, property) {
        (Value::Array(items), "length") => Ok(Value::Int(items.len() as i64)),
        (Value::Str(s), "length") => Ok(Value::Int(s.chars().count() as i64)),
        (Value::Subscription(s), "closed") => Ok(Value::Bool(s.is_closed())),
        _ => Err(EvalError::TypeError {
            message: format!("{} has no property '{}'", v.type_name(), property),
        }),
    }
}

// ──────────────────────────────────────────────
// Operators
// ──────────────────────────────────────────────

fn literal(lit: &Literal) -> Result<Value, EvalError> {
    Ok(match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(s) => Value::Decimal(Decimal::from_str(s).map_err(|e| EvalError::TypeError {
            message: format!("invalid decimal literal {}: {}", s, e),
        })?),
        Literal::Str(s) => Value::Str(s.clone()),
    })
}

fn unary(op: UnaryOp, v: Value) -> Result<Value, EvalError> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(|| EvalError::Overflow {
            message: format!("-({})", n),
        }),
        (UnaryOp::Neg, Value::Decimal(d)) => Ok(Value::Decimal(-d)),
        (UnaryOp::Neg, other) => Err(EvalError::TypeError {
            message: format!("cannot negate {}", other.type_name()),
        }),
    }
}

fn as_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Int(n) => Some(Decimal::from(*n)),
        Value::Decimal(d) => Some(*d),
        _ => None,
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::Neq => Ok(Value::Bool(l != r)),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let ord = compare(l, r)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Lte => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (l, r) {
            (Value::Str(a), b) => Ok(Value::Str(format!("{}{}", a, b))),
            (a, Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            _ => arithmetic(op, l, r),
        },
        _ => arithmetic(op, l, r),
    }
}

fn compare(l: &Value, r: &Value) -> Result<Ordering, EvalError> {
    if let (Some(a), Some(b)) = (as_decimal(l), as_decimal(r)) {
        return Ok(a.cmp(&b));
    }
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => Err(EvalError::TypeError {
            message: format!("cannot compare {} with {}", l.type_name(), r.type_name()),
        }),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::Overflow {
        message: format!("{} {} {}", l, op.symbol(), r),
    };
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        return match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => Err(EvalError::DivisionByZero),
            BinaryOp::Rem => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div => match a.checked_rem(b) {
                Some(0) => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
                Some(_) => decimal_arithmetic(op, Decimal::from(a), Decimal::from(b)).ok_or_else(overflow),
                None => Err(overflow()),
            },
            _ => Err(EvalError::TypeError {
                message: format!("'{}' is not an arithmetic operator", op.symbol()),
            }),
        };
    }
    match (as_decimal(l), as_decimal(r)) {
        (Some(_), Some(b)) if b.is_zero() && matches!(op, BinaryOp::Div | BinaryOp::Rem) => {
            Err(EvalError::DivisionByZero)
        }
        (Some(a), Some(b)) => decimal_arithmetic(op, a, b).ok_or_else(overflow),
        _ => Err(EvalError::TypeError {
            message: format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                l.type_name(),
                r.type_name()
            ),
        }),
    }
}

fn decimal_arithmetic(op: BinaryOp, a: Decimal, b: Decimal) -> Option<Value> {
    let d = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Rem => a.checked_rem(b),
        _ => None,
    }?;
    Some(Value::Decimal(d.normalize()))
}

// ──────────────────────────────────────────────
// Public interpreter
// ──────────────────────────────────────────────

/// Global scope plus the operator names the lowered code calls.
pub struct Interpreter {
    globals: Env,
    machine: Machine,
}

impl Interpreter {
    /// An interpreter whose globals hold the `combine` primitive.
    pub fn new(ops: OperatorNames) -> Self {
        let globals = Env::root();
        globals.define(
            &ops.combine,
            Value::native(&ops.combine, |args| {
                let sources = args.into_iter().map(Value::into_stream).collect();
                Ok(Value::Stream(operators::combine(sources)))
            }),
        );
        Interpreter {
            globals,
            machine: Machine { ops: Rc::new(ops) },
        }
    }

    pub fn define(&self, name: &str, value: Value) {
        self.globals.define(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.globals.lookup(name)
    }

    /// Execute a program's top-level statements in the global scope.
    pub fn run(&self, program: &Program) -> Result<(), EvalError> {
        self.machine.exec_block(&program.body, &self.globals)?;
        Ok(())
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.machine.eval(expr, &self.globals)
    }

    pub fn call(&self, f: &Value, args: Vec<Value>) -> Result<Value, EvalError> {
        self.machine.call(f, args)
    }

    pub fn call_global(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let f = self.get(name).ok_or_else(|| EvalError::UnboundVariable {
            name: name.to_owned(),
        })?;
        self.call(&f, args)
    }
}
