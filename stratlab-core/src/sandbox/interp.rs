//! Tree-walking interpreter with a wall-clock deadline and an operation
//! budget.
//!
//! The deadline is authoritative (the 5s per-call contract); the fuel budget
//! backs it so runaway loops terminate promptly even when the clock is
//! checked only every few thousand operations.

use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;

use crate::domain::{Decision, Signal};
use crate::sandbox::ast::{BinOp, Expr, Function, Program, Stmt, UnOp};
use crate::sandbox::builtins;
use crate::sandbox::validate::CompiledStrategy;
use crate::sandbox::value::{Value, Window};

/// Operation budget per decide call.
const FUEL_PER_CALL: u64 = 20_000_000;

/// The wall clock is consulted every `DEADLINE_CHECK_MASK + 1` operations.
const DEADLINE_CHECK_MASK: u64 = 0xFFF;

/// Maximum user-function call depth.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("decide call exceeded its time budget")]
    Timeout,

    #[error("decide call exhausted its operation budget")]
    FuelExhausted,

    #[error("call depth limit ({MAX_DEPTH}) exceeded")]
    DepthLimit,

    #[error("runtime error at line {line}: {message}")]
    Runtime { line: u32, message: String },

    #[error("decide must return a map or nil, got {0}")]
    BadReturn(&'static str),
}

/// Run one decide call against a window and a persistent state map.
///
/// `state` must be a `Value::Map`; it is mutated in place and carried across
/// calls for one instrument.
pub fn invoke(
    strategy: &CompiledStrategy,
    window: &Window,
    state: &Value,
    deadline: Instant,
) -> Result<Decision, SandboxError> {
    let program = strategy.program();
    let decide = program
        .function("decide")
        .expect("validated strategy always has decide");

    let mut interp = Interp {
        program,
        fuel: FUEL_PER_CALL,
        ops: 0,
        deadline,
        depth: 0,
    };
    let args = vec![Value::Window(window.clone()), state.clone()];
    let result = interp.exec_function(decide, args)?;
    to_decision(result)
}

fn to_decision(value: Value) -> Result<Decision, SandboxError> {
    let map = match value {
        Value::Nil => return Ok(Decision::none()),
        Value::Map(m) => m,
        other => return Err(SandboxError::BadReturn(other.type_name())),
    };
    let map = map.borrow();

    let signal = match map.get("signal") {
        Some(Value::Str(s)) => Signal::parse(s),
        _ => Signal::None,
    };
    let size = match map.get("size") {
        Some(Value::Num(n)) if n.is_finite() && *n > 0.0 => Some(n.min(1.0)),
        _ => None,
    };
    let bracket = |key: &str| match map.get(key) {
        Some(Value::Num(n)) if n.is_finite() => Some(*n),
        _ => None,
    };

    Ok(Decision {
        signal,
        size,
        stop_loss: bracket("stop_loss"),
        take_profit: bracket("take_profit"),
    })
}

enum Flow {
    Normal,
    Return(Value),
}

/// One lexical scope stack per function call.
type Scopes = Vec<HashMap<String, Value>>;

struct Interp<'a> {
    program: &'a Program,
    fuel: u64,
    ops: u64,
    deadline: Instant,
    depth: usize,
}

impl<'a> Interp<'a> {
    fn tick(&mut self, cost: u64) -> Result<(), SandboxError> {
        if self.fuel < cost {
            return Err(SandboxError::FuelExhausted);
        }
        self.fuel -= cost;
        self.ops = self.ops.wrapping_add(1);
        if self.ops & DEADLINE_CHECK_MASK == 0 && Instant::now() >= self.deadline {
            return Err(SandboxError::Timeout);
        }
        Ok(())
    }

    fn exec_function(&mut self, f: &Function, args: Vec<Value>) -> Result<Value, SandboxError> {
        if self.depth >= MAX_DEPTH {
            return Err(SandboxError::DepthLimit);
        }
        if args.len() != f.params.len() {
            return Err(SandboxError::Runtime {
                line: f.line,
                message: format!(
                    "{} expects {} argument(s), found {}",
                    f.name,
                    f.params.len(),
                    args.len()
                ),
            });
        }

        self.depth += 1;
        let mut scopes: Scopes = vec![f.params.iter().cloned().zip(args).collect()];
        let flow = self.exec_block(&mut scopes, &f.body);
        self.depth -= 1;

        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::Nil),
        }
    }

    fn exec_block(&mut self, scopes: &mut Scopes, stmts: &[Stmt]) -> Result<Flow, SandboxError> {
        for stmt in stmts {
            match self.exec_stmt(scopes, stmt)? {
                Flow::Normal => {}
                ret => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, scopes: &mut Scopes, stmt: &Stmt) -> Result<Flow, SandboxError> {
        self.tick(1)?;
        match stmt {
            Stmt::Let { name, expr, .. } => {
                let value = self.eval(scopes, expr)?;
                scopes
                    .last_mut()
                    .expect("scope stack is never empty")
                    .insert(name.clone(), value);
                Ok(Flow::Normal)
            }
            Stmt::Assign { name, expr, line } => {
                let value = self.eval(scopes, expr)?;
                for scope in scopes.iter_mut().rev() {
                    if let Some(slot) = scope.get_mut(name) {
                        *slot = value;
                        return Ok(Flow::Normal);
                    }
                }
                Err(self.runtime(*line, format!("assignment to undefined variable '{name}'")))
            }
            Stmt::IndexAssign { target, index, expr, line } => {
                let map = match self.lookup(scopes, target) {
                    Some(Value::Map(m)) => m,
                    Some(other) => {
                        return Err(self.runtime(
                            *line,
                            format!("cannot index-assign into a {}", other.type_name()),
                        ));
                    }
                    None => {
                        return Err(self.runtime(*line, format!("undefined variable '{target}'")));
                    }
                };
                let key = match self.eval(scopes, index)? {
                    Value::Str(s) => s.to_string(),
                    other => {
                        return Err(self.runtime(
                            *line,
                            format!("map keys must be strings, got {}", other.type_name()),
                        ));
                    }
                };
                let value = self.eval(scopes, expr)?;
                map.borrow_mut().insert(key, value);
                Ok(Flow::Normal)
            }
            Stmt::If { cond, then_body, else_body, .. } => {
                let branch = if self.eval(scopes, cond)?.truthy() {
                    then_body
                } else {
                    else_body
                };
                scopes.push(HashMap::new());
                let flow = self.exec_block(scopes, branch);
                scopes.pop();
                flow
            }
            Stmt::While { cond, body, .. } => {
                while self.eval(scopes, cond)?.truthy() {
                    scopes.push(HashMap::new());
                    let flow = self.exec_block(scopes, body);
                    scopes.pop();
                    match flow? {
                        Flow::Normal => {}
                        ret => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return { expr, .. } => {
                let value = match expr {
                    Some(e) => self.eval(scopes, e)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Expr(e) => {
                self.eval(scopes, e)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn eval(&mut self, scopes: &mut Scopes, expr: &Expr) -> Result<Value, SandboxError> {
        self.tick(1)?;
        match expr {
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::str(s)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Nil => Ok(Value::Nil),
            Expr::Ident { name, line } => self
                .lookup(scopes, name)
                .ok_or_else(|| self.runtime(*line, format!("undefined variable '{name}'"))),
            Expr::Unary { op, expr } => {
                let v = self.eval(scopes, expr)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!v.truthy())),
                    UnOp::Neg => match v {
                        Value::Num(n) => Ok(Value::Num(-n)),
                        other => Err(self.runtime(
                            0,
                            format!("cannot negate a {}", other.type_name()),
                        )),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs, line } => self.eval_binary(scopes, *op, lhs, rhs, *line),
            Expr::Call { name, args, line } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(scopes, arg)?);
                }
                if builtins::is_builtin(name) {
                    self.tick(builtin_cost(&values))?;
                    builtins::call(name, &values, *line)
                } else {
                    // Validation guarantees the name resolves to a user fn.
                    let f = self.program.function(name).ok_or_else(|| {
                        self.runtime(*line, format!("unknown function '{name}'"))
                    })?;
                    self.exec_function(f, values)
                }
            }
            Expr::Index { target, index, line } => {
                let target = self.eval(scopes, target)?;
                let index = self.eval(scopes, index)?;
                match (target, index) {
                    (Value::Series(s), Value::Num(n)) => {
                        if !n.is_finite() || n.fract() != 0.0 {
                            return Err(self.runtime(
                                *line,
                                format!("series index must be an integer, got {n}"),
                            ));
                        }
                        Ok(s.get(n as i64).map_or(Value::Nil, Value::Num))
                    }
                    (Value::Map(m), Value::Str(key)) => {
                        Ok(m.borrow().get(key.as_ref()).cloned().unwrap_or(Value::Nil))
                    }
                    (target, index) => Err(self.runtime(
                        *line,
                        format!(
                            "cannot index a {} with a {}",
                            target.type_name(),
                            index.type_name()
                        ),
                    )),
                }
            }
            Expr::Field { target, name, line } => {
                let target = self.eval(scopes, target)?;
                match target {
                    Value::Window(w) => w.field(name).ok_or_else(|| {
                        self.runtime(*line, format!("window has no field '{name}'"))
                    }),
                    Value::Map(m) => {
                        Ok(m.borrow().get(name.as_str()).cloned().unwrap_or(Value::Nil))
                    }
                    other => Err(self.runtime(
                        *line,
                        format!("cannot access field '{name}' on a {}", other.type_name()),
                    )),
                }
            }
            Expr::MapLit { entries, .. } => {
                let out = Value::map();
                if let Value::Map(m) = &out {
                    for (key, expr) in entries {
                        let value = self.eval(scopes, expr)?;
                        m.borrow_mut().insert(key.clone(), value);
                    }
                }
                Ok(out)
            }
        }
    }

    fn eval_binary(
        &mut self,
        scopes: &mut Scopes,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        line: u32,
    ) -> Result<Value, SandboxError> {
        // Short-circuit forms first.
        match op {
            BinOp::And => {
                let l = self.eval(scopes, lhs)?;
                if !l.truthy() {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(scopes, rhs)?;
                return Ok(Value::Bool(r.truthy()));
            }
            BinOp::Or => {
                let l = self.eval(scopes, lhs)?;
                if l.truthy() {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(scopes, rhs)?;
                return Ok(Value::Bool(r.truthy()));
            }
            _ => {}
        }

        let l = self.eval(scopes, lhs)?;
        let r = self.eval(scopes, rhs)?;
        match op {
            BinOp::Eq => Ok(Value::Bool(l == r)),
            BinOp::Ne => Ok(Value::Bool(l != r)),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                let (a, b) = self.numeric_pair(op, l, r, line)?;
                let out = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Rem => a % b,
                    _ => unreachable!(),
                };
                Ok(Value::Num(out))
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let (a, b) = self.numeric_pair(op, l, r, line)?;
                let out = match op {
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    BinOp::Ge => a >= b,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(out))
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn numeric_pair(
        &self,
        op: BinOp,
        l: Value,
        r: Value,
        line: u32,
    ) -> Result<(f64, f64), SandboxError> {
        match (l, r) {
            (Value::Num(a), Value::Num(b)) => Ok((a, b)),
            (l, r) => Err(self.runtime(
                line,
                format!(
                    "operator {op:?} needs numbers, got {} and {}",
                    l.type_name(),
                    r.type_name()
                ),
            )),
        }
    }

    fn lookup(&self, scopes: &Scopes, name: &str) -> Option<Value> {
        scopes.iter().rev().find_map(|scope| scope.get(name).cloned())
    }

    fn runtime(&self, line: u32, message: String) -> SandboxError {
        SandboxError::Runtime { line, message }
    }
}

/// Builtins are charged in proportion to the data they touch.
fn builtin_cost(args: &[Value]) -> u64 {
    1 + args
        .iter()
        .map(|v| match v {
            Value::Series(s) => s.len() as u64,
            Value::Map(m) => m.borrow().len() as u64,
            _ => 0,
        })
        .sum::<u64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use crate::sandbox::validate::validate;
    use crate::sandbox::value::Columns;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;

    fn make_window(closes: &[f64]) -> Window {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap();
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(
                    start + ChronoDuration::days(i as i64),
                    c,
                    c + 1.0,
                    c - 1.0,
                    c,
                    1000.0,
                )
            })
            .collect();
        let len = bars.len();
        Window::new(Columns::from_bars(&bars), len)
    }

    fn run(source: &str, closes: &[f64]) -> Result<Decision, SandboxError> {
        let strategy = validate(source).unwrap();
        let window = make_window(closes);
        let state = Value::map();
        invoke(
            &strategy,
            &window,
            &state,
            Instant::now() + Duration::from_secs(5),
        )
    }

    #[test]
    fn returns_buy_decision_with_brackets() {
        let d = run(
            r#"fn decide(window, state) {
                return { signal: "buy", stop_loss: 0.98, take_profit: 1.1, size: 0.5 };
            }"#,
            &[100.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::Buy);
        assert_eq!(d.size, Some(0.5));
        assert_eq!(d.stop_loss, Some(0.98));
        assert_eq!(d.take_profit, Some(1.1));
    }

    #[test]
    fn nil_return_is_none_decision() {
        let d = run("fn decide(window, state) { return nil; }", &[100.0]).unwrap();
        assert_eq!(d, Decision::none());
    }

    #[test]
    fn missing_signal_key_is_none() {
        let d = run("fn decide(window, state) { return { size: 1.0 }; }", &[100.0]).unwrap();
        assert_eq!(d.signal, Signal::None);
    }

    #[test]
    fn unrecognized_signal_is_none() {
        let d = run(
            r#"fn decide(window, state) { return { signal: "short" }; }"#,
            &[100.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::None);
    }

    #[test]
    fn oversize_is_clamped_to_one() {
        let d = run(
            r#"fn decide(window, state) { return { signal: "buy", size: 7.0 }; }"#,
            &[100.0],
        )
        .unwrap();
        assert_eq!(d.size, Some(1.0));
    }

    #[test]
    fn number_return_is_bad_return() {
        let err = run("fn decide(window, state) { return 42; }", &[100.0]).unwrap_err();
        assert!(matches!(err, SandboxError::BadReturn("number")));
    }

    #[test]
    fn window_access_and_arithmetic() {
        let d = run(
            r#"fn decide(window, state) {
                let closes = window.close;
                if closes[-1] > closes[0] * 1.05 {
                    return { signal: "buy" };
                }
                return { signal: "none" };
            }"#,
            &[100.0, 102.0, 110.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn state_persists_across_calls() {
        let strategy = validate(
            r#"fn decide(window, state) {
                let n = state["calls"];
                if n == nil {
                    n = 0;
                }
                state["calls"] = n + 1;
                if state["calls"] >= 2 {
                    return { signal: "buy" };
                }
                return { signal: "none" };
            }"#,
        )
        .unwrap();
        let window = make_window(&[100.0]);
        let state = Value::map();
        let deadline = || Instant::now() + Duration::from_secs(5);

        let d1 = invoke(&strategy, &window, &state, deadline()).unwrap();
        assert_eq!(d1.signal, Signal::None);
        let d2 = invoke(&strategy, &window, &state, deadline()).unwrap();
        assert_eq!(d2.signal, Signal::Buy);
    }

    #[test]
    fn while_loop_computes() {
        let d = run(
            r#"fn decide(window, state) {
                let i = 0;
                let total = 0;
                while i < 10 {
                    total = total + i;
                    i = i + 1;
                }
                if total == 45 {
                    return { signal: "buy" };
                }
                return { signal: "none" };
            }"#,
            &[100.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn user_function_call() {
        let d = run(
            r#"fn double(x) { return x * 2; }
            fn decide(window, state) {
                if double(21) == 42 {
                    return { signal: "buy" };
                }
                return { signal: "none" };
            }"#,
            &[100.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn infinite_loop_hits_deadline() {
        let strategy =
            validate("fn decide(window, state) { while true { let x = 1; } return nil; }")
                .unwrap();
        let window = make_window(&[100.0]);
        let state = Value::map();
        // Deadline already passed: the first periodic check trips.
        let err = invoke(&strategy, &window, &state, Instant::now()).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Timeout | SandboxError::FuelExhausted
        ));
    }

    #[test]
    fn runaway_recursion_hits_depth_limit() {
        let err = run(
            "fn loop_forever(x) { return loop_forever(x); }\nfn decide(window, state) { return loop_forever(1); }",
            &[100.0],
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::DepthLimit));
    }

    #[test]
    fn undefined_variable_is_runtime_error() {
        let err = run("fn decide(window, state) { return { signal: missing }; }", &[100.0])
            .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { .. }));
    }

    #[test]
    fn series_out_of_range_index_is_nil() {
        let d = run(
            r#"fn decide(window, state) {
                if window.close[-99] == nil {
                    return { signal: "buy" };
                }
                return { signal: "none" };
            }"#,
            &[100.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn missing_map_key_is_nil() {
        let d = run(
            r#"fn decide(window, state) {
                if state["never_set"] == nil {
                    return { signal: "buy" };
                }
                return { signal: "none" };
            }"#,
            &[100.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn comparing_nil_with_less_than_is_error() {
        let err = run(
            r#"fn decide(window, state) {
                if state["x"] < 3 {
                    return nil;
                }
                return nil;
            }"#,
            &[100.0],
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { .. }));
    }

    #[test]
    fn bollinger_field_access() {
        let d = run(
            r#"fn decide(window, state) {
                let bb = bollinger(window.close, 5, 2.0);
                if bb != nil && window.close[-1] < bb.upper {
                    return { signal: "buy" };
                }
                return { signal: "none" };
            }"#,
            &[100.0, 101.0, 99.0, 100.5, 100.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn short_circuit_avoids_rhs_error() {
        let d = run(
            r#"fn decide(window, state) {
                let x = state["x"];
                if x != nil && x > 3 {
                    return { signal: "sell" };
                }
                return { signal: "none" };
            }"#,
            &[100.0],
        )
        .unwrap();
        assert_eq!(d.signal, Signal::None);
    }
}
