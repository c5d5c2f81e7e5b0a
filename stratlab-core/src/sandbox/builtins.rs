//! Builtin numeric library — the only callables a strategy can reach.
//!
//! Rolling functions (`sma`, `ema`, `rsi`, `atr`, `bollinger`, `highest`,
//! `lowest`, `change`) return the value for the most recent complete window
//! and nil when the series is too short, so scripts can length-guard either
//! up front or on the result.

use crate::sandbox::interp::SandboxError;
use crate::sandbox::value::{Series, Value};

const NAMES: &[&str] = &[
    "len", "abs", "floor", "ceil", "round", "sqrt", "min", "max", "first",
    "last", "sum", "mean", "stddev", "highest", "lowest", "change", "sma",
    "ema", "rsi", "atr", "bollinger", "vwap",
];

pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Dispatch a builtin call. `line` is the call site, for error reporting.
pub fn call(name: &str, args: &[Value], line: u32) -> Result<Value, SandboxError> {
    match name {
        "len" => builtin_len(args, line),
        "abs" => map_num(args, line, "abs", f64::abs),
        "floor" => map_num(args, line, "floor", f64::floor),
        "ceil" => map_num(args, line, "ceil", f64::ceil),
        "round" => map_num(args, line, "round", f64::round),
        "sqrt" => map_num(args, line, "sqrt", f64::sqrt),
        "min" => fold_nums(args, line, "min", f64::min),
        "max" => fold_nums(args, line, "max", f64::max),
        "first" => {
            let s = series_arg(args, 0, 1, "first", line)?;
            Ok(opt_num(s.get(0)))
        }
        "last" => {
            let s = series_arg(args, 0, 1, "last", line)?;
            Ok(opt_num(s.get(-1)))
        }
        "sum" => {
            let s = series_arg(args, 0, 1, "sum", line)?;
            Ok(Value::Num(s.values().iter().sum()))
        }
        "mean" => {
            let s = series_arg(args, 0, 1, "mean", line)?;
            Ok(opt_num(mean(s.values())))
        }
        "stddev" => {
            let s = series_arg(args, 0, 1, "stddev", line)?;
            Ok(opt_num(sample_stddev(s.values())))
        }
        "highest" => rolling_fold(args, line, "highest", f64::max),
        "lowest" => rolling_fold(args, line, "lowest", f64::min),
        "change" => builtin_change(args, line),
        "sma" => builtin_sma(args, line),
        "ema" => builtin_ema(args, line),
        "rsi" => builtin_rsi(args, line),
        "atr" => builtin_atr(args, line),
        "bollinger" => builtin_bollinger(args, line),
        "vwap" => builtin_vwap(args, line),
        _ => Err(runtime(line, format!("unknown builtin '{name}'"))),
    }
}

// ── Scalar helpers ───────────────────────────────────────────────────

fn builtin_len(args: &[Value], line: u32) -> Result<Value, SandboxError> {
    arity(args, 1, "len", line)?;
    let n = match &args[0] {
        Value::Series(s) => s.len(),
        Value::Map(m) => m.borrow().len(),
        Value::Str(s) => s.chars().count(),
        Value::Window(w) => w.len(),
        other => {
            return Err(runtime(line, format!("len expects a series, map, string, or window, got {}", other.type_name())));
        }
    };
    Ok(Value::Num(n as f64))
}

fn map_num(
    args: &[Value],
    line: u32,
    name: &str,
    f: fn(f64) -> f64,
) -> Result<Value, SandboxError> {
    arity(args, 1, name, line)?;
    Ok(Value::Num(f(num_arg(args, 0, name, line)?)))
}

fn fold_nums(
    args: &[Value],
    line: u32,
    name: &str,
    f: fn(f64, f64) -> f64,
) -> Result<Value, SandboxError> {
    if args.len() < 2 {
        return Err(runtime(line, format!("{name} expects at least 2 arguments")));
    }
    let mut acc = num_arg(args, 0, name, line)?;
    for i in 1..args.len() {
        acc = f(acc, num_arg(args, i, name, line)?);
    }
    Ok(Value::Num(acc))
}

// ── Rolling statistics ───────────────────────────────────────────────

fn rolling_fold(
    args: &[Value],
    line: u32,
    name: &str,
    f: fn(f64, f64) -> f64,
) -> Result<Value, SandboxError> {
    let s = series_arg(args, 0, 2, name, line)?;
    let period = period_arg(args, 1, name, line)?;
    let values = s.values();
    if values.len() < period {
        return Ok(Value::Nil);
    }
    let window = &values[values.len() - period..];
    Ok(Value::Num(window.iter().copied().fold(window[0], f)))
}

fn builtin_change(args: &[Value], line: u32) -> Result<Value, SandboxError> {
    if args.is_empty() || args.len() > 2 {
        return Err(runtime(line, "change expects (series) or (series, period)".into()));
    }
    let s = match &args[0] {
        Value::Series(s) => s,
        other => return Err(type_err("change", 0, "series", other, line)),
    };
    let period = if args.len() == 2 {
        period_arg(args, 1, "change", line)?
    } else {
        1
    };
    match (s.get(-1), s.get(-1 - period as i64)) {
        (Some(now), Some(then)) => Ok(Value::Num(now - then)),
        _ => Ok(Value::Nil),
    }
}

fn builtin_sma(args: &[Value], line: u32) -> Result<Value, SandboxError> {
    let s = series_arg(args, 0, 2, "sma", line)?;
    let period = period_arg(args, 1, "sma", line)?;
    let values = s.values();
    if values.len() < period {
        return Ok(Value::Nil);
    }
    Ok(opt_num(mean(&values[values.len() - period..])))
}

fn builtin_ema(args: &[Value], line: u32) -> Result<Value, SandboxError> {
    let s = series_arg(args, 0, 2, "ema", line)?;
    let period = period_arg(args, 1, "ema", line)?;
    let values = s.values();
    if values.len() < period {
        return Ok(Value::Nil);
    }
    // Seed with the SMA of the first `period` values, then smooth forward.
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    for &v in &values[period..] {
        ema = alpha * v + (1.0 - alpha) * ema;
    }
    Ok(Value::Num(ema))
}

/// RSI with Wilder smoothing.
/// avg_loss == 0 → 100; avg_gain == 0 → 0; neither moving → 50.
fn builtin_rsi(args: &[Value], line: u32) -> Result<Value, SandboxError> {
    let s = series_arg(args, 0, 2, "rsi", line)?;
    let period = period_arg(args, 1, "rsi", line)?;
    let values = s.values();
    if values.len() < period + 1 {
        return Ok(Value::Nil);
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..values.len() {
        let change = values[i] - values[i - 1];
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };
        avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
    }

    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    Ok(Value::Num(rsi))
}

/// Average True Range over (high, low, close) with Wilder smoothing.
fn builtin_atr(args: &[Value], line: u32) -> Result<Value, SandboxError> {
    arity(args, 4, "atr", line)?;
    let (high, low, close) = match (&args[0], &args[1], &args[2]) {
        (Value::Series(h), Value::Series(l), Value::Series(c)) => (h, l, c),
        _ => return Err(runtime(line, "atr expects (high, low, close, period)".into())),
    };
    let period = period_arg(args, 3, "atr", line)?;
    let n = high.len();
    if low.len() != n || close.len() != n {
        return Err(runtime(line, "atr series lengths differ".into()));
    }
    if n < period + 1 {
        return Ok(Value::Nil);
    }

    let (h, l, c) = (high.values(), low.values(), close.values());
    let true_range = |i: usize| -> f64 {
        let hl = h[i] - l[i];
        let hc = (h[i] - c[i - 1]).abs();
        let lc = (l[i] - c[i - 1]).abs();
        hl.max(hc).max(lc)
    };

    let mut atr = (1..=period).map(true_range).sum::<f64>() / period as f64;
    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        atr = alpha * true_range(i) + (1.0 - alpha) * atr;
    }
    Ok(Value::Num(atr))
}

/// Bollinger bands over the trailing window: `{ upper, mid, lower }`.
fn builtin_bollinger(args: &[Value], line: u32) -> Result<Value, SandboxError> {
    arity(args, 3, "bollinger", line)?;
    let s = match &args[0] {
        Value::Series(s) => s,
        other => return Err(type_err("bollinger", 0, "series", other, line)),
    };
    let period = period_arg(args, 1, "bollinger", line)?;
    let k = num_arg(args, 2, "bollinger", line)?;
    let values = s.values();
    if values.len() < period {
        return Ok(Value::Nil);
    }

    let window = &values[values.len() - period..];
    let mid = window.iter().sum::<f64>() / period as f64;
    let sd = sample_stddev(window).unwrap_or(0.0);

    let out = Value::map();
    if let Value::Map(m) = &out {
        let mut m = m.borrow_mut();
        m.insert("upper".into(), Value::Num(mid + k * sd));
        m.insert("mid".into(), Value::Num(mid));
        m.insert("lower".into(), Value::Num(mid - k * sd));
    }
    Ok(out)
}

/// Volume-weighted average price over the whole window.
fn builtin_vwap(args: &[Value], line: u32) -> Result<Value, SandboxError> {
    arity(args, 2, "vwap", line)?;
    let (prices, volumes) = match (&args[0], &args[1]) {
        (Value::Series(p), Value::Series(v)) => (p, v),
        _ => return Err(runtime(line, "vwap expects (prices, volumes)".into())),
    };
    if prices.len() != volumes.len() {
        return Err(runtime(line, "vwap series lengths differ".into()));
    }
    let total_volume: f64 = volumes.values().iter().sum();
    if prices.is_empty() || total_volume == 0.0 {
        return Ok(Value::Nil);
    }
    let weighted: f64 = prices
        .values()
        .iter()
        .zip(volumes.values())
        .map(|(p, v)| p * v)
        .sum();
    Ok(Value::Num(weighted / total_volume))
}

// ── Argument plumbing ────────────────────────────────────────────────

fn arity(args: &[Value], expected: usize, name: &str, line: u32) -> Result<(), SandboxError> {
    if args.len() != expected {
        return Err(runtime(
            line,
            format!("{name} expects {expected} argument(s), found {}", args.len()),
        ));
    }
    Ok(())
}

fn num_arg(args: &[Value], index: usize, name: &str, line: u32) -> Result<f64, SandboxError> {
    match args.get(index) {
        Some(Value::Num(n)) => Ok(*n),
        Some(other) => Err(type_err(name, index, "number", other, line)),
        None => Err(runtime(line, format!("{name}: missing argument {index}"))),
    }
}

fn series_arg<'a>(
    args: &'a [Value],
    index: usize,
    expected_arity: usize,
    name: &str,
    line: u32,
) -> Result<&'a Series, SandboxError> {
    arity(args, expected_arity, name, line)?;
    match &args[index] {
        Value::Series(s) => Ok(s),
        other => Err(type_err(name, index, "series", other, line)),
    }
}

fn period_arg(args: &[Value], index: usize, name: &str, line: u32) -> Result<usize, SandboxError> {
    let n = num_arg(args, index, name, line)?;
    if !n.is_finite() || n < 1.0 || n > 1_000_000.0 {
        return Err(runtime(line, format!("{name}: period must be in 1..=1000000, got {n}")));
    }
    Ok(n as usize)
}

fn type_err(name: &str, index: usize, expected: &str, got: &Value, line: u32) -> SandboxError {
    runtime(
        line,
        format!("{name}: argument {index} must be a {expected}, got {}", got.type_name()),
    )
}

fn runtime(line: u32, message: String) -> SandboxError {
    SandboxError::Runtime { line, message }
}

fn opt_num(v: Option<f64>) -> Value {
    v.map_or(Value::Nil, Value::Num)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn sample_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}
