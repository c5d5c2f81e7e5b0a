//! Runtime values for strategy scripts.
//!
//! Values never cross thread boundaries: each worker interprets its own
//! instrument, so interior mutability uses `Rc<RefCell<...>>`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::domain::Bar;

/// Per-instrument OHLCV columns, materialized once and shared by every
/// per-bar window view.
#[derive(Debug)]
pub struct Columns {
    pub open: Rc<Vec<f64>>,
    pub high: Rc<Vec<f64>>,
    pub low: Rc<Vec<f64>>,
    pub close: Rc<Vec<f64>>,
    pub volume: Rc<Vec<f64>>,
}

impl Columns {
    pub fn from_bars(bars: &[Bar]) -> Rc<Self> {
        Rc::new(Self {
            open: Rc::new(bars.iter().map(|b| b.open).collect()),
            high: Rc::new(bars.iter().map(|b| b.high).collect()),
            low: Rc::new(bars.iter().map(|b| b.low).collect()),
            close: Rc::new(bars.iter().map(|b| b.close).collect()),
            volume: Rc::new(bars.iter().map(|b| b.volume).collect()),
        })
    }
}

/// Immutable numeric column restricted to its first `len` elements.
///
/// Cloning is cheap; the underlying buffer is shared.
#[derive(Debug, Clone)]
pub struct Series {
    data: Rc<Vec<f64>>,
    len: usize,
}

impl Series {
    pub fn new(data: Rc<Vec<f64>>, len: usize) -> Self {
        debug_assert!(len <= data.len());
        Self { len, data }
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        let len = values.len();
        Self { data: Rc::new(values), len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The visible values.
    pub fn values(&self) -> &[f64] {
        &self.data[..self.len]
    }

    /// Indexed access with negative-from-the-end support.
    pub fn get(&self, index: i64) -> Option<f64> {
        let n = self.len as i64;
        let i = if index < 0 { n + index } else { index };
        if (0..n).contains(&i) {
            Some(self.data[i as usize])
        } else {
            None
        }
    }
}

/// Read-only per-bar view over an instrument's bars 0..=i.
#[derive(Debug, Clone)]
pub struct Window {
    cols: Rc<Columns>,
    len: usize,
}

impl Window {
    pub fn new(cols: Rc<Columns>, len: usize) -> Self {
        Self { cols, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolve a field access (`window.close`, `window.len`, ...).
    pub fn field(&self, name: &str) -> Option<Value> {
        let col = match name {
            "open" => &self.cols.open,
            "high" => &self.cols.high,
            "low" => &self.cols.low,
            "close" => &self.cols.close,
            "volume" => &self.cols.volume,
            "len" => return Some(Value::Num(self.len as f64)),
            _ => return None,
        };
        Some(Value::Series(Series::new(Rc::clone(col), self.len)))
    }
}

pub type MapRef = Rc<RefCell<BTreeMap<String, Value>>>;

/// A script runtime value.
#[derive(Clone)]
pub enum Value {
    Num(f64),
    Bool(bool),
    Str(Rc<str>),
    Nil,
    Series(Series),
    Map(MapRef),
    Window(Window),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    /// Fresh empty map (used for strategy state and map literals).
    pub fn map() -> Self {
        Value::Map(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Num(_) => "number",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Nil => "nil",
            Value::Series(_) => "series",
            Value::Map(_) => "map",
            Value::Window(_) => "window",
        }
    }

    /// Truthiness: nil and false are falsy, zero and NaN numbers are falsy,
    /// everything else is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            _ => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Series(a), Value::Series(b)) => a.values() == b.values(),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Num(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Nil => write!(f, "nil"),
            Value::Series(s) => write!(f, "series(len={})", s.len()),
            Value::Map(m) => write!(f, "map(len={})", m.borrow().len()),
            Value::Window(w) => write!(f, "window(len={})", w.len()),
        }
    }
}
