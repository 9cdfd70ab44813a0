// Strongly-typed check IR. One tagged variant per runtime action; the
// emitter assembles these, the interpreter in `run` consumes them.

use std::sync::Arc;

use serde_json::Value;

use crate::error::ErrorCode;

/// Index of a named local binding (value slot) inside one program.
pub type SlotId = usize;

/// Stable token for an externally supplied opaque value.
pub type ExternId = usize;

/// Coarse JSON kind used by type checks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Null,
    Bool,
    Num,
    Str,
    Arr,
    Obj,
}

pub fn kind_of(v: &Value) -> Kind {
    match v {
        Value::Null => Kind::Null,
        Value::Bool(_) => Kind::Bool,
        Value::Number(_) => Kind::Num,
        Value::String(_) => Kind::Str,
        Value::Array(_) => Kind::Arr,
        Value::Object(_) => Kind::Obj,
    }
}

/// Opaque host-side values referenced by generated programs.
#[derive(Clone)]
pub enum ExternVal {
    /// Precompiled regular expression.
    Regex(Arc<regex::Regex>),
    /// String predicate (compiled date parser, color/MAC/IP matcher).
    Pred(Arc<dyn Fn(&str) -> bool + Send + Sync>),
    /// Enumeration table: accepted key → replacement value.
    Table(Arc<indexmap::IndexMap<String, Value>>),
}

impl std::fmt::Debug for ExternVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternVal::Regex(re) => write!(f, "Regex({})", re.as_str()),
            ExternVal::Pred(_) => write!(f, "Pred(..)"),
            ExternVal::Table(t) => write!(f, "Table({} entries)", t.len()),
        }
    }
}

/// One segment of the live error path.
#[derive(Clone, Debug)]
pub enum PathSeg {
    /// Literal `.key` fragment.
    Key(Arc<str>),
    /// `[i]` fragment; the index is read from the slot when an error is
    /// actually produced, never retroactively.
    Index(SlotId),
}

/// Failure-specific extra payload.
#[derive(Clone, Debug)]
pub enum FailWith {
    None,
    /// `InvalidProperty`: report input keys missing from the declared set.
    UnexpectedKeys {
        obj: SlotId,
        declared: Arc<[String]>,
    },
}

/// Straight-line statements.
#[derive(Clone, Debug)]
pub enum Op {
    /// Alias one slot to another (cheap reference copy).
    Bind { dst: SlotId, from: SlotId },
    /// Own-property lookup: `dst = obj[key]`, or the missing marker.
    Fetch { dst: SlotId, obj: SlotId, key: Arc<str> },
    NewObject { dst: SlotId },
    NewArray { dst: SlotId },
    /// Move/clone a validated value into an output object.
    Insert { obj: SlotId, key: Arc<str>, from: SlotId },
    /// Move/clone a validated value onto an output array.
    Append { arr: SlotId, from: SlotId },
    /// Enumeration mapping: `dst = table[src]` (guarded by `NotInTable`).
    MapLookup { dst: SlotId, table: ExternId, src: SlotId },
    /// Consumed-key counter bump.
    IncCount(SlotId),
    /// Forget a recorded-but-handled failure (accumulate mode).
    ClearTaint,
    PushKey(Arc<str>),
    PushIndex(SlotId),
    PopPath,
    /// Produce a violation at the current path and perform the configured
    /// error action.
    Fail { code: ErrorCode, with: FailWith },
    /// Latch the program result.
    Return { from: SlotId },
}

/// Branch conditions. Each evaluates against the current frame without side
/// effects; most are phrased as the violation they detect.
#[derive(Clone, Debug)]
pub enum Cond {
    IsNull(SlotId),
    IsMissing(SlotId),
    KindNot(SlotId, Kind),
    /// `!(x >= bound)` or `!(x > bound)`; NaN counts as violating.
    BelowMin { slot: SlotId, bound: f64, exclusive: bool },
    /// `!(x <= bound)` or `!(x < bound)`; NaN counts as violating.
    AboveMax { slot: SlotId, bound: f64, exclusive: bool },
    /// Floor-based fractional test.
    FracNonZero(SlotId),
    /// Truncation identity test: `(x as i32) as f64 != x`.
    NotI32(SlotId),
    NotFinite(SlotId),
    /// `x % divisor != 0`.
    NotMultiple(SlotId, f64),
    /// Length in chars (strings) or elements (arrays).
    LenNe(SlotId, usize),
    LenLt(SlotId, usize),
    LenGt(SlotId, usize),
    /// Consumed-key counter disagrees with the source object's key count.
    CountMismatch { obj: SlotId, count: SlotId },
    NoMatch { re: ExternId, slot: SlotId },
    PredFails { pred: ExternId, slot: SlotId },
    NotInTable { table: ExternId, slot: SlotId },
    /// A failure was recorded for the node being compiled (accumulate mode).
    Tainted,
    Not(Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
}

impl Cond {
    pub fn not(self) -> Cond {
        Cond::Not(Box::new(self))
    }

    pub fn or(self, other: Cond) -> Cond {
        Cond::Or(Box::new(self), Box::new(other))
    }
}
