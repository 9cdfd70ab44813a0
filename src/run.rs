//! Interpreter for materialized validator programs.
//!
//! A `CompiledFn` owns one folded block tree plus the extern table and the
//! error policy it was compiled for. Each validation call runs in a fresh
//! frame: value slots, the live error path, and the failure state. Slots
//! referencing input data hold borrowed values; output values are built in
//! owned slots, so a successful run clones each accepted leaf exactly once.

use serde_json::Value;

use crate::emit::{Block, Init, Program, Step};
use crate::error::{ErrorCode, ValidateError, Violation};
use crate::ops::{kind_of, Cond, ExternVal, FailWith, Op, PathSeg, SlotId};
use crate::options::Options;

/// Error action selected by the option bitmask at compile time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Policy {
    FailFast,
    Collect,
    Predicate,
}

impl Policy {
    pub(crate) fn of(opts: Options) -> Policy {
        if opts.predicate() {
            Policy::Predicate
        } else if opts.all_errors() {
            Policy::Collect
        } else {
            Policy::FailFast
        }
    }
}

/// One compiled validator: callable any number of times, immutable.
#[derive(Debug)]
pub struct CompiledFn {
    program: Program,
    policy: Policy,
}

enum Cell<'a> {
    Missing,
    Ref(&'a Value),
    Owned(Value),
    Count(usize),
}

struct Frame<'a> {
    slots: Vec<Cell<'a>>,
    path: Vec<PathSeg>,
    errors: Vec<Violation>,
    raised: Option<Violation>,
    verdict: bool,
    tainted: bool,
    ret: Option<Value>,
}

#[derive(PartialEq)]
enum Flow {
    Next,
    Stop,
}

impl CompiledFn {
    pub(crate) fn new(program: Program, opts: Options) -> Self {
        CompiledFn { program, policy: Policy::of(opts) }
    }

    /// Rendered listing of the program body (diagnostics).
    pub fn source(&self) -> &str {
        &self.program.source
    }

    /// Run the validator. Fail-fast raises the first violation; accumulate
    /// raises one batch with every violation in discovery order; predicate
    /// programs report their verdict as a JSON boolean.
    pub fn validate(&self, input: &Value) -> Result<Value, ValidateError> {
        let mut frame = self.frame(input);
        self.exec_block(&self.program.block, &mut frame);
        match self.policy {
            Policy::FailFast => match frame.raised {
                Some(v) => Err(ValidateError::Invalid(v)),
                None => Ok(frame.ret.unwrap_or(Value::Null)),
            },
            Policy::Collect => {
                if frame.errors.is_empty() {
                    Ok(frame.ret.unwrap_or(Value::Null))
                } else {
                    Err(ValidateError::Batch(frame.errors))
                }
            }
            Policy::Predicate => Ok(Value::Bool(frame.verdict)),
        }
    }

    /// Predicate entry point: true iff the input satisfies the schema.
    pub fn test(&self, input: &Value) -> bool {
        let mut frame = self.frame(input);
        self.exec_block(&self.program.block, &mut frame);
        match self.policy {
            Policy::Predicate => frame.verdict,
            Policy::FailFast => frame.raised.is_none(),
            Policy::Collect => frame.errors.is_empty(),
        }
    }

    fn frame<'a>(&self, input: &'a Value) -> Frame<'a> {
        let mut slots: Vec<Cell<'a>> = self
            .program
            .locals
            .iter()
            .map(|decl| match decl.init {
                Init::Empty => Cell::Missing,
                Init::Zero => Cell::Count(0),
            })
            .collect();
        // Slot 0 receives the argument.
        if let Some(first) = slots.first_mut() {
            *first = Cell::Ref(input);
        }
        Frame {
            slots,
            path: Vec::new(),
            errors: Vec::new(),
            raised: None,
            verdict: true,
            tainted: false,
            ret: None,
        }
    }

    fn exec_block<'a>(&self, block: &Block, frame: &mut Frame<'a>) -> Flow {
        for step in &block.steps {
            match step {
                Step::Op(op) => {
                    if self.exec_op(op, frame) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                Step::Branch { arms, fallback } => {
                    let mut taken = false;
                    for (cond, arm) in arms {
                        if self.eval(cond, frame) {
                            taken = true;
                            if self.exec_block(arm, frame) == Flow::Stop {
                                return Flow::Stop;
                            }
                            break;
                        }
                    }
                    if !taken {
                        if let Some(fb) = fallback {
                            if self.exec_block(fb, frame) == Flow::Stop {
                                return Flow::Stop;
                            }
                        }
                    }
                }
                Step::Each { arr, index, item, body } => {
                    let list: &'a Value = match &frame.slots[*arr] {
                        Cell::Ref(v) => *v,
                        _ => unreachable!("element loop over a non-input slot"),
                    };
                    let items = match list {
                        Value::Array(xs) => xs.as_slice(),
                        _ => unreachable!("element loop over a non-array value"),
                    };
                    for (i, el) in items.iter().enumerate() {
                        frame.slots[*index] = Cell::Count(i);
                        frame.slots[*item] = Cell::Ref(el);
                        if self.exec_block(body, frame) == Flow::Stop {
                            return Flow::Stop;
                        }
                    }
                }
            }
        }
        Flow::Next
    }

    fn exec_op<'a>(&self, op: &Op, frame: &mut Frame<'a>) -> Flow {
        match op {
            Op::Bind { dst, from } => {
                let copied = match &frame.slots[*from] {
                    Cell::Missing => Cell::Missing,
                    Cell::Ref(v) => Cell::Ref(*v),
                    Cell::Owned(v) => Cell::Owned(v.clone()),
                    Cell::Count(n) => Cell::Count(*n),
                };
                frame.slots[*dst] = copied;
            }
            Op::Fetch { dst, obj, key } => {
                let source: &'a Value = match &frame.slots[*obj] {
                    Cell::Ref(v) => *v,
                    _ => unreachable!("field fetch from a non-input slot"),
                };
                let found = match source {
                    Value::Object(map) => map.get(key.as_ref()),
                    _ => unreachable!("field fetch from a non-object value"),
                };
                frame.slots[*dst] = match found {
                    Some(v) => Cell::Ref(v),
                    None => Cell::Missing,
                };
            }
            Op::NewObject { dst } => {
                frame.slots[*dst] = Cell::Owned(Value::Object(serde_json::Map::new()));
            }
            Op::NewArray { dst } => {
                frame.slots[*dst] = Cell::Owned(Value::Array(Vec::new()));
            }
            Op::Insert { obj, key, from } => {
                if let Some(v) = take_value(frame, *from) {
                    match &mut frame.slots[*obj] {
                        Cell::Owned(Value::Object(map)) => {
                            map.insert(key.to_string(), v);
                        }
                        _ => unreachable!("insert into a non-output object"),
                    }
                }
            }
            Op::Append { arr, from } => {
                if let Some(v) = take_value(frame, *from) {
                    match &mut frame.slots[*arr] {
                        Cell::Owned(Value::Array(xs)) => xs.push(v),
                        _ => unreachable!("append onto a non-output array"),
                    }
                }
            }
            Op::MapLookup { dst, table, src } => {
                let key = self.str_of(frame, *src).to_string();
                let mapped = match &self.program.externs[*table] {
                    ExternVal::Table(t) => t.get(&key).cloned(),
                    _ => unreachable!("map lookup through a non-table extern"),
                };
                frame.slots[*dst] = match mapped {
                    Some(v) => Cell::Owned(v),
                    None => Cell::Missing,
                };
            }
            Op::IncCount(slot) => match &mut frame.slots[*slot] {
                Cell::Count(n) => *n += 1,
                _ => unreachable!("counter bump on a non-counter slot"),
            },
            Op::ClearTaint => frame.tainted = false,
            Op::PushKey(key) => frame.path.push(PathSeg::Key(key.clone())),
            Op::PushIndex(slot) => frame.path.push(PathSeg::Index(*slot)),
            Op::PopPath => {
                frame.path.pop();
            }
            Op::Fail { code, with } => return self.fail(code, with, frame),
            Op::Return { from } => {
                frame.ret = Some(take_value(frame, *from).unwrap_or(Value::Null));
            }
        }
        Flow::Next
    }

    fn fail<'a>(&self, code: &ErrorCode, with: &FailWith, frame: &mut Frame<'a>) -> Flow {
        match self.policy {
            // No error objects in predicate mode.
            Policy::Predicate => {
                frame.verdict = false;
                Flow::Stop
            }
            Policy::FailFast => {
                frame.raised = Some(self.violation(code, with, frame));
                Flow::Stop
            }
            Policy::Collect => {
                let v = self.violation(code, with, frame);
                frame.errors.push(v);
                frame.tainted = true;
                Flow::Next
            }
        }
    }

    fn violation(&self, code: &ErrorCode, with: &FailWith, frame: &Frame<'_>) -> Violation {
        let unexpected = match with {
            FailWith::None => None,
            FailWith::UnexpectedKeys { obj, declared } => {
                let keys = match slot_value(&frame.slots, *obj) {
                    Some(Value::Object(map)) => map
                        .keys()
                        .filter(|k| !declared.iter().any(|d| d == *k))
                        .cloned()
                        .collect(),
                    _ => Vec::new(),
                };
                Some(keys)
            }
        };
        Violation {
            code: code.clone(),
            path: render_path(&frame.path, &frame.slots),
            unexpected,
        }
    }

    fn eval(&self, cond: &Cond, frame: &Frame<'_>) -> bool {
        let slots = &frame.slots;
        match cond {
            Cond::IsNull(s) => matches!(slot_value(slots, *s), Some(Value::Null)),
            Cond::IsMissing(s) => slot_value(slots, *s).is_none(),
            Cond::KindNot(s, kind) => match slot_value(slots, *s) {
                Some(v) => kind_of(v) != *kind,
                None => true,
            },
            Cond::BelowMin { slot, bound, exclusive } => {
                let x = num_of(slots, *slot);
                if *exclusive { !(x > *bound) } else { !(x >= *bound) }
            }
            Cond::AboveMax { slot, bound, exclusive } => {
                let x = num_of(slots, *slot);
                if *exclusive { !(x < *bound) } else { !(x <= *bound) }
            }
            Cond::FracNonZero(s) => num_of(slots, *s).fract() != 0.0,
            Cond::NotI32(s) => {
                let x = num_of(slots, *s);
                (x as i32) as f64 != x
            }
            Cond::NotFinite(s) => !num_of(slots, *s).is_finite(),
            Cond::NotMultiple(s, d) => num_of(slots, *s) % *d != 0.0,
            Cond::LenNe(s, n) => length_of(slots, *s) != *n,
            Cond::LenLt(s, n) => length_of(slots, *s) < *n,
            Cond::LenGt(s, n) => length_of(slots, *s) > *n,
            Cond::CountMismatch { obj, count } => {
                let total = match slot_value(slots, *obj) {
                    Some(Value::Object(map)) => map.len(),
                    _ => 0,
                };
                let consumed = match &slots[*count] {
                    Cell::Count(n) => *n,
                    _ => unreachable!("count compare on a non-counter slot"),
                };
                total != consumed
            }
            Cond::NoMatch { re, slot } => match &self.program.externs[*re] {
                ExternVal::Regex(rx) => !rx.is_match(self.str_of(frame, *slot)),
                _ => unreachable!("regex test through a non-regex extern"),
            },
            Cond::PredFails { pred, slot } => match &self.program.externs[*pred] {
                ExternVal::Pred(f) => !f(self.str_of(frame, *slot)),
                _ => unreachable!("predicate test through a non-predicate extern"),
            },
            Cond::NotInTable { table, slot } => match &self.program.externs[*table] {
                ExternVal::Table(t) => !t.contains_key(self.str_of(frame, *slot)),
                _ => unreachable!("table test through a non-table extern"),
            },
            Cond::Tainted => frame.tainted,
            Cond::Not(inner) => !self.eval(inner, frame),
            Cond::Or(a, b) => self.eval(a, frame) || self.eval(b, frame),
        }
    }

    fn str_of<'f>(&self, frame: &'f Frame<'_>, slot: SlotId) -> &'f str {
        slot_value(&frame.slots, slot)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

fn slot_value<'f, 'a>(slots: &'f [Cell<'a>], id: SlotId) -> Option<&'f Value> {
    match &slots[id] {
        Cell::Missing | Cell::Count(_) => None,
        Cell::Ref(v) => Some(v),
        Cell::Owned(v) => Some(v),
    }
}

fn num_of(slots: &[Cell<'_>], id: SlotId) -> f64 {
    slot_value(slots, id)
        .and_then(Value::as_f64)
        .unwrap_or(f64::NAN)
}

/// String length in chars, array/object length in entries.
fn length_of(slots: &[Cell<'_>], id: SlotId) -> usize {
    match slot_value(slots, id) {
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Array(xs)) => xs.len(),
        Some(Value::Object(map)) => map.len(),
        _ => 0,
    }
}

/// Take the value out of a slot for output assembly. Borrowed input values
/// clone; owned values move out; counters render as numbers.
fn take_value(frame: &mut Frame<'_>, slot: SlotId) -> Option<Value> {
    match std::mem::replace(&mut frame.slots[slot], Cell::Missing) {
        Cell::Missing => None,
        Cell::Ref(v) => {
            frame.slots[slot] = Cell::Ref(v);
            Some(v.clone())
        }
        Cell::Owned(v) => Some(v),
        Cell::Count(n) => {
            frame.slots[slot] = Cell::Count(n);
            Some(Value::from(n))
        }
    }
}

fn render_path(path: &[PathSeg], slots: &[Cell<'_>]) -> String {
    let mut out = String::new();
    for seg in path {
        match seg {
            PathSeg::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSeg::Index(slot) => {
                let i = match &slots[*slot] {
                    Cell::Count(n) => *n,
                    _ => unreachable!("path index from a non-counter slot"),
                };
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{BlockKind, Emitter, Init};
    use crate::ops::Kind;
    use serde_json::json;

    fn number_only(opts: Options) -> CompiledFn {
        let mut em = Emitter::new();
        let input = em.declare("input", Init::Empty).unwrap();
        em.open(BlockKind::If(Cond::KindNot(input, Kind::Num)));
        em.op(Op::Fail { code: ErrorCode::DoubleCheckFailure, with: FailWith::None });
        em.close();
        em.op(Op::Return { from: input });
        CompiledFn::new(em.materialize().unwrap(), opts)
    }

    #[test]
    fn fail_fast_raises_and_success_returns_the_value() {
        let f = number_only(Options::NONE);
        assert_eq!(f.validate(&json!(4.5)).unwrap(), json!(4.5));
        match f.validate(&json!("nope")).unwrap_err() {
            ValidateError::Invalid(v) => assert_eq!(v.code, ErrorCode::DoubleCheckFailure),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn predicate_mode_never_builds_errors() {
        let f = number_only(Options::PREDICATE);
        assert!(f.test(&json!(1)));
        assert!(!f.test(&json!("nope")));
    }
}
