//! Boolean and numeric handlers.
//!
//! Integer types merge their intrinsic bounds with the schema's
//! inclusive/exclusive directives into one effective inclusive range; when
//! that range sits inside the signed 32-bit space the integer test is the
//! cheap truncation identity and bound checks equal to the i32 boundary are
//! dropped outright.

use crate::compile::Compiler;
use crate::error::{EmitError, ErrorCode};
use crate::ops::{Cond, Kind, Op, SlotId};
use crate::registry::{TyKind, TypeHandler};
use crate::schema::SchemaNode;

pub struct BoolType;

impl TypeHandler for BoolType {
    fn names(&self) -> &[&str] {
        &["bool", "boolean"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Bool
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        _node: &SchemaNode,
    ) -> Result<(), EmitError> {
        cc.fail_unless_kind(input, Kind::Bool, ErrorCode::BoolCheckFailure);
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}

/// Integer family. Sized aliases are separate instances with intrinsic
/// bounds; `int` itself carries none.
pub struct IntType {
    names: &'static [&'static str],
    lo: Option<f64>,
    hi: Option<f64>,
}

impl IntType {
    pub fn new(names: &'static [&'static str], lo: Option<f64>, hi: Option<f64>) -> Self {
        IntType { names, lo, hi }
    }

    /// Effective inclusive bounds: intrinsic range, `$min`/`$max`, and the
    /// exclusive `$gt`/`$lt` directives rewritten to their tightest
    /// inclusive integer equivalents. Narrowest bound wins.
    fn merged_bounds(&self, node: &SchemaNode) -> (Option<f64>, Option<f64>) {
        let c = &node.constraints;
        let mut lo = self.lo;
        for cand in [c.min, c.gt.map(|g| g.floor() + 1.0)] {
            if let Some(x) = cand {
                lo = Some(lo.map_or(x, |cur| cur.max(x)));
            }
        }
        let mut hi = self.hi;
        for cand in [c.max, c.lt.map(|l| l.ceil() - 1.0)] {
            if let Some(x) = cand {
                hi = Some(hi.map_or(x, |cur| cur.min(x)));
            }
        }
        (lo, hi)
    }
}

impl TypeHandler for IntType {
    fn names(&self) -> &[&str] {
        self.names
    }

    fn kind(&self) -> TyKind {
        TyKind::Int
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        cc.fail_unless_kind(input, Kind::Num, ErrorCode::IntCheckFailure);

        let (lo, hi) = self.merged_bounds(node);
        let within_i32 = matches!(
            (lo, hi),
            (Some(lo), Some(hi)) if lo >= i32::MIN as f64 && hi <= i32::MAX as f64
        );
        if within_i32 {
            cc.fail_if(Cond::NotI32(input), ErrorCode::IntCheckFailure);
            if let Some(bound) = lo {
                if bound > i32::MIN as f64 {
                    cc.fail_if(
                        Cond::BelowMin { slot: input, bound, exclusive: false },
                        ErrorCode::OutOfRange,
                    );
                }
            }
            if let Some(bound) = hi {
                if bound < i32::MAX as f64 {
                    cc.fail_if(
                        Cond::AboveMax { slot: input, bound, exclusive: false },
                        ErrorCode::OutOfRange,
                    );
                }
            }
        } else {
            // The fractional test also traps NaN and infinities, so no
            // separate finite check is needed here.
            cc.fail_if(Cond::FracNonZero(input), ErrorCode::IntCheckFailure);
            if let Some(bound) = lo {
                cc.fail_if(
                    Cond::BelowMin { slot: input, bound, exclusive: false },
                    ErrorCode::OutOfRange,
                );
            }
            if let Some(bound) = hi {
                cc.fail_if(
                    Cond::AboveMax { slot: input, bound, exclusive: false },
                    ErrorCode::OutOfRange,
                );
            }
        }
        if let Some(divisor) = node.constraints.div_by {
            cc.fail_if(Cond::NotMultiple(input, divisor), ErrorCode::DivByFailure);
        }
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}

pub struct FloatType;

impl TypeHandler for FloatType {
    fn names(&self) -> &[&str] {
        &["double", "float", "number"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Float
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        cc.fail_unless_kind(input, Kind::Num, ErrorCode::DoubleCheckFailure);

        let c = &node.constraints;
        // Per side, the exclusive directive survives unless a strictly
        // tighter inclusive one overrides it.
        let lower = match (c.min, c.gt) {
            (Some(min), Some(gt)) if min > gt => Some((min, false)),
            (_, Some(gt)) => Some((gt, true)),
            (Some(min), None) => Some((min, false)),
            (None, None) => None,
        };
        let upper = match (c.max, c.lt) {
            (Some(max), Some(lt)) if max < lt => Some((max, false)),
            (_, Some(lt)) => Some((lt, true)),
            (Some(max), None) => Some((max, false)),
            (None, None) => None,
        };

        if lower.is_none() && upper.is_none() {
            // A bounded value is implicitly finite; only the unbounded case
            // needs the explicit check.
            cc.fail_if(Cond::NotFinite(input), ErrorCode::DoubleCheckFailure);
        }
        if let Some((bound, exclusive)) = lower {
            cc.fail_if(
                Cond::BelowMin { slot: input, bound, exclusive },
                ErrorCode::OutOfRange,
            );
        }
        if let Some((bound, exclusive)) = upper {
            cc.fail_if(
                Cond::AboveMax { slot: input, bound, exclusive },
                ErrorCode::OutOfRange,
            );
        }
        if let Some(divisor) = c.div_by {
            cc.fail_if(Cond::NotMultiple(input, divisor), ErrorCode::DivByFailure);
        }
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}
