//! Object handler: field ordering, presence guards, consumed-key counting,
//! and the unknown-property check.
//!
//! Mandatory fields compile before optional fields, each group in declared
//! order. Presence is always established by an explicit key lookup, which
//! distinguishes an absent key from a present null. In non-extraction modes
//! every present declared field bumps a counter; a final count-vs-total
//! comparison raises `InvalidProperty` with the unrecognized keys.

use std::sync::Arc;

use crate::compile::Compiler;
use crate::error::{EmitError, ErrorCode};
use crate::ops::{Cond, FailWith, Kind, Op, SlotId};
use crate::registry::{TyKind, TypeHandler};
use crate::schema::SchemaNode;

pub struct ObjectType;

impl TypeHandler for ObjectType {
    fn names(&self) -> &[&str] {
        &["object", "obj"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Object
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        cc.fail_unless_kind(input, Kind::Obj, ErrorCode::ObjectCheckFailure);
        cc.otherwise(|cc| {
            let checking = !cc.unchecked_keys();
            // Nested object scopes inherit their own flag: only extract-all
            // suppresses the check below this point.
            cc.set_unchecked_keys(cc.options().extract_all());

            let counter = if checking { Some(cc.fresh_counter()?) } else { None };
            cc.emit(Op::NewObject { dst: out });

            for (name, field) in node.fields.iter().filter(|(_, f)| !f.optional) {
                emit_field(cc, input, out, name, field, counter)?;
            }
            for (name, field) in node.fields.iter().filter(|(_, f)| f.optional) {
                emit_field(cc, input, out, name, field, counter)?;
            }

            if let Some(counter) = counter {
                cc.reset_chain();
                let declared: Arc<[String]> = node.fields.keys().cloned().collect();
                cc.fail_if_with(
                    Cond::CountMismatch { obj: input, count: counter },
                    ErrorCode::InvalidProperty,
                    FailWith::UnexpectedKeys { obj: input, declared },
                );
            }
            Ok(())
        })
    }
}

fn emit_field(
    cc: &mut Compiler<'_>,
    obj: SlotId,
    out: SlotId,
    name: &str,
    field: &SchemaNode,
    counter: Option<SlotId>,
) -> Result<(), EmitError> {
    let key: Arc<str> = Arc::from(name);
    cc.push_key(key.clone());
    if cc.options().all_errors() {
        // A handled failure from the previous field must not leak into this
        // one's error gate.
        cc.emit(Op::ClearTaint);
    }
    let slot = cc.fresh("p")?;
    cc.emit(Op::Fetch { dst: slot, obj, key: key.clone() });
    cc.reset_chain();

    let out_key = key.clone();
    let mut insert = move |cc: &mut Compiler<'_>, validated: SlotId| -> Result<(), EmitError> {
        cc.emit(Op::Insert { obj: out, key: out_key.clone(), from: validated });
        Ok(())
    };

    if field.optional {
        // Optional fields are only read and validated when present.
        cc.guard(Cond::IsMissing(slot).not(), |cc| {
            if let Some(counter) = counter {
                cc.emit(Op::IncCount(counter));
            }
            cc.compile_node_with(slot, field, &mut insert)?;
            Ok(())
        })?;
    } else {
        cc.check_arm(Cond::IsMissing(slot), |cc| {
            cc.emit(Op::Fail { code: ErrorCode::RequiredField, with: FailWith::None });
            Ok(())
        })?;
        cc.otherwise(|cc| {
            if let Some(counter) = counter {
                cc.emit(Op::IncCount(counter));
            }
            cc.compile_node_with(slot, field, &mut insert)?;
            Ok(())
        })?;
    }

    cc.pop_path();
    cc.reset_chain();
    Ok(())
}
