//! Array handler: length window first, then per-element recursion with a
//! live running index in the error path.

use crate::compile::Compiler;
use crate::emit::BlockKind;
use crate::error::{EmitError, ErrorCode};
use crate::ops::{Cond, Kind, Op, SlotId};
use crate::registry::{TyKind, TypeHandler};
use crate::schema::SchemaNode;

pub struct ArrayType;

impl TypeHandler for ArrayType {
    fn names(&self) -> &[&str] {
        &["array", "list"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Array
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        cc.fail_unless_kind(input, Kind::Arr, ErrorCode::ArrayCheckFailure);

        let c = &node.constraints;
        if let Some(n) = c.length {
            cc.fail_if(Cond::LenNe(input, n), ErrorCode::InvalidLength);
        }
        if let Some(n) = c.min_length {
            cc.fail_if(Cond::LenLt(input, n), ErrorCode::InvalidLength);
        }
        if let Some(n) = c.max_length {
            cc.fail_if(Cond::LenGt(input, n), ErrorCode::InvalidLength);
        }

        cc.otherwise(|cc| {
            let Some(element) = node.element.as_deref() else {
                return Err(EmitError::codegen(
                    "array node has no element schema",
                    cc.listing(),
                ));
            };
            cc.emit(Op::NewArray { dst: out });
            let index = cc.fresh_counter()?;
            let item = cc.fresh("el")?;
            cc.em.open(BlockKind::Each { arr: input, index, item });
            if cc.options().all_errors() {
                cc.emit(Op::ClearTaint);
            }
            cc.push_index(index);
            cc.enter_scope();
            let mut append = |cc: &mut Compiler<'_>, validated: SlotId| -> Result<(), EmitError> {
                cc.emit(Op::Append { arr: out, from: validated });
                Ok(())
            };
            cc.compile_node_with(item, element, &mut append)?;
            cc.leave_scope();
            cc.pop_path();
            cc.reset_chain();
            cc.em.close();
            Ok(())
        })
    }
}
