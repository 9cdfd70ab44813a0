//! String handler: type check, length window, then the optional custom
//! pattern. The pattern compiles once at normalization, so an invalid
//! `$regex` surfaces to the schema author immediately.

use std::sync::Arc;

use crate::compile::Compiler;
use crate::error::{EmitError, ErrorCode, SchemaError};
use crate::ops::{Cond, Kind, Op, SlotId};
use crate::registry::{TyKind, TypeHandler};
use crate::schema::SchemaNode;

pub struct StrType;

impl TypeHandler for StrType {
    fn names(&self) -> &[&str] {
        &["string", "str", "text"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Str
    }

    fn post_normalize(&self, node: &mut SchemaNode) -> Result<(), SchemaError> {
        if let Some(pattern) = &node.constraints.pattern {
            let re = regex::Regex::new(pattern).map_err(|err| SchemaError::InvalidAttribute {
                type_name: node.type_name.clone(),
                attr: "$regex".to_string(),
                reason: err.to_string(),
            })?;
            node.prepared.regex = Some(Arc::new(re));
        }
        Ok(())
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        cc.fail_unless_kind(input, Kind::Str, ErrorCode::StringCheckFailure);

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
        if let Some(re) = node.prepared.regex.clone() {
            let name = format!("regex:{}", re.as_str());
            let ext = cc.extern_regex(&name, || re);
            let code = match &c.code {
                Some(custom) => ErrorCode::Custom(Arc::from(custom.as_str())),
                None => ErrorCode::RegExpFailure,
            };
            cc.fail_if(Cond::NoMatch { re: ext, slot: input }, code);
        }
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}
