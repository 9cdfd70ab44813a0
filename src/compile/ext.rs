//! Extern-backed leaf handlers: date, color, MAC, IPv4/IPv6, enumeration,
//! and the pass-through `any` type. Each resolves its host-side helper at
//! normalization and references it from generated code as an opaque value.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::compile::Compiler;
use crate::error::{EmitError, ErrorCode, SchemaError};
use crate::matchers;
use crate::ops::{Cond, Kind, Op, SlotId};
use crate::registry::{TyKind, TypeHandler};
use crate::schema::SchemaNode;

// ————————————————————————————————————————————————————————————————————————————
// DATE
// ————————————————————————————————————————————————————————————————————————————

/// Date/time family; each alias carries its own default format string.
pub struct DateType {
    names: &'static [&'static str],
    default_format: &'static str,
}

impl DateType {
    pub fn new(names: &'static [&'static str], default_format: &'static str) -> Self {
        DateType { names, default_format }
    }
}

impl TypeHandler for DateType {
    fn names(&self) -> &[&str] {
        self.names
    }

    fn kind(&self) -> TyKind {
        TyKind::Date
    }

    fn post_normalize(&self, node: &mut SchemaNode) -> Result<(), SchemaError> {
        let format = node
            .constraints
            .format
            .as_deref()
            .unwrap_or(self.default_format);
        node.prepared.date = Some(crate::date::compile_format(format)?);
        Ok(())
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        let Some(layout) = node.prepared.date.clone() else {
            return Err(EmitError::codegen(
                "date node has no compiled format",
                cc.listing(),
            ));
        };
        let format = node
            .constraints
            .format
            .as_deref()
            .unwrap_or(self.default_format);
        let cfg = node.date_cfg();
        let name = format!(
            "date:{format}:leap_year={}:leap_second={}",
            cfg.leap_year, cfg.leap_second
        );
        cc.fail_unless_kind(input, Kind::Str, ErrorCode::DateCheckFailure);
        let pred = cc.extern_pred(&name, move || {
            Arc::new(move |s: &str| layout.validate(s, cfg))
        });
        cc.fail_if(Cond::PredFails { pred, slot: input }, ErrorCode::DateCheckFailure);
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// COLOR / MAC / IP
// ————————————————————————————————————————————————————————————————————————————

pub struct ColorType;

impl TypeHandler for ColorType {
    fn names(&self) -> &[&str] {
        &["color"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Color
    }

    fn post_normalize(&self, node: &mut SchemaNode) -> Result<(), SchemaError> {
        let table = matchers::ColorTable::new(
            node.constraints.allow_names,
            node.constraints.extra_names.iter().cloned(),
        );
        node.prepared.colors = Some(Arc::new(table));
        Ok(())
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        let Some(table) = node.prepared.colors.clone() else {
            return Err(EmitError::codegen(
                "color node has no prepared name table",
                cc.listing(),
            ));
        };
        cc.fail_unless_kind(input, Kind::Str, ErrorCode::ColorCheckFailure);
        let name = format!("color:{:p}", Arc::as_ptr(&table));
        let pred = cc.extern_pred(&name, move || Arc::new(move |s: &str| table.is_match(s)));
        cc.fail_if(
            Cond::PredFails { pred, slot: input },
            ErrorCode::ColorCheckFailure,
        );
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}

pub struct MacType;

impl TypeHandler for MacType {
    fn names(&self) -> &[&str] {
        &["mac"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Net
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        let separator = node.constraints.separator;
        cc.fail_unless_kind(input, Kind::Str, ErrorCode::MacCheckFailure);
        let name = format!("mac:{separator}");
        let pred = cc.extern_pred(&name, move || {
            Arc::new(move |s: &str| matchers::is_mac(s, separator))
        });
        cc.fail_if(Cond::PredFails { pred, slot: input }, ErrorCode::MacCheckFailure);
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}

pub enum IpType {
    V4,
    V6,
}

impl TypeHandler for IpType {
    fn names(&self) -> &[&str] {
        match self {
            IpType::V4 => &["ipv4"],
            IpType::V6 => &["ipv6"],
        }
    }

    fn kind(&self) -> TyKind {
        TyKind::Net
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        _node: &SchemaNode,
    ) -> Result<(), EmitError> {
        let (code, name) = match self {
            IpType::V4 => (ErrorCode::Ipv4CheckFailure, "ipv4"),
            IpType::V6 => (ErrorCode::Ipv6CheckFailure, "ipv6"),
        };
        cc.fail_unless_kind(input, Kind::Str, code.clone());
        let pred = match self {
            IpType::V4 => cc.extern_pred(name, || Arc::new(matchers::is_ipv4)),
            IpType::V6 => cc.extern_pred(name, || Arc::new(matchers::is_ipv6)),
        };
        cc.fail_if(Cond::PredFails { pred, slot: input }, code);
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ENUMERATION AND ANY
// ————————————————————————————————————————————————————————————————————————————

/// Static lookup table built once from the `$values` key→value map; a hit
/// maps the input onto the table's value.
pub struct EnumType;

impl TypeHandler for EnumType {
    fn names(&self) -> &[&str] {
        &["enum"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Choice
    }

    fn post_normalize(&self, node: &mut SchemaNode) -> Result<(), SchemaError> {
        let Some(values) = node.attrs.get("$values") else {
            return Err(SchemaError::InvalidAttribute {
                type_name: node.type_name.clone(),
                attr: "$values".to_string(),
                reason: "enumeration types need a value table".to_string(),
            });
        };
        let Some(table) = values.as_object() else {
            return Err(SchemaError::InvalidAttribute {
                type_name: node.type_name.clone(),
                attr: "$values".to_string(),
                reason: "expected an object of accepted values".to_string(),
            });
        };
        let map: IndexMap<String, Value> =
            table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        node.prepared.choices = Some(Arc::new(map));
        Ok(())
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError> {
        let Some(choices) = node.prepared.choices.clone() else {
            return Err(EmitError::codegen(
                "enum node has no prepared value table",
                cc.listing(),
            ));
        };
        cc.fail_unless_kind(input, Kind::Str, ErrorCode::EnumCheckFailure);
        let name = format!("enum:{:p}", Arc::as_ptr(&choices));
        let table = cc.extern_table(&name, move || choices);
        cc.fail_if(
            Cond::NotInTable { table, slot: input },
            ErrorCode::EnumCheckFailure,
        );
        cc.otherwise(|cc| {
            cc.emit(Op::MapLookup { dst: out, table, src: input });
            Ok(())
        })
    }
}

/// Accepts anything, unchanged.
pub struct AnyType;

impl TypeHandler for AnyType {
    fn names(&self) -> &[&str] {
        &["any"]
    }

    fn kind(&self) -> TyKind {
        TyKind::Any
    }

    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        _node: &SchemaNode,
    ) -> Result<(), EmitError> {
        cc.emit(Op::Bind { dst: out, from: input });
        Ok(())
    }
}
