//! Validator compiler: walks a normalized schema tree and emits one program
//! per (schema, option-combination) pair.
//!
//! `compile_node` emits, in order: the null/missing pass-through, the type
//! handler's concrete checks (dispatched through the registry), and, in
//! accumulate mode, the error-action branch that decides whether the
//! node's success ops run. Compiler state tracks the current path, the
//! nesting depth (collision-free binding names), the conditional-chain depth
//! (first check opens an `if`, later checks chain as `else if`), and the
//! inherited extraction flag; nested scopes save and restore all of it with
//! strict stack discipline.

pub mod arr;
pub mod ext;
pub mod num;
pub mod obj;
pub mod str;

use std::sync::Arc;

use crate::emit::{BlockKind, Emitter, Init};
use crate::error::{EmitError, ErrorCode};
use crate::ops::{Cond, ExternId, ExternVal, FailWith, Kind, Op, SlotId};
use crate::options::Options;
use crate::registry::Registry;
use crate::run::CompiledFn;
use crate::schema::SchemaNode;

/// Compile one validator for `node` under `opts`.
pub(crate) fn compile(
    node: &SchemaNode,
    registry: &Registry,
    opts: Options,
) -> Result<CompiledFn, EmitError> {
    let mut cc = Compiler::new(registry, opts);
    let input = cc.em.declare("input", Init::Empty)?;
    cc.compile_node_with(input, node, &mut |cc, out| {
        cc.emit(Op::Return { from: out });
        Ok(())
    })?;
    debug_assert_eq!(cc.path_depth, 0, "path push/pop must balance");
    let program = cc.em.materialize()?;
    Ok(CompiledFn::new(program, opts))
}

struct Saved {
    chain: u32,
    depth: u32,
    unchecked: bool,
}

/// One compilation pass. Type handlers receive this to emit their checks.
pub struct Compiler<'r> {
    pub(crate) em: Emitter,
    registry: &'r Registry,
    opts: Options,
    depth: u32,
    chain: u32,
    unchecked: bool,
    seq: u32,
    path_depth: u32,
    saved: Vec<Saved>,
}

impl<'r> Compiler<'r> {
    fn new(registry: &'r Registry, opts: Options) -> Self {
        Compiler {
            em: Emitter::new(),
            registry,
            opts,
            depth: 0,
            chain: 0,
            // Extraction starts wide open at the root, then narrows to
            // extract-all for every nested object scope.
            unchecked: opts.extract_top() || opts.extract_all(),
            seq: 0,
            path_depth: 0,
            saved: Vec::new(),
        }
    }

    pub fn options(&self) -> Options {
        self.opts
    }

    /// True when the current scope skips the unknown-property check.
    pub fn unchecked_keys(&self) -> bool {
        self.unchecked
    }

    pub fn set_unchecked_keys(&mut self, value: bool) {
        self.unchecked = value;
    }

    pub fn listing(&self) -> String {
        self.em.listing()
    }

    /// Declare a fresh value binding named by depth and the handler's
    /// mangled kind tag.
    pub fn fresh(&mut self, tag: &str) -> Result<SlotId, EmitError> {
        let name = format!("v{}{}{}", self.depth, tag, self.seq);
        self.seq += 1;
        self.em.declare(&name, Init::Empty)
    }

    /// Declare a fresh counter binding, initialized to zero.
    pub fn fresh_counter(&mut self) -> Result<SlotId, EmitError> {
        let name = format!("n{}", self.seq);
        self.seq += 1;
        self.em.declare(&name, Init::Zero)
    }

    pub fn emit(&mut self, op: Op) {
        self.em.op(op);
    }

    pub fn extern_regex(&mut self, name: &str, make: impl FnOnce() -> Arc<regex::Regex>) -> ExternId {
        self.em.extern_value(name, || ExternVal::Regex(make()))
    }

    pub fn extern_pred(
        &mut self,
        name: &str,
        make: impl FnOnce() -> Arc<dyn Fn(&str) -> bool + Send + Sync>,
    ) -> ExternId {
        self.em.extern_value(name, || ExternVal::Pred(make()))
    }

    pub fn extern_table(
        &mut self,
        name: &str,
        make: impl FnOnce() -> Arc<indexmap::IndexMap<String, serde_json::Value>>,
    ) -> ExternId {
        self.em.extern_value(name, || ExternVal::Table(make()))
    }

    /// Emit a failing check: `if`/`else if` per the current chain depth.
    pub fn fail_if(&mut self, cond: Cond, code: ErrorCode) {
        self.fail_if_with(cond, code, FailWith::None);
    }

    pub fn fail_if_with(&mut self, cond: Cond, code: ErrorCode, with: FailWith) {
        let kind = if self.chain == 0 { BlockKind::If(cond) } else { BlockKind::ElseIf(cond) };
        self.em.open(kind);
        self.em.op(Op::Fail { code, with });
        self.em.close();
        self.chain += 1;
    }

    pub fn fail_unless_kind(&mut self, slot: SlotId, kind: Kind, code: ErrorCode) {
        self.fail_if(Cond::KindNot(slot, kind), code);
    }

    /// Emit a non-failing arm of the current check chain.
    pub fn check_arm(
        &mut self,
        cond: Cond,
        body: impl FnOnce(&mut Self) -> Result<(), EmitError>,
    ) -> Result<(), EmitError> {
        let kind = if self.chain == 0 { BlockKind::If(cond) } else { BlockKind::ElseIf(cond) };
        self.em.open(kind);
        self.enter_scope();
        body(self)?;
        self.leave_scope();
        self.em.close();
        self.chain += 1;
        Ok(())
    }

    /// Emit the success continuation of the current check chain: an `else`
    /// arm when checks precede it, inline otherwise. Closes the chain.
    pub fn otherwise(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<(), EmitError>,
    ) -> Result<(), EmitError> {
        if self.chain == 0 {
            self.enter_scope();
            body(self)?;
            self.leave_scope();
            return Ok(());
        }
        self.em.open(BlockKind::Else);
        self.enter_scope();
        body(self)?;
        self.leave_scope();
        self.em.close();
        self.chain = 0;
        Ok(())
    }

    /// Emit a standalone guarded region, independent of any check chain.
    pub fn guard(
        &mut self,
        cond: Cond,
        body: impl FnOnce(&mut Self) -> Result<(), EmitError>,
    ) -> Result<(), EmitError> {
        self.chain = 0;
        self.em.open(BlockKind::If(cond));
        self.enter_scope();
        body(self)?;
        self.leave_scope();
        self.em.close();
        self.chain = 0;
        Ok(())
    }

    pub fn reset_chain(&mut self) {
        self.chain = 0;
    }

    pub fn push_key(&mut self, key: Arc<str>) {
        self.path_depth += 1;
        self.em.op(Op::PushKey(key));
    }

    pub fn push_index(&mut self, index: SlotId) {
        self.path_depth += 1;
        self.em.op(Op::PushIndex(index));
    }

    pub fn pop_path(&mut self) {
        debug_assert!(self.path_depth > 0, "path pop without a matching push");
        self.path_depth = self.path_depth.saturating_sub(1);
        self.em.op(Op::PopPath);
    }

    /// Save chain depth, nesting depth, and the extraction flag around a
    /// nested scope.
    pub fn enter_scope(&mut self) {
        self.saved.push(Saved {
            chain: self.chain,
            depth: self.depth,
            unchecked: self.unchecked,
        });
        self.depth += 1;
        self.chain = 0;
    }

    pub fn leave_scope(&mut self) {
        let Some(saved) = self.saved.pop() else {
            debug_assert!(false, "scope leave without a matching enter");
            return;
        };
        self.chain = saved.chain;
        self.depth = saved.depth;
        self.unchecked = saved.unchecked;
    }

    /// Compile one node: null/missing pass-through, handler checks, error
    /// gate, then the caller's success ops. Returns the binding holding the
    /// validated value.
    pub fn compile_node_with(
        &mut self,
        input: SlotId,
        node: &SchemaNode,
        on_ok: &mut dyn FnMut(&mut Compiler<'_>, SlotId) -> Result<(), EmitError>,
    ) -> Result<SlotId, EmitError> {
        let handler = self
            .registry
            .resolve(&node.type_name)
            .cloned()
            .ok_or_else(|| {
                EmitError::codegen(
                    format!("type `{}` is not in the compile registry", node.type_name),
                    self.em.listing(),
                )
            })?;
        let out = self.fresh(handler.kind().tag())?;

        // Null/missing pass-through always comes first.
        let gate = match (node.nullable, node.optional) {
            (true, true) => Some(Cond::IsNull(input).or(Cond::IsMissing(input))),
            (true, false) => Some(Cond::IsNull(input)),
            (false, true) => Some(Cond::IsMissing(input)),
            (false, false) => None,
        };
        if let Some(cond) = gate {
            self.check_arm(cond, |cc| {
                cc.emit(Op::Bind { dst: out, from: input });
                Ok(())
            })?;
        }

        handler.compile(self, input, out, node)?;

        if self.opts.all_errors() {
            // Error-action branch: a recorded failure is committed (and the
            // success ops skipped); otherwise validation continues.
            self.reset_chain();
            self.em.open(BlockKind::If(Cond::Tainted));
            self.em.op(Op::ClearTaint);
            self.em.close();
            self.em.open(BlockKind::Else);
            self.enter_scope();
            on_ok(self, out)?;
            self.leave_scope();
            self.em.close();
            self.chain = 0;
        } else {
            on_ok(self, out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorCode, ValidateError};
    use crate::options::Options;
    use crate::schema::Schema;
    use serde_json::json;

    fn first_violation(err: ValidateError) -> (ErrorCode, String) {
        match err {
            ValidateError::Invalid(v) => (v.code, v.path),
            other => panic!("expected a single violation, got {other}"),
        }
    }

    #[test]
    fn nested_failures_report_exact_paths() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "a": {
                "$type": "object",
                "b": {"$type": "int[]"}
            }
        }))
        .unwrap();
        let err = schema
            .validate(&json!({"a": {"b": [1, "x"]}}))
            .unwrap_err();
        let (code, path) = first_violation(err);
        assert_eq!(code, ErrorCode::IntCheckFailure);
        assert_eq!(path, "a.b[1]");
    }

    #[test]
    fn strict_mode_rejects_undeclared_properties() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "x": {"$type": "int"}
        }))
        .unwrap();
        let err = schema.validate(&json!({"x": 1, "y": 2})).unwrap_err();
        match err {
            ValidateError::Invalid(v) => {
                assert_eq!(v.code, ErrorCode::InvalidProperty);
                assert_eq!(v.unexpected, Some(vec!["y".to_string()]));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn extract_all_drops_undeclared_properties_instead() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "x": {"$type": "int"}
        }))
        .unwrap();
        let out = schema
            .validate_with(&json!({"x": 1, "y": 2}), Options::EXTRACT_ALL)
            .unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[test]
    fn extract_top_only_relaxes_the_root() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "inner": {
                "$type": "object",
                "x": {"$type": "int"}
            }
        }))
        .unwrap();
        // Extra root key is dropped...
        let out = schema
            .validate_with(
                &json!({"inner": {"x": 1}, "stray": true}),
                Options::EXTRACT_TOP,
            )
            .unwrap();
        assert_eq!(out, json!({"inner": {"x": 1}}));
        // ...but nested objects stay strict.
        let err = schema
            .validate_with(
                &json!({"inner": {"x": 1, "stray": true}}),
                Options::EXTRACT_TOP,
            )
            .unwrap_err();
        let (code, path) = first_violation(err);
        assert_eq!(code, ErrorCode::InvalidProperty);
        assert_eq!(path, "inner");
    }

    #[test]
    fn accumulate_mode_collects_in_declaration_order() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "first": {"$type": "int"},
            "second": {"$type": "string"}
        }))
        .unwrap();
        let err = schema
            .validate_with(&json!({}), Options::ALL_ERRORS)
            .unwrap_err();
        match err {
            ValidateError::Batch(vs) => {
                assert_eq!(vs.len(), 2);
                assert_eq!(vs[0].code, ErrorCode::RequiredField);
                assert_eq!(vs[0].path, "first");
                assert_eq!(vs[1].code, ErrorCode::RequiredField);
                assert_eq!(vs[1].path, "second");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn accumulate_mode_keeps_validating_siblings() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "a": {"$type": "int", "$min": 10},
            "b": {"$type": "string", "$minLength": 3},
            "c": {"$type": "bool"}
        }))
        .unwrap();
        let err = schema
            .validate_with(&json!({"a": 5, "b": "xy", "c": true}), Options::ALL_ERRORS)
            .unwrap_err();
        match err {
            ValidateError::Batch(vs) => {
                let codes: Vec<_> = vs.iter().map(|v| v.code.clone()).collect();
                assert_eq!(codes, vec![ErrorCode::OutOfRange, ErrorCode::InvalidLength]);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn int16_boundaries() {
        let schema = Schema::compile(&json!({"$type": "int16"})).unwrap();
        assert!(schema.validate(&json!(32767)).is_ok());
        assert!(schema.validate(&json!(-32768)).is_ok());

        let (code, _) = first_violation(schema.validate(&json!(32768)).unwrap_err());
        assert_eq!(code, ErrorCode::OutOfRange);
        let (code, _) = first_violation(schema.validate(&json!(-32769)).unwrap_err());
        assert_eq!(code, ErrorCode::OutOfRange);
        let (code, _) = first_violation(schema.validate(&json!(1.5)).unwrap_err());
        assert_eq!(code, ErrorCode::IntCheckFailure);
    }

    #[test]
    fn int32_boundary_checks_collapse_into_the_truncation_test() {
        let schema = Schema::compile(&json!({"$type": "int32"})).unwrap();
        assert!(schema.validate(&json!(2147483647)).is_ok());
        assert!(schema.validate(&json!(-2147483648i64)).is_ok());
        // Out of i32 range: the truncation identity itself rejects.
        let (code, _) = first_violation(schema.validate(&json!(2147483648i64)).unwrap_err());
        assert_eq!(code, ErrorCode::IntCheckFailure);
        let listing = schema.listing(Options::NONE).unwrap();
        assert!(
            !listing.contains("BelowMin") && !listing.contains("AboveMax"),
            "bounds equal to the i32 boundary must be dropped:\n{listing}"
        );
    }

    #[test]
    fn unbounded_int_uses_the_fractional_test() {
        let schema = Schema::compile(&json!({"$type": "int"})).unwrap();
        assert!(schema.validate(&json!(9007199254740991i64)).is_ok());
        let (code, _) = first_violation(schema.validate(&json!(0.25)).unwrap_err());
        assert_eq!(code, ErrorCode::IntCheckFailure);
    }

    #[test]
    fn exclusive_and_inclusive_bounds_merge_narrowest_wins() {
        let schema = Schema::compile(&json!({
            "$type": "int",
            "$gt": 0,
            "$min": 2,
            "$lt": 10
        }))
        .unwrap();
        assert!(schema.validate(&json!(2)).is_ok(), "tighter inclusive lower bound");
        assert!(schema.validate(&json!(1)).is_err());
        assert!(schema.validate(&json!(9)).is_ok());
        assert!(schema.validate(&json!(10)).is_err());
    }

    #[test]
    fn float_bounds_and_finiteness() {
        let schema = Schema::compile(&json!({"$type": "double", "$gt": 0.0})).unwrap();
        assert!(schema.validate(&json!(0.5)).is_ok());
        let (code, _) = first_violation(schema.validate(&json!(0.0)).unwrap_err());
        assert_eq!(code, ErrorCode::OutOfRange);

        let bare = Schema::compile(&json!({"$type": "number"})).unwrap();
        assert!(bare.validate(&json!(1e300)).is_ok());
        let (code, _) = first_violation(bare.validate(&json!("x")).unwrap_err());
        assert_eq!(code, ErrorCode::DoubleCheckFailure);
    }

    #[test]
    fn divisibility_is_checked_after_range() {
        let schema = Schema::compile(&json!({
            "$type": "int",
            "$min": 0,
            "$divBy": 5
        }))
        .unwrap();
        assert!(schema.validate(&json!(15)).is_ok());
        let (code, _) = first_violation(schema.validate(&json!(7)).unwrap_err());
        assert_eq!(code, ErrorCode::DivByFailure);
        let (code, _) = first_violation(schema.validate(&json!(-5)).unwrap_err());
        assert_eq!(code, ErrorCode::OutOfRange, "range wins over divisibility");
    }

    #[test]
    fn string_checks_length_then_pattern() {
        let schema = Schema::compile(&json!({
            "$type": "string",
            "$minLength": 2,
            "$maxLength": 4,
            "$regex": "^[a-z]+$"
        }))
        .unwrap();
        assert!(schema.validate(&json!("abc")).is_ok());
        let (code, _) = first_violation(schema.validate(&json!("a")).unwrap_err());
        assert_eq!(code, ErrorCode::InvalidLength);
        let (code, _) = first_violation(schema.validate(&json!("ABC")).unwrap_err());
        assert_eq!(code, ErrorCode::RegExpFailure);
    }

    #[test]
    fn custom_regex_code_replaces_the_default() {
        let schema = Schema::compile(&json!({
            "$type": "string",
            "$regex": "^[0-9]+$",
            "$code": "NotADigitString"
        }))
        .unwrap();
        let (code, _) = first_violation(schema.validate(&json!("abc")).unwrap_err());
        assert_eq!(code.to_string(), "NotADigitString");
    }

    #[test]
    fn string_length_counts_chars_not_bytes() {
        let schema = Schema::compile(&json!({"$type": "string", "$length": 2})).unwrap();
        assert!(schema.validate(&json!("αβ")).is_ok());
        assert!(schema.validate(&json!("abc")).is_err());
    }

    #[test]
    fn nullable_passes_null_through_unchanged() {
        let schema = Schema::compile(&json!({"$type": "int?"})).unwrap();
        assert_eq!(schema.validate(&json!(null)).unwrap(), json!(null));
        assert_eq!(schema.validate(&json!(3)).unwrap(), json!(3));
        assert!(schema.validate(&json!("x")).is_err());
    }

    #[test]
    fn optional_fields_validate_only_when_present() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "id": {"$type": "int"},
            "note": {"$type": "string?", "$minLength": 2}
        }))
        .unwrap();
        assert_eq!(
            schema.validate(&json!({"id": 1})).unwrap(),
            json!({"id": 1})
        );
        assert_eq!(
            schema.validate(&json!({"id": 1, "note": null})).unwrap(),
            json!({"id": 1, "note": null})
        );
        assert!(schema.validate(&json!({"id": 1, "note": "x"})).is_err());
    }

    #[test]
    fn array_length_checks_run_before_element_recursion() {
        let schema = Schema::compile(&json!({
            "$type": "array",
            "$minLength": 2,
            "data": {"$type": "int"}
        }))
        .unwrap();
        let (code, _) = first_violation(schema.validate(&json!(["x"])).unwrap_err());
        assert_eq!(code, ErrorCode::InvalidLength, "length failure wins");
        assert!(schema.validate(&json!([1, 2, 3])).is_ok());
    }

    #[test]
    fn date_schema_round_trip() {
        let schema = Schema::compile(&json!({"$type": "date"})).unwrap();
        assert!(schema.validate(&json!("2024-02-29")).is_ok());
        let (code, _) = first_violation(schema.validate(&json!("2023-02-29")).unwrap_err());
        assert_eq!(code, ErrorCode::DateCheckFailure);

        let dt = Schema::compile(&json!({
            "$type": "datetime",
            "$leapSecond": true
        }))
        .unwrap();
        assert!(dt.validate(&json!("2016-12-31 23:59:60")).is_ok());
        assert!(dt.validate(&json!("2014-12-31 23:59:60")).is_err());
    }

    #[test]
    fn enum_maps_keys_to_table_values() {
        let schema = Schema::compile(&json!({
            "$type": "enum",
            "$values": {"on": 1, "off": 0}
        }))
        .unwrap();
        assert_eq!(schema.validate(&json!("on")).unwrap(), json!(1));
        let (code, _) = first_violation(schema.validate(&json!("standby")).unwrap_err());
        assert_eq!(code, ErrorCode::EnumCheckFailure);
    }

    #[test]
    fn leaf_matcher_codes() {
        let mac = Schema::compile(&json!({"$type": "mac", "$separator": "-"})).unwrap();
        assert!(mac.validate(&json!("00-1a-2b-3c-4d-5e")).is_ok());
        let (code, _) = first_violation(mac.validate(&json!("00:1a:2b:3c:4d:5e")).unwrap_err());
        assert_eq!(code.to_string(), "MACCheckFailure");

        let ip = Schema::compile(&json!({"$type": "ipv4"})).unwrap();
        let (code, _) = first_violation(ip.validate(&json!("256.1.1.1")).unwrap_err());
        assert_eq!(code.to_string(), "IPV4CheckFailure");

        let color = Schema::compile(&json!({
            "$type": "color",
            "$extraNames": {"brand": "#336699"}
        }))
        .unwrap();
        assert!(color.validate(&json!("brand")).is_ok());
        assert!(color.validate(&json!("#336699")).is_ok());
        assert!(color.validate(&json!("not-a-color")).is_err());
    }

    #[test]
    fn deep_arrays_restore_paths_between_siblings() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "grid": {
                "$type": "array",
                "data": {"$type": "int[]"}
            },
            "tail": {"$type": "bool"}
        }))
        .unwrap();
        let err = schema
            .validate(&json!({"grid": [[1], [2, "x"]], "tail": true}))
            .unwrap_err();
        let (code, path) = first_violation(err);
        assert_eq!(code, ErrorCode::IntCheckFailure);
        assert_eq!(path, "grid[1][1]");

        let err = schema
            .validate(&json!({"grid": [], "tail": "nope"}))
            .unwrap_err();
        let (_, path) = first_violation(err);
        assert_eq!(path, "tail", "sibling path must not inherit array segments");
    }
}
