//! Canonical schema tree and the public validation facade.
//!
//! A `SchemaNode` is the normalized form of one type occurrence: resolved
//! type name, nullability flags, typed constraints, raw structural
//! attributes (for custom types and rules), nested fields or the array
//! element, rule-derived metadata, and a private per-option-bitmask function
//! cache. Nodes are immutable after normalization except for lazy cache
//! population.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::compile;
use crate::date::{CompiledFormat, DateCfg};
use crate::error::{EmitError, SchemaError, ValidateError};
use crate::matchers::ColorTable;
use crate::norm;
use crate::options::Options;
use crate::registry::Registry;
use crate::run::CompiledFn;

// ————————————————————————————————————————————————————————————————————————————
// CONSTRAINTS
// ————————————————————————————————————————————————————————————————————————————

/// Typed structural attributes shared by the built-in types. Unknown `$`
/// attributes stay in the node's raw attribute map for custom handlers.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraints {
    /// Inclusive bounds (`$min` / `$max`).
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Exclusive bounds (`$gt` / `$lt`).
    pub gt: Option<f64>,
    pub lt: Option<f64>,
    /// `$divBy`.
    pub div_by: Option<f64>,
    /// `$length` / `$minLength` / `$maxLength`.
    pub length: Option<usize>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// `$regex` and its `$code` replacement error code.
    pub pattern: Option<String>,
    pub code: Option<String>,
    /// `$format` for date types.
    pub format: Option<String>,
    /// `$leapYear` (default on) and `$leapSecond` (default off).
    pub leap_year: bool,
    pub leap_second: bool,
    /// `$names` (default on) and `$extraNames` for color types.
    pub allow_names: bool,
    pub extra_names: Vec<String>,
    /// `$separator` for MAC-style checks.
    pub separator: char,
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            min: None,
            max: None,
            gt: None,
            lt: None,
            div_by: None,
            length: None,
            min_length: None,
            max_length: None,
            pattern: None,
            code: None,
            format: None,
            leap_year: true,
            leap_second: false,
            allow_names: true,
            extra_names: Vec::new(),
            separator: ':',
        }
    }
}

/// Products of post-normalization hooks: everything a type handler resolves
/// once per node so compiled programs can reference it as an opaque value.
#[derive(Clone, Debug, Default)]
pub(crate) struct Prepared {
    pub date: Option<Arc<CompiledFormat>>,
    pub regex: Option<Arc<regex::Regex>>,
    pub colors: Option<Arc<ColorTable>>,
    pub choices: Option<Arc<IndexMap<String, Value>>>,
}

// ————————————————————————————————————————————————————————————————————————————
// SCHEMA NODE
// ————————————————————————————————————————————————————————————————————————————

pub struct SchemaNode {
    /// Marker-stripped type name as written in the schema (registry-resolved).
    pub type_name: String,
    /// Null passes the node unchanged.
    pub nullable: bool,
    /// As an object field, the key may be absent.
    pub optional: bool,
    pub constraints: Constraints,
    /// Raw `$`-attributes (marker-stripped) for custom handlers and rules.
    pub attrs: IndexMap<String, Value>,
    /// Declared fields, in declaration order (object types).
    pub fields: IndexMap<String, SchemaNode>,
    /// Element schema (array types).
    pub element: Option<Box<SchemaNode>>,
    /// Rule-derived metadata, keyed by rule name.
    pub meta: BTreeMap<String, Value>,
    pub(crate) prepared: Prepared,
    cache: FnCache,
}

impl SchemaNode {
    pub(crate) fn new(type_name: impl Into<String>) -> Self {
        SchemaNode {
            type_name: type_name.into(),
            nullable: false,
            optional: false,
            constraints: Constraints::default(),
            attrs: IndexMap::new(),
            fields: IndexMap::new(),
            element: None,
            meta: BTreeMap::new(),
            prepared: Prepared::default(),
            cache: FnCache::default(),
        }
    }

    pub(crate) fn date_cfg(&self) -> DateCfg {
        DateCfg {
            leap_year: self.constraints.leap_year,
            leap_second: self.constraints.leap_second,
        }
    }

    /// Fetch or lazily compile the validator for one option combination.
    /// First use publishes once; every later request returns the identical
    /// callable.
    pub(crate) fn compiled(
        &self,
        registry: &Registry,
        opts: Options,
    ) -> Result<Arc<CompiledFn>, EmitError> {
        self.cache.slots[opts.slot()]
            .get_or_try_init(|| compile::compile(self, registry, opts).map(Arc::new))
            .map(Arc::clone)
    }
}

impl fmt::Debug for SchemaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaNode")
            .field("type_name", &self.type_name)
            .field("nullable", &self.nullable)
            .field("optional", &self.optional)
            .field("constraints", &self.constraints)
            .field("fields", &self.fields)
            .field("element", &self.element)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// One lazily populated cell per option bitmask value.
struct FnCache {
    slots: [OnceCell<Arc<CompiledFn>>; Options::SLOT_COUNT],
}

impl Default for FnCache {
    fn default() -> Self {
        FnCache { slots: std::array::from_fn(|_| OnceCell::new()) }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// PUBLIC FACADE
// ————————————————————————————————————————————————————————————————————————————

/// A normalized schema bound to the registry it was normalized against.
#[derive(Debug)]
pub struct Schema {
    root: SchemaNode,
    registry: Registry,
}

impl Schema {
    /// Normalize a raw schema against the base registry.
    pub fn compile(raw: &Value) -> Result<Schema, SchemaError> {
        Self::compile_with(raw, &Registry::base())
    }

    /// Normalize a raw schema against a customized registry.
    pub fn compile_with(raw: &Value, registry: &Registry) -> Result<Schema, SchemaError> {
        Ok(Schema {
            root: norm::normalize(raw, registry)?,
            registry: registry.clone(),
        })
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    /// Validate with default options: strict keys, fail-fast.
    pub fn validate(&self, input: &Value) -> Result<Value, ValidateError> {
        self.validate_with(input, Options::NONE)
    }

    /// Validate with an explicit option combination. Returns the validated
    /// output value; output objects carry exactly the declared fields.
    pub fn validate_with(&self, input: &Value, opts: Options) -> Result<Value, ValidateError> {
        let compiled = self.root.compiled(&self.registry, opts)?;
        compiled.validate(input)
    }

    /// Pure predicate variant: no error objects are constructed.
    pub fn check(&self, input: &Value) -> Result<bool, EmitError> {
        let compiled = self.root.compiled(&self.registry, Options::PREDICATE)?;
        Ok(compiled.test(input))
    }

    /// Rendered listing of the compiled program for one option combination.
    pub fn listing(&self, opts: Options) -> Result<String, EmitError> {
        let compiled = self.root.compiled(&self.registry, opts)?;
        Ok(compiled.source().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_cache_returns_the_identical_callable() {
        let schema = Schema::compile(&json!({"$type": "int16"})).unwrap();
        let a = schema.root.compiled(&schema.registry, Options::NONE).unwrap();
        let b = schema.root.compiled(&schema.registry, Options::NONE).unwrap();
        assert!(Arc::ptr_eq(&a, &b), "second compile request must hit the cache");

        let c = schema
            .root
            .compiled(&schema.registry, Options::ALL_ERRORS)
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c), "distinct bitmasks use distinct slots");
    }

    #[test]
    fn compiling_twice_is_behaviorally_identical() {
        let raw = json!({
            "$type": "object",
            "name": {"$type": "string", "$minLength": 1},
            "age": {"$type": "uint8?"}
        });
        let first = Schema::compile(&raw).unwrap();
        let second = Schema::compile(&raw).unwrap();
        let input = json!({"name": "ada", "age": 36});
        assert_eq!(
            first.validate(&input).unwrap(),
            second.validate(&input).unwrap()
        );
        let bad = json!({"name": ""});
        assert!(first.validate(&bad).is_err());
        assert!(second.validate(&bad).is_err());
    }

    #[test]
    fn valid_output_round_trips_restricted_to_declared_fields() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "id": {"$type": "int"},
            "tags": {"$type": "string[]"},
            "nested": {
                "$type": "object",
                "flag": {"$type": "bool"}
            }
        }))
        .unwrap();
        let input = json!({
            "id": 7,
            "tags": ["a", "b"],
            "nested": {"flag": true}
        });
        let out = schema.validate(&input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn check_is_a_pure_predicate() {
        let schema = Schema::compile(&json!({"$type": "bool"})).unwrap();
        assert!(schema.check(&json!(true)).unwrap());
        assert!(!schema.check(&json!("true")).unwrap());
    }
}
