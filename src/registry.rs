//! Type and rule registry.
//!
//! Types map alias names to a compile handler plus an optional
//! post-normalization hook; rules are normalization-time hooks over object
//! nodes. The registry is copy-on-extend: deriving a customized registry
//! clones the maps and layers additions on top, leaving the base and every
//! schema already normalized against it untouched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::compile::arr::ArrayType;
use crate::compile::ext::{AnyType, ColorType, DateType, EnumType, IpType, MacType};
use crate::compile::num::{BoolType, FloatType, IntType};
use crate::compile::obj::ObjectType;
use crate::compile::str::StrType;
use crate::compile::Compiler;
use crate::error::{EmitError, SchemaError};
use crate::ops::SlotId;
use crate::schema::SchemaNode;

/// Coarse kind tag. Only used to keep generated binding names distinct and
/// to classify container types during normalization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TyKind {
    Bool,
    Int,
    Float,
    Str,
    Date,
    Color,
    Net,
    Choice,
    Object,
    Array,
    Any,
    Other,
}

impl TyKind {
    /// Mangled binding tag.
    pub fn tag(self) -> &'static str {
        match self {
            TyKind::Bool => "b",
            TyKind::Int => "i",
            TyKind::Float => "f",
            TyKind::Str => "s",
            TyKind::Date => "dt",
            TyKind::Color => "c",
            TyKind::Net => "net",
            TyKind::Choice => "e",
            TyKind::Object => "o",
            TyKind::Array => "a",
            TyKind::Any => "x",
            TyKind::Other => "u",
        }
    }
}

/// One registered type: the names it answers to, its coarse kind, the check
/// emission for one occurrence, and an optional post-normalization hook.
pub trait TypeHandler: Send + Sync {
    fn names(&self) -> &[&str];

    fn kind(&self) -> TyKind;

    /// Emit the concrete checks for one occurrence. `input` holds the value
    /// under test; the validated value must end up in `out`.
    fn compile(
        &self,
        cc: &mut Compiler<'_>,
        input: SlotId,
        out: SlotId,
        node: &SchemaNode,
    ) -> Result<(), EmitError>;

    /// Runs once per node at the end of normalization.
    fn post_normalize(&self, _node: &mut SchemaNode) -> Result<(), SchemaError> {
        Ok(())
    }
}

/// Normalization-time hook invoked for every object-type node; derives
/// auxiliary cross-field metadata without altering validation behavior.
pub trait RuleHook: Send + Sync {
    fn apply(&self, node: &mut SchemaNode) -> Result<(), SchemaError>;
}

// ————————————————————————————————————————————————————————————————————————————
// REGISTRY
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone)]
pub struct Registry {
    types: Arc<HashMap<String, Arc<dyn TypeHandler>>>,
    rules: Arc<IndexMap<String, Arc<dyn RuleHook>>>,
}

impl Registry {
    /// The shared default environment.
    pub fn base() -> Registry {
        BASE.clone()
    }

    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn TypeHandler>> {
        self.types.get(name)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, &Arc<dyn RuleHook>)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    /// Start a customized environment from this one. Pure: the receiver is
    /// never mutated.
    pub fn derive(&self) -> RegistryBuilder {
        RegistryBuilder {
            types: (*self.types).clone(),
            rules: (*self.rules).clone(),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry")
            .field("types", &names)
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct RegistryBuilder {
    types: HashMap<String, Arc<dyn TypeHandler>>,
    rules: IndexMap<String, Arc<dyn RuleHook>>,
}

impl RegistryBuilder {
    /// Register a type under every name it answers to, overriding existing
    /// entries of the same name.
    pub fn with_type(mut self, handler: Arc<dyn TypeHandler>) -> Self {
        for name in handler.names() {
            self.types.insert((*name).to_string(), handler.clone());
        }
        self
    }

    pub fn with_rule(mut self, name: &str, rule: Arc<dyn RuleHook>) -> Self {
        self.rules.insert(name.to_string(), rule);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            types: Arc::new(self.types),
            rules: Arc::new(self.rules),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// DEFAULT ENVIRONMENT
// ————————————————————————————————————————————————————————————————————————————

static BASE: Lazy<Registry> = Lazy::new(|| {
    let empty = RegistryBuilder {
        types: HashMap::new(),
        rules: IndexMap::new(),
    };
    empty
        .with_type(Arc::new(BoolType))
        .with_type(Arc::new(IntType::new(&["int", "integer"], None, None)))
        .with_type(Arc::new(IntType::new(&["int8"], Some(-128.0), Some(127.0))))
        .with_type(Arc::new(IntType::new(&["int16"], Some(-32768.0), Some(32767.0))))
        .with_type(Arc::new(IntType::new(
            &["int32"],
            Some(-2147483648.0),
            Some(2147483647.0),
        )))
        .with_type(Arc::new(IntType::new(
            &["int64"],
            Some(i64::MIN as f64),
            Some(i64::MAX as f64),
        )))
        .with_type(Arc::new(IntType::new(&["uint"], Some(0.0), None)))
        .with_type(Arc::new(IntType::new(&["uint8"], Some(0.0), Some(255.0))))
        .with_type(Arc::new(IntType::new(&["uint16"], Some(0.0), Some(65535.0))))
        .with_type(Arc::new(IntType::new(
            &["uint32"],
            Some(0.0),
            Some(4294967295.0),
        )))
        .with_type(Arc::new(FloatType))
        .with_type(Arc::new(StrType))
        .with_type(Arc::new(DateType::new(&["date"], "YYYY-MM-DD")))
        .with_type(Arc::new(DateType::new(&["datetime"], "YYYY-MM-DD HH:mm:ss")))
        .with_type(Arc::new(DateType::new(&["time"], "HH:mm:ss")))
        .with_type(Arc::new(ColorType))
        .with_type(Arc::new(MacType))
        .with_type(Arc::new(IpType::V4))
        .with_type(Arc::new(IpType::V6))
        .with_type(Arc::new(EnumType))
        .with_type(Arc::new(ObjectType))
        .with_type(Arc::new(ArrayType))
        .with_type(Arc::new(AnyType))
        .with_rule("keys", Arc::new(KeyFieldsRule))
        .build()
});

/// Built-in rule: classify `$key`-annotated fields into primary/foreign key
/// sets on the owning object's metadata.
pub struct KeyFieldsRule;

impl RuleHook for KeyFieldsRule {
    fn apply(&self, node: &mut SchemaNode) -> Result<(), SchemaError> {
        let mut primary = Vec::new();
        let mut foreign = Vec::new();
        for (name, field) in &node.fields {
            match field.attrs.get("$key").and_then(Value::as_str) {
                Some("primary") => primary.push(name.clone()),
                Some("foreign") => foreign.push(name.clone()),
                Some(other) => {
                    return Err(SchemaError::InvalidAttribute {
                        type_name: field.type_name.clone(),
                        attr: "$key".to_string(),
                        reason: format!("unknown key class `{other}`"),
                    });
                }
                None => {}
            }
        }
        if !primary.is_empty() || !foreign.is_empty() {
            node.meta.insert(
                "keys".to_string(),
                json!({ "primary": primary, "foreign": foreign }),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Kind, Op};
    use crate::schema::Schema;
    use serde_json::json;

    /// Uppercase-only string, registered under a custom name.
    struct ShoutType;

    impl TypeHandler for ShoutType {
        fn names(&self) -> &[&str] {
            &["shout"]
        }

        fn kind(&self) -> TyKind {
            TyKind::Other
        }

        fn compile(
            &self,
            cc: &mut Compiler<'_>,
            input: SlotId,
            out: SlotId,
            _node: &SchemaNode,
        ) -> Result<(), EmitError> {
            cc.fail_unless_kind(input, Kind::Str, crate::ErrorCode::StringCheckFailure);
            let pred = cc.extern_pred("shout:upper", || {
                Arc::new(|s: &str| !s.is_empty() && s.chars().all(|c| !c.is_lowercase()))
            });
            cc.fail_if(
                crate::ops::Cond::PredFails { pred, slot: input },
                crate::ErrorCode::StringCheckFailure,
            );
            cc.emit(Op::Bind { dst: out, from: input });
            Ok(())
        }
    }

    #[test]
    fn derived_registry_layers_without_mutating_the_base() {
        let custom = Registry::base().derive().with_type(Arc::new(ShoutType)).build();

        let raw = json!({"$type": "shout"});
        let schema = Schema::compile_with(&raw, &custom).unwrap();
        assert!(schema.validate(&json!("HELLO")).is_ok());
        assert!(schema.validate(&json!("hello")).is_err());

        // The base environment never learned the new type.
        assert!(matches!(
            Schema::compile(&raw).unwrap_err(),
            SchemaError::UnknownType(name) if name == "shout"
        ));
    }

    #[test]
    fn keys_rule_classifies_fields_into_metadata() {
        let schema = Schema::compile(&json!({
            "$type": "object",
            "id": {"$type": "int", "$key": "primary"},
            "owner": {"$type": "int", "$key": "foreign"},
            "note": {"$type": "string?"}
        }))
        .unwrap();
        let meta = schema.root().meta.get("keys").unwrap();
        assert_eq!(meta["primary"], json!(["id"]));
        assert_eq!(meta["foreign"], json!(["owner"]));
    }

    #[test]
    fn unknown_key_class_is_an_authoring_error() {
        let err = Schema::compile(&json!({
            "$type": "object",
            "id": {"$type": "int", "$key": "composite"}
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidAttribute { attr, .. } if attr == "$key"));
    }
}
