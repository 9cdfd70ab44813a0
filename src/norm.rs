//! Schema normalizer: canonicalizes a raw schema node into the internal
//! tree, recursively.
//!
//! Raw nodes are JSON objects. `$`-prefixed keys are structural attributes;
//! everything else is a nested field definition (object types) or the
//! reserved `data` element definition (array types). Type-name markers are
//! expanded before anything else: a trailing `?` makes the node optional and
//! nullable, a trailing `[]` rewrites the node as an array whose element is
//! the remaining definition.

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::registry::{Registry, TyKind};
use crate::schema::SchemaNode;

/// Normalize one raw schema node against a registry.
pub fn normalize(raw: &Value, registry: &Registry) -> Result<SchemaNode, SchemaError> {
    let Some(map) = raw.as_object() else {
        return Err(SchemaError::MalformedType("node is not an object".to_string()));
    };
    let type_attr = map
        .get("$type")
        .ok_or_else(|| SchemaError::MalformedType("missing $type attribute".to_string()))?;
    let Some(type_str) = type_attr.as_str() else {
        return Err(SchemaError::MalformedType("$type is not a string".to_string()));
    };

    // Marker 1: trailing `?` (optional + nullable). A doubled marker is an
    // authoring error.
    let (name, marked_optional) = match type_str.strip_suffix('?') {
        Some(rest) => {
            if rest.ends_with('?') {
                return Err(SchemaError::MalformedType(type_str.to_string()));
            }
            (rest, true)
        }
        None => (type_str, false),
    };
    if name.is_empty() {
        return Err(SchemaError::MalformedType(type_str.to_string()));
    }

    // Marker 2: trailing `[]`. The remaining definition becomes the element
    // schema; the marker is stripped before the recursive call, so the
    // rewrite terminates.
    if let Some(base) = name.strip_suffix("[]") {
        if base.is_empty() {
            return Err(SchemaError::MalformedType(type_str.to_string()));
        }
        let mut element_map = Map::new();
        element_map.insert("$type".to_string(), Value::String(base.to_string()));
        for (key, value) in map {
            if matches!(key.as_str(), "$type" | "$optional" | "$nullable") {
                continue;
            }
            element_map.insert(key.clone(), value.clone());
        }
        let element = normalize(&Value::Object(element_map), registry)?;

        let mut node = SchemaNode::new("array");
        node.nullable = marked_optional || bool_attr(map, "$nullable", "array")?;
        node.optional = marked_optional || bool_attr(map, "$optional", "array")?;
        node.element = Some(Box::new(element));
        let handler = registry
            .resolve("array")
            .ok_or_else(|| SchemaError::UnknownType("array".to_string()))?;
        handler.post_normalize(&mut node)?;
        return Ok(node);
    }

    let handler = registry
        .resolve(name)
        .ok_or_else(|| SchemaError::UnknownType(name.to_string()))?;
    let kind = handler.kind();

    let mut node = SchemaNode::new(name);
    node.nullable = marked_optional;
    node.optional = marked_optional;

    // Partition the incoming keys: structural attributes vs nested field
    // definitions, with `$$` escaping and the `$fields` auxiliary map for
    // names colliding with the reserved prefix.
    let mut fields_raw: Vec<(String, Value)> = Vec::new();
    let mut element_raw: Option<Value> = None;
    for (key, value) in map {
        if key == "$type" {
            continue;
        }
        if let Some(escaped) = key.strip_prefix("$$") {
            fields_raw.push((format!("${escaped}"), value.clone()));
            continue;
        }
        if key == "$fields" {
            let Some(aux) = value.as_object() else {
                return Err(SchemaError::InvalidAttribute {
                    type_name: name.to_string(),
                    attr: key.clone(),
                    reason: "expected an object of field definitions".to_string(),
                });
            };
            for (field_name, field_raw) in aux {
                fields_raw.push((field_name.clone(), field_raw.clone()));
            }
            continue;
        }
        if key.starts_with('$') {
            apply_attr(&mut node, key, value)?;
            continue;
        }
        // `data` is reserved on non-object types for the array element
        // definition; on objects it is an ordinary field name.
        if key == "data" && kind != TyKind::Object {
            if kind == TyKind::Array {
                element_raw = Some(value.clone());
            }
            continue;
        }
        fields_raw.push((key.clone(), value.clone()));
    }

    match kind {
        TyKind::Object => {
            for (field_name, field_raw) in fields_raw {
                let field = normalize(&field_raw, registry)?;
                node.fields.insert(field_name, field);
            }
        }
        _ => {
            if let Some((field_name, _)) = fields_raw.first() {
                return Err(SchemaError::UnsupportedField {
                    type_name: name.to_string(),
                    field: field_name.clone(),
                });
            }
            if kind == TyKind::Array {
                let element = match element_raw {
                    Some(raw) => normalize(&raw, registry)?,
                    // An explicit array without `data` accepts any element.
                    None => normalize(&serde_json::json!({"$type": "any"}), registry)?,
                };
                node.element = Some(Box::new(element));
            }
        }
    }

    handler.post_normalize(&mut node)?;
    if kind == TyKind::Object {
        for (_, rule) in registry.rules() {
            rule.apply(&mut node)?;
        }
    }
    Ok(node)
}

fn bool_attr(map: &Map<String, Value>, key: &str, type_name: &str) -> Result<bool, SchemaError> {
    match map.get(key) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(SchemaError::InvalidAttribute {
            type_name: type_name.to_string(),
            attr: key.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Parse one structural attribute into the node's typed constraints. Every
/// attribute is also retained verbatim for custom handlers and rules.
fn apply_attr(node: &mut SchemaNode, key: &str, value: &Value) -> Result<(), SchemaError> {
    fn bad(node: &SchemaNode, key: &str, reason: &str) -> SchemaError {
        SchemaError::InvalidAttribute {
            type_name: node.type_name.clone(),
            attr: key.to_string(),
            reason: reason.to_string(),
        }
    }
    fn number(node: &SchemaNode, key: &str, value: &Value) -> Result<f64, SchemaError> {
        value.as_f64().ok_or_else(|| bad(node, key, "expected a number"))
    }
    fn size(node: &SchemaNode, key: &str, value: &Value) -> Result<usize, SchemaError> {
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| bad(node, key, "expected a non-negative integer"))
    }
    fn text(node: &SchemaNode, key: &str, value: &Value) -> Result<String, SchemaError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| bad(node, key, "expected a string"))
    }
    fn boolean(node: &SchemaNode, key: &str, value: &Value) -> Result<bool, SchemaError> {
        value.as_bool().ok_or_else(|| bad(node, key, "expected a boolean"))
    }

    match key {
        "$nullable" => {
            let flag = boolean(node, key, value)?;
            node.nullable = node.nullable || flag;
        }
        "$optional" => {
            let flag = boolean(node, key, value)?;
            node.optional = node.optional || flag;
        }
        "$min" => node.constraints.min = Some(number(node, key, value)?),
        "$max" => node.constraints.max = Some(number(node, key, value)?),
        "$gt" => node.constraints.gt = Some(number(node, key, value)?),
        "$lt" => node.constraints.lt = Some(number(node, key, value)?),
        "$divBy" => {
            let d = number(node, key, value)?;
            if d == 0.0 {
                return Err(bad(node, key, "divisor must be non-zero"));
            }
            node.constraints.div_by = Some(d);
        }
        "$length" => node.constraints.length = Some(size(node, key, value)?),
        "$minLength" => node.constraints.min_length = Some(size(node, key, value)?),
        "$maxLength" => node.constraints.max_length = Some(size(node, key, value)?),
        "$regex" => node.constraints.pattern = Some(text(node, key, value)?),
        "$code" => node.constraints.code = Some(text(node, key, value)?),
        "$format" => node.constraints.format = Some(text(node, key, value)?),
        "$leapYear" => node.constraints.leap_year = boolean(node, key, value)?,
        "$leapSecond" => node.constraints.leap_second = boolean(node, key, value)?,
        "$names" => node.constraints.allow_names = boolean(node, key, value)?,
        "$extraNames" => match value {
            Value::Object(table) => {
                node.constraints.extra_names = table.keys().cloned().collect();
            }
            Value::Array(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => names.push(s.to_string()),
                        None => return Err(bad(node, key, "expected color names")),
                    }
                }
                node.constraints.extra_names = names;
            }
            _ => return Err(bad(node, key, "expected a name table")),
        },
        "$separator" => {
            let s = text(node, key, value)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => node.constraints.separator = c,
                _ => return Err(bad(node, key, "expected a single character")),
            }
        }
        // Unknown structural attributes are retained for custom handlers.
        _ => {}
    }
    node.attrs.insert(key.to_string(), value.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norm(raw: Value) -> Result<SchemaNode, SchemaError> {
        normalize(&raw, &Registry::base())
    }

    #[test]
    fn optional_marker_sets_both_flags() {
        let node = norm(json!({"$type": "int?"})).unwrap();
        assert_eq!(node.type_name, "int");
        assert!(node.nullable);
        assert!(node.optional);

        let plain = norm(json!({"$type": "int"})).unwrap();
        assert!(!plain.nullable);
        assert!(!plain.optional);
    }

    #[test]
    fn doubled_optional_marker_is_malformed() {
        assert!(matches!(
            norm(json!({"$type": "int??"})).unwrap_err(),
            SchemaError::MalformedType(t) if t == "int??"
        ));
    }

    #[test]
    fn array_marker_moves_the_definition_onto_the_element() {
        let node = norm(json!({"$type": "int[]", "$min": 0})).unwrap();
        assert_eq!(node.type_name, "array");
        let element = node.element.as_deref().unwrap();
        assert_eq!(element.type_name, "int");
        assert_eq!(element.constraints.min, Some(0.0));

        // Nullability of the element travels inside the marker.
        let node = norm(json!({"$type": "string?[]"})).unwrap();
        assert!(!node.nullable);
        assert!(node.element.as_deref().unwrap().nullable);

        // A trailing `?` belongs to the array itself.
        let node = norm(json!({"$type": "string[]?"})).unwrap();
        assert!(node.nullable);
        assert!(!node.element.as_deref().unwrap().nullable);
    }

    #[test]
    fn explicit_array_takes_its_element_from_data() {
        let node = norm(json!({
            "$type": "array",
            "$minLength": 2,
            "data": {"$type": "bool"}
        }))
        .unwrap();
        assert_eq!(node.constraints.min_length, Some(2));
        assert_eq!(node.element.as_deref().unwrap().type_name, "bool");

        let bare = norm(json!({"$type": "array"})).unwrap();
        assert_eq!(bare.element.as_deref().unwrap().type_name, "any");
    }

    #[test]
    fn unknown_type_fails_normalization() {
        assert!(matches!(
            norm(json!({"$type": "quaternion"})).unwrap_err(),
            SchemaError::UnknownType(t) if t == "quaternion"
        ));
    }

    #[test]
    fn nested_fields_on_scalar_types_are_unsupported() {
        let err = norm(json!({"$type": "int", "wat": {"$type": "int"}})).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnsupportedField { type_name, field }
                if type_name == "int" && field == "wat"
        ));
    }

    #[test]
    fn reserved_prefix_fields_need_escaping() {
        let node = norm(json!({
            "$type": "object",
            "$$type": {"$type": "string"},
            "$fields": {
                "$weird": {"$type": "bool"}
            },
            "plain": {"$type": "int"}
        }))
        .unwrap();
        let names: Vec<&str> = node.fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["$type", "$weird", "plain"]);
    }

    #[test]
    fn object_fields_keep_declaration_order() {
        let node = norm(json!({
            "$type": "object",
            "zulu": {"$type": "int"},
            "alpha": {"$type": "int"},
            "mike": {"$type": "int"}
        }))
        .unwrap();
        let names: Vec<&str> = node.fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zulu", "alpha", "mike"]);
    }

    #[test]
    fn non_object_nodes_are_malformed() {
        assert!(norm(json!("int")).is_err());
        assert!(norm(json!({"$type": 7})).is_err());
        assert!(norm(json!({})).is_err());
        assert!(norm(json!({"$type": "[]"})).is_err());
        assert!(norm(json!({"$type": "?"})).is_err());
    }

    #[test]
    fn bad_attribute_payloads_are_authoring_errors() {
        assert!(norm(json!({"$type": "int", "$min": "zero"})).is_err());
        assert!(norm(json!({"$type": "int", "$divBy": 0})).is_err());
        assert!(norm(json!({"$type": "string", "$minLength": -1})).is_err());
        assert!(norm(json!({"$type": "mac", "$separator": "--"})).is_err());
    }
}
