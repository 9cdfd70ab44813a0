//! Error surface: schema-authoring failures, compiler defects, and the
//! structured violations produced by compiled validators.
//!
//! Authoring and compiler errors are always fatal; violations follow the
//! error policy the validator was compiled with (fail-fast, collect, or
//! predicate).

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

// ————————————————————————————————————————————————————————————————————————————
// VALIDATION FAILURE CODES
// ————————————————————————————————————————————————————————————————————————————

/// Symbolic reason attached to every violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    RequiredField,
    InvalidProperty,
    BoolCheckFailure,
    IntCheckFailure,
    DoubleCheckFailure,
    OutOfRange,
    InvalidLength,
    StringCheckFailure,
    DateCheckFailure,
    ColorCheckFailure,
    MacCheckFailure,
    Ipv4CheckFailure,
    Ipv6CheckFailure,
    DivByFailure,
    RegExpFailure,
    EnumCheckFailure,
    ObjectCheckFailure,
    ArrayCheckFailure,
    /// Schema-supplied replacement code (`$code` on a `$regex` constraint).
    Custom(Arc<str>),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::RequiredField => "RequiredField",
            ErrorCode::InvalidProperty => "InvalidProperty",
            ErrorCode::BoolCheckFailure => "BoolCheckFailure",
            ErrorCode::IntCheckFailure => "IntCheckFailure",
            ErrorCode::DoubleCheckFailure => "DoubleCheckFailure",
            ErrorCode::OutOfRange => "OutOfRange",
            ErrorCode::InvalidLength => "InvalidLength",
            ErrorCode::StringCheckFailure => "StringCheckFailure",
            ErrorCode::DateCheckFailure => "DateCheckFailure",
            ErrorCode::ColorCheckFailure => "ColorCheckFailure",
            ErrorCode::MacCheckFailure => "MACCheckFailure",
            ErrorCode::Ipv4CheckFailure => "IPV4CheckFailure",
            ErrorCode::Ipv6CheckFailure => "IPV6CheckFailure",
            ErrorCode::DivByFailure => "DivByFailure",
            ErrorCode::RegExpFailure => "RegExpFailure",
            ErrorCode::EnumCheckFailure => "EnumCheckFailure",
            ErrorCode::ObjectCheckFailure => "ObjectCheckFailure",
            ErrorCode::ArrayCheckFailure => "ArrayCheckFailure",
            ErrorCode::Custom(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.as_str())
    }
}

/// One validation failure: `{ code, path, ...extras }`.
#[derive(Clone, Debug, Serialize)]
pub struct Violation {
    pub code: ErrorCode,
    /// Dot/bracket location, e.g. `a.b[1]`. Empty at the root.
    pub path: String,
    /// Unrecognized property names, set for `InvalidProperty` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unexpected: Option<Vec<String>>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.code)?;
        } else {
            write!(f, "{} at `{}`", self.code, self.path)?;
        }
        if let Some(keys) = &self.unexpected {
            write!(f, " (unexpected: {})", keys.join(", "))?;
        }
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SCHEMA-AUTHORING ERRORS
// ————————————————————————————————————————————————————————————————————————————

/// Raised during normalization; the schema itself is invalid.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("malformed type `{0}`")]
    MalformedType(String),

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("field `{field}` is not supported on type `{type_name}`")]
    UnsupportedField { type_name: String, field: String },

    #[error("malformed date format `{format}`: {reason}")]
    MalformedFormat { format: String, reason: String },

    #[error("invalid attribute `{attr}` on type `{type_name}`: {reason}")]
    InvalidAttribute {
        type_name: String,
        attr: String,
        reason: String,
    },
}

// ————————————————————————————————————————————————————————————————————————————
// COMPILER DEFECTS
// ————————————————————————————————————————————————————————————————————————————

/// Internal compiler invariants. Any of these indicates a defect in a type
/// handler, never bad input data.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EmitError {
    #[error("conflicting declaration of `{name}`")]
    ConflictingDeclaration { name: String },

    #[error("code generation failed: {reason}\n--- assembled program ---\n{listing}")]
    CodeGenerationFailure { reason: String, listing: String },
}

impl EmitError {
    pub fn codegen(reason: impl Into<String>, listing: impl Into<String>) -> Self {
        EmitError::CodeGenerationFailure {
            reason: reason.into(),
            listing: listing.into(),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// VALIDATION OUTCOME
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    /// Fail-fast mode: the first violation encountered.
    #[error("{0}")]
    Invalid(Violation),

    /// Accumulate mode: every violation, in discovery order.
    #[error("{} validation failure(s)", .0.len())]
    Batch(Vec<Violation>),

    /// First-use compilation of this (schema, options) pair failed.
    #[error(transparent)]
    Compile(#[from] EmitError),
}

impl ValidateError {
    /// All violations carried by this error, regardless of policy.
    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidateError::Invalid(v) => std::slice::from_ref(v),
            ValidateError::Batch(vs) => vs,
            ValidateError::Compile(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_their_wire_names() {
        assert_eq!(ErrorCode::MacCheckFailure.to_string(), "MACCheckFailure");
        assert_eq!(ErrorCode::Ipv4CheckFailure.to_string(), "IPV4CheckFailure");
        assert_eq!(ErrorCode::Custom("TooWeird".into()).to_string(), "TooWeird");
    }

    #[test]
    fn violation_serializes_flat() {
        let v = Violation {
            code: ErrorCode::InvalidProperty,
            path: "cfg".into(),
            unexpected: Some(vec!["y".into()]),
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["code"], "InvalidProperty");
        assert_eq!(json["path"], "cfg");
        assert_eq!(json["unexpected"][0], "y");

        let bare = Violation {
            code: ErrorCode::OutOfRange,
            path: "n".into(),
            unexpected: None,
        };
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("unexpected").is_none(), "None extras stay off the wire");
    }
}
