//! Schema-compiled JSON validation.
//!
//! A declarative, JSON-shaped schema description compiles once into an
//! executable validator and then checks arbitrary `serde_json::Value` input
//! many times cheaply, reporting structured errors with exact field paths.
//!
//! ```
//! use serde_json::json;
//! use json_vet::Schema;
//!
//! let schema = Schema::compile(&json!({
//!     "$type": "object",
//!     "name": {"$type": "string", "$minLength": 1},
//!     "port": {"$type": "uint16?"}
//! })).unwrap();
//!
//! let out = schema.validate(&json!({"name": "gateway", "port": 8080})).unwrap();
//! assert_eq!(out, json!({"name": "gateway", "port": 8080}));
//!
//! let err = schema.validate(&json!({"name": "", "port": 8080})).unwrap_err();
//! assert_eq!(err.violations()[0].path, "name");
//! ```

pub mod cli;
pub mod compile;
pub mod date;
pub mod emit;
pub mod error;
pub mod matchers;
pub mod norm;
pub mod ops;
pub mod options;
pub mod registry;
pub mod run;
pub mod schema;

pub use error::{EmitError, ErrorCode, SchemaError, ValidateError, Violation};
pub use options::Options;
pub use registry::{Registry, RegistryBuilder, RuleHook, TyKind, TypeHandler};
pub use schema::{Constraints, Schema, SchemaNode};
