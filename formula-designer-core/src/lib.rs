pub mod error;
pub mod models;

// Formula compiler
pub mod lexer;
pub mod splitter;
pub mod signatures;
pub mod context;
pub mod parser;
pub mod aggregation;
pub mod conditional;
pub mod subfield;

// Code generation
pub mod config;
pub mod codegen;
pub mod generator;

pub use codegen::{generate_entity, EntityOutput, FormulaFailure};
pub use conditional::has_conditional;
pub use config::GeneratorConfig;
pub use context::{CodeFragment, CompilerContext};
pub use error::{ConfigError, FormulaError, FormulaResult, SchemaError};
pub use generator::{generate_module, GeneratedModule};
pub use models::{AggregationDef, EntitySchema, FieldDef, FieldKind, LookupDef, RelationKind, Rulebook};
pub use parser::parse_formula;
pub use signatures::FunctionSignature;
