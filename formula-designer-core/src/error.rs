use thiserror::Error;

/// Failure to translate a single formula.
///
/// None of these abort a run: the entity generator turns them into an inert
/// accessor and carries on with the rest of the schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("{name} expects {} args, got {got}", arity_text(.min, .max))]
    ArityMismatch {
        name: String,
        min: usize,
        max: usize,
        got: usize,
    },

    #[error("malformed keyword argument in {name}: {detail}")]
    MalformedKeywordArgument { name: String, detail: String },

    #[error("malformed {name} clause: {detail}")]
    MalformedAggregationClause { name: String, detail: String },

    #[error("unsupported multi-dot reference '{0}': only one level of sub-field projection is supported")]
    UnsupportedMultiDotReference(String),

    #[error("unsupported join condition '{0}': expected this.<collection>.<field>")]
    UnsupportedJoinCondition(String),

    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },
}

impl FormulaError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        FormulaError::Syntax {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn clause(name: &str, detail: impl Into<String>) -> Self {
        FormulaError::MalformedAggregationClause {
            name: name.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn keyword(name: &str, detail: impl Into<String>) -> Self {
        FormulaError::MalformedKeywordArgument {
            name: name.to_string(),
            detail: detail.into(),
        }
    }
}

fn arity_text(min: &usize, max: &usize) -> String {
    if min == max {
        min.to_string()
    } else if *max == usize::MAX {
        format!("at least {}", min)
    } else {
        format!("{}..{}", min, max)
    }
}

pub type FormulaResult<T> = Result<T, FormulaError>;

/// Failure to load or validate a schema document. Fatal for the run.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("invalid schema document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid identifier '{name}' for {what}")]
    InvalidIdentifier { what: String, name: String },

    #[error("duplicate member '{member}' in entity {entity}")]
    DuplicateMember { entity: String, member: String },

    #[error("duplicate entity '{0}'")]
    DuplicateEntity(String),
}

/// Failure to load a generator configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}
