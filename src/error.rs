use thiserror::Error;

/// Error kinds for a generator run. Propagation rules: `Config` aborts before
/// any introspection, `Connectivity` aborts the run after the pool is
/// drained, `Schema` is table-local (log and skip), `RelationshipAnalysis`
/// never fails a run, `CodeGeneration` wraps emitter failures.
#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported provider: '{0}'")]
    UnsupportedProvider(String),

    #[error("pool exhausted: all {max} connections are in use")]
    PoolExhausted { max: usize },

    #[error("connectivity error: {message}")]
    Connectivity { message: String },

    #[error("schema error in table '{table}': {message}")]
    Schema { table: String, message: String },

    #[error("schema invariant violated: {0}")]
    SchemaInvariant(String),

    #[error("relationship analysis failed for '{from_table}' -> '{target}': {message}")]
    RelationshipAnalysis {
        from_table: String,
        target: String,
        message: String,
    },

    #[error("code generation failed: {message}")]
    CodeGeneration { message: String },
}

impl CodeGenError {
    pub fn config(message: impl Into<String>) -> Self {
        CodeGenError::Config(message.into())
    }

    pub fn connectivity(message: impl std::fmt::Display) -> Self {
        CodeGenError::Connectivity {
            message: message.to_string(),
        }
    }

    pub fn schema(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CodeGenError::Schema {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn schema_invariant(message: impl Into<String>) -> Self {
        CodeGenError::SchemaInvariant(message.into())
    }

    pub fn analysis(
        source: impl Into<String>,
        target: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        CodeGenError::RelationshipAnalysis {
            from_table: source.into(),
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn emit(message: impl std::fmt::Display) -> Self {
        CodeGenError::CodeGeneration {
            message: message.to_string(),
        }
    }

    /// True for errors that abort the whole run (as opposed to table-local
    /// schema faults).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CodeGenError::Schema { .. }
                | CodeGenError::SchemaInvariant(_)
                | CodeGenError::RelationshipAnalysis { .. }
        )
    }
}

impl From<sqlx::Error> for CodeGenError {
    fn from(e: sqlx::Error) -> Self {
        CodeGenError::connectivity(e)
    }
}

impl From<tiberius::error::Error> for CodeGenError {
    fn from(e: tiberius::error::Error) -> Self {
        CodeGenError::connectivity(e)
    }
}
