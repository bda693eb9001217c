use thiserror::Error;

/// Configuration-side failures: loading, parsing, validation and merging.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing [scheduling][graph] section")]
    MissingGraph,

    #[error("undefined namespace: {0}")]
    UnknownNamespace(String),

    #[error("inheritance cycle through {0}")]
    InheritCycle(String),

    #[error("unknown config item: {0}")]
    UnknownKey(String),

    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    KindMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("invalid setting key: {0}")]
    BadKeyPath(String),
}

impl ConfigError {
    /// Short class name used when a reload failure is logged.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "ConfigError",
            ConfigError::Parse(_) => "ParseError",
            _ => "WorkflowConfigError",
        }
    }
}

/// Errors raised by the runtime mutation surface. All of these are recovered
/// where they occur; none of them abort the scheduling loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A task selector or option pattern failed to parse or match.
    #[error("{0}")]
    Selector(String),

    /// A broadcast setting does not fit the runtime config schema.
    #[error("{0}")]
    SchemaRejection(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The pool was asked for a state change it cannot legally apply.
    #[error("{0}")]
    UnsafeState(String),
}

impl EngineError {
    pub fn kind_str(&self) -> &'static str {
        match self {
            EngineError::Selector(_) => "SelectorError",
            EngineError::SchemaRejection(_) => "SchemaRejection",
            EngineError::Config(e) => e.kind_str(),
            EngineError::UnsafeState(_) => "UnsafeStateError",
        }
    }
}
