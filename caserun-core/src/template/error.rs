pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The raw expression is carried along so the caller can decide to
    /// keep it unresolved instead of failing the step.
    #[error("variable `{name}` not found while resolving `{raw}`")]
    VariableNotFound { name: String, raw: String },

    #[error("function `{name}` not found")]
    FunctionNotFound { name: String },

    #[error("cannot parse function call `{raw}`: {reason}")]
    ParseFunction { raw: String, reason: String },

    #[error("function `{name}` failed")]
    CallFunction {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("variable `{name}` references itself")]
    SelfReference { name: String },

    #[error("undefined variables referenced: {}", names.join(", "))]
    UndefinedVariable { names: Vec<String> },

    #[error("circular reference in variable mapping")]
    CircularReference,
}
