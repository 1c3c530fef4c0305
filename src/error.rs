use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryChakraError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Local runtime down, or the requested model is not loaded.
    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// Hosted credential missing or rejected.
    #[error("{0}")]
    ProviderUnauthorized(String),

    /// Network failure, timeout or malformed provider response.
    #[error("provider transport error: {0}")]
    ProviderTransport(String),

    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    #[error("query execution error: {0}")]
    QueryExecution(String),
}

pub type Result<T> = std::result::Result<T, QueryChakraError>;
