use thiserror::Error;

/// Why a fetch stopped before reaching its target.
///
/// None of these are fatal: the records collected before the failure are
/// still handed back alongside the error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("API request failed: {0}")]
    Status(u16),

    #[error("API still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("API request could not be sent: {0}")]
    Transport(String),

    #[error("API response could not be decoded: {0}")]
    Decode(String),
}

/// Failure surfaced verbatim at the query boundary.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Could not open database {path}: {message}")]
    Open { path: String, message: String },

    #[error("{0}")]
    Sql(#[from] rusqlite::Error),

    #[error("No SQL statement given")]
    Empty,

    #[error("Only one SQL statement can be run at a time")]
    MultipleStatements,

    #[error("Unknown query '{0}'")]
    UnknownQuery(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API key found. Pass --api-key, set HARVARD_API_KEY, or add it to .env")]
    MissingApiKey,

    #[error("API key was rejected by the catalog endpoint")]
    InvalidApiKey,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}
