use std::path::PathBuf;

/// Failure kinds surfaced by the store, the wallet generator and the controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("permission denied creating wallet directory {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("wallet directory {} unavailable: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist {}: {source}", path.display())]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key material: {0}")]
    CryptoFailure(String),

    #[error("resource store unavailable: {0}")]
    CollaboratorUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound { kind, name: name.into() }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Error::AlreadyExists { kind, name: name.into() }
    }

    pub fn unavailable(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::CollaboratorUnavailable(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}

/// Extension for the two benign outcomes of idempotent mutations.
pub trait Benign<T> {
    /// `Ok(None)` when the target already existed.
    fn tolerate_exists(self) -> Result<Option<T>>;
    /// `Ok(None)` when the target was already gone.
    fn tolerate_missing(self) -> Result<Option<T>>;
}

impl<T> Benign<T> for Result<T> {
    fn tolerate_exists(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_already_exists() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn tolerate_missing(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_outcomes_are_swallowed_others_kept() {
        let exists: Result<()> = Err(Error::already_exists("Pod", "a"));
        assert!(matches!(exists.tolerate_exists(), Ok(None)));

        let gone: Result<()> = Err(Error::not_found("Pod", "a"));
        assert!(matches!(gone.tolerate_missing(), Ok(None)));

        let gone: Result<()> = Err(Error::not_found("Pod", "a"));
        assert!(gone.tolerate_exists().is_err());

        let down: Result<()> = Err(Error::unavailable("connection refused"));
        assert!(down.tolerate_missing().is_err());
    }
}
