use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::memory::AccessFault;

/// Entity family a lookup was made against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum EntityKind {
    Character,
    Squad,
    Faction,
    Building,
    World,
    Item,
    Player,
    Animation,
    Intercept,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Access(#[from] AccessFault),

    #[error("No offset source could be validated: {0}")]
    ResolutionFailure(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Offset cache is stale: {0}")]
    StaleCache(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid offset document: {0}")]
    InvalidDocument(String),

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Native function {0} is not resolved")]
    Unresolved(&'static str),

    #[error("Intercept {0} is already installed")]
    InterceptExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Check if this error is an entity that no longer exists, or a missing file
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_access_fault(&self) -> bool {
        matches!(self, Error::Access(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FaultKind;

    #[test]
    fn test_error_is_not_found() {
        let err = Error::not_found(EntityKind::Character, 42);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Character not found: 42");

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        assert!(Error::Io(io_err).is_not_found());

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!Error::Io(other).is_not_found());
    }

    #[test]
    fn test_access_fault_lifts_into_error() {
        fn touch() -> Result<u32> {
            Err(AccessFault::new(0x1000, 4, FaultKind::Unmapped))?
        }

        let err = touch().unwrap_err();
        assert!(err.is_access_fault());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("0x1000"));
    }
}
