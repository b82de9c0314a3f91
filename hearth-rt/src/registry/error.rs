//! Error types for registry operations.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Errors raised by the local name registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The name is already bound to a live actor.
    #[error("name already registered: {name}")]
    AlreadyRegistered { name: String },

    /// No actor is bound to the name.
    #[error("name not registered: {name}")]
    NotRegistered { name: String },
}

impl RegistryError {
    /// Returns `true` if this error indicates a missing binding.
    pub fn is_not_registered(&self) -> bool {
        matches!(self, RegistryError::NotRegistered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_contains_name() {
        let err = RegistryError::AlreadyRegistered {
            name: "api".into(),
        };
        assert!(err.to_string().contains("api"));
        assert!(!err.is_not_registered());

        let err = RegistryError::NotRegistered { name: "db".into() };
        assert!(err.is_not_registered());
    }
}
