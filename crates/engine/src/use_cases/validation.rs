//! Common validation helpers for use cases.

/// Validation error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field_name} cannot be empty")]
    Empty { field_name: &'static str },

    #[error("{field_name} exceeds maximum length of {max}")]
    TooLong { field_name: &'static str, max: usize },

    #[error("{field_name} is invalid: {reason}")]
    Invalid {
        field_name: &'static str,
        reason: String,
    },
}

/// Validate a string is non-empty after trimming.
pub fn require_non_empty(value: &str, field_name: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field_name });
    }
    Ok(())
}

/// Validate a string doesn't exceed `max` characters.
pub fn require_max_length(
    value: &str,
    max: usize,
    field_name: &'static str,
) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field_name, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_counts_characters_not_bytes() {
        let accented = "é".repeat(10);
        assert!(require_max_length(&accented, 10, "name").is_ok());
        assert_eq!(
            require_max_length(&accented, 9, "name"),
            Err(ValidationError::TooLong {
                field_name: "name",
                max: 9
            })
        );
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert!(require_non_empty("  \n", "goal").is_err());
        assert!(require_non_empty(" x ", "goal").is_ok());
    }
}
