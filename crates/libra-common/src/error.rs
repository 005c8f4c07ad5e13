//! Error types shared across Libra crates

use thiserror::Error;

/// Main error type for Libra
#[derive(Error, Debug)]
pub enum LibraError {
    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_message() {
        let err = LibraError::Parse("Unknown entity type: shelf".to_string());
        assert_eq!(err.to_string(), "Parse error: Unknown entity type: shelf");
    }
}
