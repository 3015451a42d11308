//! Schema-name validation shared by every store crate (§6: "every component
//! accepts a schema name; all object references are schema-qualified").
//! Schema names are interpolated directly into SQL (Postgres does not accept
//! them as bind parameters), so they are validated up front rather than
//! escaped.

use crate::{Error, Result};

const MAX_SCHEMA_NAME_BYTES: usize = 63; // Postgres identifier limit.

pub fn validate_schema_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_SCHEMA_NAME_BYTES {
        return Err(Error::invalid_argument(format!(
            "schema name must be 1..={MAX_SCHEMA_NAME_BYTES} bytes, got {} bytes",
            name.len()
        )));
    }

    let mut chars = name.chars();
    let first = chars.next().expect("non-empty checked above");
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(Error::invalid_argument(
            "schema name must start with an ASCII letter or underscore",
        ));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::invalid_argument(
            "schema name must contain only ASCII letters, digits, and underscores",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_schema_name("relay_outbox").is_ok());
        assert!(validate_schema_name("_private").is_ok());
    }

    #[test]
    fn rejects_empty_and_unsafe_names() {
        assert!(validate_schema_name("").is_err());
        assert!(validate_schema_name("1leading_digit").is_err());
        assert!(validate_schema_name("has space").is_err());
        assert!(validate_schema_name("drop\"; --").is_err());
        assert!(validate_schema_name(&"x".repeat(64)).is_err());
    }
}
