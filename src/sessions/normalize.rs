use crate::config::MAX_USERNAME_CHARS;
use crate::error::{Error, Result};

/// Canonical form of a sign-in name: trimmed and lowercased.
///
/// The result is used both as the memory partition key and as the backup
/// file stem, so it is restricted to `[a-z0-9._-]` and may not start with a
/// dot.
pub fn normalize_username(raw: &str) -> Result<String> {
    let name = raw.trim().to_lowercase();

    if name.is_empty() {
        return Err(Error::InvalidArgument("username must not be empty".to_string()));
    }
    if name.chars().count() > MAX_USERNAME_CHARS {
        return Err(Error::InvalidArgument(format!(
            "username must be at most {MAX_USERNAME_CHARS} characters"
        )));
    }
    if name.starts_with('.') {
        return Err(Error::InvalidArgument(
            "username must not start with '.'".to_string(),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::InvalidArgument(format!(
            "username contains unsupported character {bad:?}"
        )));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_lowercases() {
        assert_eq!(normalize_username("  Alice ").unwrap(), "alice");
        assert_eq!(normalize_username("Bob.Smith-2_x").unwrap(), "bob.smith-2_x");
    }

    #[test]
    fn rejects_bad_names() {
        let long = "x".repeat(41);
        for raw in ["", "   ", ".hidden", "a/b", "..", "zoë", "two words", long.as_str()] {
            assert!(
                matches!(normalize_username(raw), Err(Error::InvalidArgument(_))),
                "{raw:?} should be rejected"
            );
        }
        assert!(normalize_username(&"x".repeat(40)).is_ok());
    }
}
