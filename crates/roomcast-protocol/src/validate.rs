//! Validation rules for usernames, room names, and message content.
//!
//! Callers trim their input first; these checks assume trimmed strings.
//! Length limits are configuration-owned and passed in by the caller.

/// Validate a display name.
///
/// # Errors
///
/// Returns an error message if the name is empty, too long, or contains
/// control characters.
pub fn validate_username(name: &str, max_length: usize) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Username and room are required");
    }
    if name.chars().count() > max_length {
        return Err("Username is too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Username contains invalid characters");
    }
    Ok(())
}

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the name is empty, too long, or contains
/// control characters.
pub fn validate_room(name: &str, max_length: usize) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Username and room are required");
    }
    if name.chars().count() > max_length {
        return Err("Room name is too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// Validate message content.
///
/// # Errors
///
/// Returns an error message if the content is empty or too long.
pub fn validate_content(content: &str, max_length: usize) -> Result<(), &'static str> {
    if content.is_empty() {
        return Err("Message content is required");
    }
    if content.chars().count() > max_length {
        return Err("Message is too long");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice", 50).is_ok());
        assert!(validate_username("", 50).is_err());
        assert!(validate_username("a\nb", 50).is_err());

        let long = "a".repeat(51);
        assert!(validate_username(&long, 50).is_err());
        assert!(validate_username(&long, 51).is_ok());
    }

    #[test]
    fn test_validate_room() {
        assert!(validate_room("lobby", 100).is_ok());
        assert!(validate_room("general chat", 100).is_ok());
        assert!(validate_room("", 100).is_err());
        assert!(validate_room("a\tb", 100).is_err());
    }

    #[test]
    fn test_validate_content() {
        assert!(validate_content("hello", 2000).is_ok());
        assert!(validate_content("", 2000).is_err());

        let long = "x".repeat(2001);
        assert!(validate_content(&long, 2000).is_err());
    }

    #[test]
    fn test_limits_count_chars_not_bytes() {
        // Multibyte characters count once.
        let name = "é".repeat(50);
        assert!(validate_username(&name, 50).is_ok());
    }
}
