use once_cell::sync::Lazy;
use regex::Regex;

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]{3,32}$").expect("username pattern compiles"));

/// Channel usernames: lowercase alphanumerics and underscores, 3-32 chars.
pub fn is_valid_username(username: &str) -> bool {
    USERNAME_PATTERN.is_match(username)
}

pub fn is_valid_user_id(user_id: &str) -> bool {
    let trimmed = user_id.trim();
    !trimmed.is_empty() && trimmed.len() <= 128
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("janedoe", true)]
    #[test_case("jane_doe_42", true)]
    #[test_case("ab", false ; "too short")]
    #[test_case("JaneDoe", false ; "uppercase")]
    #[test_case("jane doe", false ; "whitespace")]
    #[test_case("", false ; "empty")]
    fn username_validation(username: &str, expected: bool) {
        assert_eq!(is_valid_username(username), expected);
    }

    #[test]
    fn user_id_rejects_blank_and_oversized() {
        assert!(is_valid_user_id("u1"));
        assert!(!is_valid_user_id("   "));
        assert!(!is_valid_user_id(&"x".repeat(200)));
    }
}
