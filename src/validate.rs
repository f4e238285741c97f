//! Field checks shared by ticket and account input.

use crate::error::{DeskError, FieldError};

pub const TITLE_MAX_CHARS: usize = 255;
pub const NAME_MAX_CHARS: usize = 100;
pub const PASSWORD_MIN_CHARS: usize = 8;

/// Collects field errors so every problem is reported in one go.
#[derive(Debug, Default)]
pub struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    pub fn required(&mut self, field: &'static str, value: &str) {
        if value.trim().is_empty() {
            self.fail(field, "must not be empty");
        }
    }

    pub fn max_chars(&mut self, field: &'static str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.fail(field, format!("must be at most {} characters", max));
        }
    }

    /// Empty is allowed; anything else must look like an address.
    pub fn email(&mut self, field: &'static str, value: &str) {
        if !value.is_empty() && !looks_like_email(value) {
            self.fail(field, "must be a valid email address");
        }
    }

    pub fn hex_color(&mut self, field: &'static str, value: &str) {
        let ok = value.len() == 7
            && value.starts_with('#')
            && value[1..].bytes().all(|b| b.is_ascii_hexdigit());
        if !ok {
            self.fail(field, "must be a hex colour like #3B82F6");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok` when nothing failed, otherwise a [`DeskError::Validation`].
    pub fn finish(self) -> Result<(), DeskError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(DeskError::Validation(self.errors))
        }
    }
}

pub fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
        && !domain.contains('@')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_all_failures() {
        let mut check = Checker::new();
        check.required("title", "   ");
        check.required("description", "");
        check.email("contact_email", "nope");
        let err = check.finish().unwrap_err();
        let fields: Vec<_> = err.fields().iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["title", "description", "contact_email"]);
    }

    #[test]
    fn test_max_chars_counts_characters_not_bytes() {
        let mut check = Checker::new();
        check.max_chars("title", &"é".repeat(255), TITLE_MAX_CHARS);
        assert!(check.is_empty());
        check.max_chars("title", &"é".repeat(256), TITLE_MAX_CHARS);
        assert!(!check.is_empty());
    }

    #[test]
    fn test_email_shapes() {
        assert!(looks_like_email("ops@example.com"));
        assert!(!looks_like_email("ops@example"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("ops example@example.com"));
        assert!(!looks_like_email("a@b@c.com"));
    }

    #[test]
    fn test_hex_color() {
        let mut check = Checker::new();
        check.hex_color("color", "#3B82F6");
        assert!(check.is_empty());
        check.hex_color("color", "3B82F6");
        check.hex_color("color", "#GGGGGG");
        assert_eq!(check.finish().unwrap_err().fields().len(), 2);
    }
}
