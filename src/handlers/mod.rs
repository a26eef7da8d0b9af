//! HTTP handlers, grouped by resource. Each handler carries a
//! `#[utoipa::path]` annotation collected by `ApiDoc` in `lib.rs`.

pub mod api_keys;
pub mod auth;
pub mod comments;
pub mod health;
pub mod media;
pub mod posts;
pub mod security;
pub mod settings;
pub mod users;
pub mod webhooks;

use crate::error::AppError;

/// Trims `value` and checks it is non-empty and at most `max` characters.
pub(crate) fn required_text(value: &str, field: &str, max: usize) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", field)));
    }
    if trimmed.chars().count() > max {
        return Err(AppError::BadRequest(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::BadRequest("A valid email is required".to_string())),
    }
}

/// Splits a comma separated query value into trimmed, non-empty items.
pub(crate) fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_bounds() {
        assert_eq!(required_text("  hi ", "Title", 5).unwrap(), "hi");
        assert!(required_text("   ", "Title", 5).is_err());
        assert!(required_text("toolong", "Title", 5).is_err());
    }

    #[test]
    fn emails_are_lowercased() {
        assert_eq!(normalize_email(" Bob@Example.COM ").unwrap(), "bob@example.com");
        assert!(normalize_email("bob").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("bob@localhost").is_err());
    }

    #[test]
    fn split_list_skips_blanks() {
        assert_eq!(split_list(Some("rust, ,web,")), vec!["rust", "web"]);
        assert!(split_list(None).is_empty());
    }
}
