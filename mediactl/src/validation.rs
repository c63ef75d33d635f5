//! Per-field validation errors and the file acceptance rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Form field names as reported in validation errors
pub mod fields {
    pub const SRC: &str = "src";
    pub const LINK_TEXT: &str = "link_text";
}

/// Validation messages keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn clear_field(&mut self, field: &str) {
        self.0.remove(field);
    }
}

/// Whether `mime` is allowed by the accepted type list.
///
/// Entries match exactly (case-insensitive) or by `type/*` wildcard; `*/*` and an empty
/// list accept everything.
pub fn mime_accepted(accepted: &[String], mime: &str) -> bool {
    accepted.is_empty() || accepted.iter().any(|pattern| mime_matches(pattern, mime))
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    let mime = mime.trim().to_ascii_lowercase();
    // Ignore parameters such as "; charset=utf-8"
    let mime = mime.split(';').next().unwrap_or_default().trim();

    match pattern.strip_suffix("/*") {
        Some("*") => true,
        Some(prefix) => mime.split_once('/').is_some_and(|(top, _)| top == prefix),
        None => pattern == mime,
    }
}

/// Collect the file-level errors (type and size) for a staged file
pub fn check_file(errors: &mut FieldErrors, accepted: &[String], max_file_size_kb: u64, mime: &str, size: Option<u64>) {
    if !mime_accepted(accepted, mime) {
        errors.add(
            fields::SRC,
            format!("The file must be a file of type: {}.", accepted.join(", ")),
        );
    }
    if let Some(size) = size
        && size > max_file_size_kb.saturating_mul(1024)
    {
        errors.add(
            fields::SRC,
            format!("The file may not be greater than {max_file_size_kb} kilobytes."),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mime_accepted() {
        let accepted = types(&["image/*", "application/pdf"]);

        assert!(mime_accepted(&accepted, "image/png"));
        assert!(mime_accepted(&accepted, "IMAGE/JPEG"));
        assert!(mime_accepted(&accepted, "application/pdf"));
        assert!(!mime_accepted(&accepted, "application/zip"));
        assert!(!mime_accepted(&accepted, "imagery/png"));

        assert!(mime_accepted(&[], "anything/at-all"));
        assert!(mime_accepted(&types(&["*/*"]), "video/mp4"));
        assert!(mime_accepted(&types(&["text/plain"]), "text/plain; charset=utf-8"));
    }

    #[test]
    fn test_check_file_type_and_size() {
        let accepted = types(&["image/png"]);

        let mut errors = FieldErrors::new();
        check_file(&mut errors, &accepted, 1, "image/png", Some(1024));
        assert!(errors.is_empty());

        check_file(&mut errors, &accepted, 1, "application/pdf", Some(1025));
        assert_eq!(errors.get(fields::SRC).len(), 2);
        assert!(errors.get(fields::SRC)[0].contains("image/png"));
        assert!(errors.get(fields::SRC)[1].contains("1 kilobytes"));
    }

    #[test]
    fn test_field_errors_serialize_flat() {
        let mut errors = FieldErrors::new();
        errors.add(fields::LINK_TEXT, "The link text field is required.");

        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json, serde_json::json!({ "link_text": ["The link text field is required."] }));

        errors.clear_field(fields::LINK_TEXT);
        assert!(errors.is_empty());
    }
}
