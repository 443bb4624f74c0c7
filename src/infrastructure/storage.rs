use crate::domain::error::{AppError, Result};
use crate::domain::example::Example;
use std::fs;
use std::path::Path;
use tracing::info;

/// Read the example bank. Any unreadable file, malformed JSON or record
/// missing a field is a fatal configuration error.
pub fn load_examples(path: &Path) -> Result<Vec<Example>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read examples file {}: {}",
            path.display(),
            e
        ))
    })?;
    let examples: Vec<Example> = serde_json::from_str(&raw).map_err(|e| {
        AppError::Config(format!(
            "Malformed examples file {}: {}",
            path.display(),
            e
        ))
    })?;
    info!(path = %path.display(), count = examples.len(), "Loaded example bank");
    Ok(examples)
}

pub fn load_template(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read template {}: {}",
            path.display(),
            e
        ))
    })?;
    if text.trim().is_empty() {
        return Err(AppError::Config(format!(
            "Template {} is empty",
            path.display()
        )));
    }
    Ok(text)
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_examples_accepts_both_key_styles() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
  {{"Question": "How many customers?", "SQLQuery": "SELECT COUNT(*) FROM customers", "SQLResult": "42"}},
  {{"input": "List products", "query": "SELECT * FROM products", "result": "[]"}}
]"#
        )
        .unwrap();

        let examples = load_examples(file.path()).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].sql_result, "42");
        assert_eq!(examples[1].question, "List products");
    }

    #[test]
    fn test_load_examples_missing_field_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"question": "How many customers?"}}]"#).unwrap();
        assert!(matches!(load_examples(file.path()), Err(AppError::Config(_))));
    }

    #[test]
    fn test_load_template_rejects_missing_and_empty() {
        assert!(matches!(
            load_template(Path::new("/no/such/template.txt")),
            Err(AppError::Config(_))
        ));
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(load_template(file.path()), Err(AppError::Config(_))));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("askdb");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
