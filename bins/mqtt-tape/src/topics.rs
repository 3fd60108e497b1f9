//! Topic list file: `{"topics": ["sensors/#", "alarms/+/raised"]}`.

use std::path::Path;

use serde::Deserialize;

use crate::error::CliError;

#[derive(Deserialize)]
struct TopicFile {
    topics: Vec<String>,
}

/// Read the subscription filters, in file order.
pub fn load_topics(path: &Path) -> Result<Vec<String>, CliError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CliError::config("topics", format!("'{}': {e}", path.display())))?;
    let file: TopicFile = serde_json::from_str(&content)
        .map_err(|e| CliError::config("topics", format!("'{}': {e}", path.display())))?;
    Ok(file.topics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topics.json");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn keeps_file_order() {
        let (_dir, path) = write(r#"{"topics": ["z/#", "a/b", "m/+/n"], "comment": "ignored"}"#);
        assert_eq!(load_topics(&path).unwrap(), vec!["z/#", "a/b", "m/+/n"]);
    }

    #[test]
    fn empty_list_is_allowed() {
        let (_dir, path) = write(r#"{"topics": []}"#);
        assert!(load_topics(&path).unwrap().is_empty());
    }

    #[test]
    fn missing_key_is_config_error() {
        let (_dir, path) = write(r#"{"filters": ["a"]}"#);
        assert!(matches!(load_topics(&path), Err(CliError::Config { context: "topics", .. })));
    }

    #[test]
    fn bad_json_is_config_error() {
        let (_dir, path) = write("{topics: [");
        assert!(load_topics(&path).is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_topics(&dir.path().join("absent.json")),
            Err(CliError::Config { .. })
        ));
    }
}
