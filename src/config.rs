use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable consulted for the personal access token. Takes
/// precedence over `access_token` in the config file.
pub const TOKEN_ENV_VAR: &str = "ADO_TOKEN";

fn default_base_url() -> String {
    "https://dev.azure.com/".to_string()
}

/// Connection settings and job inputs, loaded from a JSON config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub organization: String,
    pub project: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Parent/child pairs for the static link job.
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Seed items for the creation job.
    #[serde(default)]
    pub work_items: Vec<NewWorkItem>,
}

/// One parent/child link to establish.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Relation {
    pub child_id: u64,
    pub parent_id: u64,
}

/// A work item to create, optionally dated and parented.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWorkItem {
    pub title: String,
    #[serde(rename = "type")]
    pub work_item_type: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

impl Settings {
    /// Load settings from the default path (`~/.adosync/config.json`).
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path()?)
    }

    /// Load settings from the given path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut settings: Settings = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        settings.apply_token_env(std::env::var(TOKEN_ENV_VAR).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// The default config location under the user's home directory.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Ok(home.join(".adosync").join("config.json"))
    }

    fn apply_token_env(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.access_token = Some(token);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.organization.is_empty() {
            return Err(Error::Config("organization is not set".into()));
        }
        if self.project.is_empty() {
            return Err(Error::Config("project is not set".into()));
        }
        Ok(())
    }

    /// The personal access token, from the config file or `ADO_TOKEN`.
    pub fn token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "no access token configured; set access_token or the {TOKEN_ENV_VAR} environment variable"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"{
                "organization": "contoso",
                "project": "Tailwind Traders",
                "base_url": "https://dev.azure.example/",
                "access_token": "pat123",
                "relations": [{"child_id": 101, "parent_id": 42}],
                "work_items": [
                    {
                        "title": "Set up pipeline",
                        "type": "Task",
                        "start_date": "2024-01-05T00:00:00Z",
                        "parent_id": 42
                    }
                ]
            }"#,
        );
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.organization, "contoso");
        assert_eq!(settings.project, "Tailwind Traders");
        assert_eq!(settings.base_url, "https://dev.azure.example/");
        assert_eq!(settings.relations.len(), 1);
        assert_eq!(settings.relations[0].child_id, 101);
        assert_eq!(settings.relations[0].parent_id, 42);
        assert_eq!(settings.work_items.len(), 1);
        assert_eq!(settings.work_items[0].work_item_type, "Task");
        assert!(settings.work_items[0].start_date.is_some());
        assert!(settings.work_items[0].target_date.is_none());
    }

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let file = write_config(r#"{"organization": "contoso", "project": "Ops"}"#);
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.base_url, "https://dev.azure.com/");
        assert!(settings.relations.is_empty());
        assert!(settings.work_items.is_empty());
    }

    #[test]
    fn test_load_rejects_missing_project() {
        let file = write_config(r#"{"organization": "contoso", "project": ""}"#);
        assert!(Settings::load_from(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let file = write_config("{not json");
        assert!(Settings::load_from(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Settings::load_from("/nonexistent/adosync.json").is_err());
    }

    #[test]
    fn test_env_token_overrides_file_token() {
        let mut settings = Settings {
            organization: "contoso".into(),
            project: "Ops".into(),
            base_url: default_base_url(),
            access_token: Some("from-file".into()),
            relations: vec![],
            work_items: vec![],
        };
        settings.apply_token_env(Some("from-env".into()));
        assert_eq!(settings.token().unwrap(), "from-env");

        settings.apply_token_env(None);
        assert_eq!(settings.token().unwrap(), "from-env");

        settings.apply_token_env(Some(String::new()));
        assert_eq!(settings.token().unwrap(), "from-env");
    }

    #[test]
    fn test_token_missing() {
        let settings = Settings {
            organization: "contoso".into(),
            project: "Ops".into(),
            base_url: default_base_url(),
            access_token: None,
            relations: vec![],
            work_items: vec![],
        };
        let err = settings.token().unwrap_err();
        assert!(err.to_string().contains(TOKEN_ENV_VAR));
    }
}
