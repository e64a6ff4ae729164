use crate::{queue::DEFAULT_WORKERS, template::TemplateSet, ticket::User};
use anyhow::{anyhow, Error};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub max_workers: usize,
    pub shutdown_timeout_secs: u64,
    pub backend: BackendConfig,
    /// Queue member (e.g. `sip/reception`) to backend user id, checked
    /// before the user directory.
    pub user_map: HashMap<String, u64>,
    pub templates: TemplateSet,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum BackendConfig {
    Memory {
        #[serde(default)]
        users: Vec<User>,
    },
    Redmine {
        site: String,
        api_key: Option<String>,
        username: Option<String>,
        password: Option<String>,
        headers: Option<HashMap<String, String>>,
        page_size: Option<usize>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory { users: Vec::new() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8088".to_string(),
            log_level: None,
            log_file: None,
            max_workers: DEFAULT_WORKERS,
            shutdown_timeout_secs: 10,
            backend: BackendConfig::default(),
            user_map: HashMap::new(),
            templates: TemplateSet::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = Self::parse(
            &std::fs::read_to_string(path).map_err(|e| anyhow!("{}: {}", e, path))?,
        )
        .map_err(|e| anyhow!("{}: {}", path, e))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Log filter directive: `log_level` when set, then `RUST_LOG`, then `info`.
    pub fn log_filter(&self) -> String {
        self.log_level
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .filter(|directive| !directive.trim().is_empty())
            .unwrap_or_else(|| "info".to_string())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be at least 1"));
        }
        if let BackendConfig::Redmine {
            api_key, username, ..
        } = &self.backend
        {
            if api_key.is_none() && username.is_none() {
                return Err(anyhow!(
                    "redmine backend needs either api_key or username/password"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{ISSUE_CREATE, ISSUE_HANGUP_ANSWERED};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
http_addr = "127.0.0.1:9000"
log_level = "debug"
max_workers = 4

[backend]
type = "redmine"
site = "https://redmine.example.com"
api_key = "secret"

[user_map]
"sip/reception" = 12

[templates.IssueCreate]
project_id = 1
subject = "Call from %(callerid)s"

[templates."IssueCreate/custom_fields"]
"10" = "%(callerid)s"

[templates.IssueHangupAnswered]
notes = "Talked %(talkDuration).0f seconds"
"#;

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:9000");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.shutdown_timeout_secs, 10);
        assert_eq!(config.user_map.get("sip/reception"), Some(&12));
        assert!(matches!(config.backend, BackendConfig::Redmine { ref site, .. } if site == "https://redmine.example.com"));
        assert!(config.templates.has_section(ISSUE_CREATE));
        assert!(config.templates.has_section("IssueCreate/custom_fields"));
        assert!(config.templates.has_section(ISSUE_HANGUP_ANSWERED));
    }

    #[test]
    fn test_default_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.http_addr, "0.0.0.0:8088");
        assert_eq!(config.max_workers, DEFAULT_WORKERS);
        assert!(matches!(config.backend, BackendConfig::Memory { ref users } if users.is_empty()));
        assert!(config.templates.is_empty());
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn test_log_filter_fallback() {
        let config = Config::parse(r#"log_level = "astminer=trace""#).unwrap();
        assert_eq!(config.log_filter(), "astminer=trace");

        let config = Config::parse("").unwrap();
        let from_env = std::env::var("RUST_LOG")
            .ok()
            .filter(|directive| !directive.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        assert_eq!(config.log_filter(), from_env);
    }

    #[test]
    fn test_memory_users() {
        let config = Config::parse(
            r#"
[backend]
type = "memory"
users = [{ id = 7, login = "bob" }]
"#,
        )
        .unwrap();
        match config.backend {
            BackendConfig::Memory { users } => {
                assert_eq!(users, vec![User { id: 7, login: "bob".to_string() }])
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_malformed_pattern_rejected() {
        let err = Config::parse(
            r#"
[templates.IssueCreate]
subject = "Call from %s"
"#,
        )
        .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("IssueCreate"), "{}", message);
        assert!(message.contains("subject"), "{}", message);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(Config::parse("max_workers = 0").is_err());
        assert!(Config::parse(
            r#"
[backend]
type = "redmine"
site = "https://redmine.example.com"
"#
        )
        .is_err());
        assert!(Config::load("/nonexistent/astminer.toml").is_err());
    }

    #[test]
    fn test_bundled_example_config() {
        let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/astminer.toml")).unwrap();
        assert!(config.templates.unknown_sections().is_empty());
        assert_eq!(config.templates.section_names().len(), 6);
    }
}
