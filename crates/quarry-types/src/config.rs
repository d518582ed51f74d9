//! Configuration loading for quarry.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/quarry/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::QuarryError;

/// Declaration of one indexed field, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSettings {
    /// Field name in the index
    pub name: String,

    /// Transform expression ("Date.Year", "Number", "DateTime", ...).
    /// Absent means the raw string is stored as-is.
    #[serde(default)]
    pub field_type: Option<String>,

    /// Raw field the value is read from (defaults to `name`)
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default = "default_true")]
    pub stored: bool,

    #[serde(default)]
    pub sortable: bool,

    /// Restrict the field to these record types (empty = all)
    #[serde(default)]
    pub record_types: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl FieldSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: None,
            source: None,
            stored: true,
            sortable: false,
            record_types: Vec::new(),
        }
    }

    pub fn with_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Mutation queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum mutations applied between two commits
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_batch_size() -> usize {
    64
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

/// Query execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Result limit when the caller does not give one
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
}

fn default_search_limit() -> usize {
    10
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the tantivy index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Identity of the index in the searcher context registry
    #[serde(default = "default_index_id")]
    pub index_id: String,

    /// Memory budget for the index writer in MB
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Record types that participate in indexing
    #[serde(default)]
    pub record_types: Vec<String>,

    /// Declared index fields
    #[serde(default)]
    pub fields: Vec<FieldSettings>,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub search: SearchSettings,
}

fn default_index_path() -> String {
    ProjectDirs::from("", "", "quarry")
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./quarry-index"))
        .to_string_lossy()
        .to_string()
}

fn default_index_id() -> String {
    "default".to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            index_id: default_index_id(),
            writer_memory_mb: default_writer_memory_mb(),
            log_level: default_log_level(),
            record_types: Vec::new(),
            fields: Vec::new(),
            queue: QueueSettings::default(),
            search: SearchSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/quarry/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (QUARRY_*, nested keys joined by `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, QuarryError> {
        let config_dir = ProjectDirs::from("", "", "quarry")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("index_path", default_index_path())
            .map_err(|e| QuarryError::Config(e.to_string()))?
            .set_default("index_id", default_index_id())
            .map_err(|e| QuarryError::Config(e.to_string()))?
            .set_default("writer_memory_mb", default_writer_memory_mb() as i64)
            .map_err(|e| QuarryError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| QuarryError::Config(e.to_string()))?
            .set_default("queue.max_batch_size", default_max_batch_size() as i64)
            .map_err(|e| QuarryError::Config(e.to_string()))?
            .set_default("search.default_limit", default_search_limit() as i64)
            .map_err(|e| QuarryError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // QUARRY_INDEX_PATH, QUARRY_QUEUE__MAX_BATCH_SIZE, ...
        builder = builder.add_source(
            Environment::with_prefix("QUARRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| QuarryError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| QuarryError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), QuarryError> {
        if self.index_id.trim().is_empty() {
            return Err(QuarryError::Config("index_id must not be empty".into()));
        }
        if self.writer_memory_mb == 0 {
            return Err(QuarryError::Config("writer_memory_mb must be > 0".into()));
        }
        if self.queue.max_batch_size == 0 {
            return Err(QuarryError::Config(
                "queue.max_batch_size must be > 0".into(),
            ));
        }
        if self.search.default_limit == 0 {
            return Err(QuarryError::Config(
                "search.default_limit must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Expand a leading `~/` in index_path to the home directory
    pub fn expanded_index_path(&self) -> PathBuf {
        if let Some(rest) = self.index_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.index_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.index_id, "default");
        assert_eq!(settings.writer_memory_mb, 50);
        assert_eq!(settings.queue.max_batch_size, 64);
        assert_eq!(settings.search.default_limit, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
index_id = "media"
record_types = ["Documents", "Pictures"]

[queue]
max_batch_size = 8

[[fields]]
name = "Title"

[[fields]]
name = "YearCreated"
field_type = "Date.Year"
source = "DateCreated"
sortable = true
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.index_id, "media");
        assert_eq!(settings.record_types, vec!["Documents", "Pictures"]);
        assert_eq!(settings.queue.max_batch_size, 8);
        assert_eq!(settings.fields.len(), 2);
        assert_eq!(settings.fields[0], FieldSettings::new("Title"));
        assert_eq!(settings.fields[1].field_type.as_deref(), Some("Date.Year"));
        assert_eq!(settings.fields[1].source.as_deref(), Some("DateCreated"));
        assert!(settings.fields[1].sortable);
        assert!(settings.fields[1].stored);
    }

    #[test]
    fn test_validation_rejects_zero_batch() {
        let mut settings = Settings::default();
        settings.queue.max_batch_size = 0;
        assert!(matches!(settings.validate(), Err(QuarryError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_empty_index_id() {
        let settings = Settings {
            index_id: " ".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_expanded_index_path_plain() {
        let settings = Settings {
            index_path: "/var/lib/quarry".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.expanded_index_path(),
            PathBuf::from("/var/lib/quarry")
        );
    }
}
