//! Docflow configuration module.
//!
//! Provides configuration file support via `docflow.toml` and environment
//! variables.
//!
//! # Priority (highest to lowest)
//!
//! 1. Environment variables (`DOCFLOW_*`, nested keys separated by `__`)
//! 2. Configuration file (`docflow.toml`)
//! 3. Default values
//!
//! ```toml
//! [server]
//! connection_string = "mongodb://localhost:27017"
//! database = "crm"
//! document_type = "Customer"
//!
//! [[types]]
//! name = "Customer"
//! fields = { Id = "int64", Name = "string", Since = "date_time" }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::codec::IdentifierKind;
use crate::filter::InputDeclaration;
use crate::inputs::{COLLECTION_NAME_INPUT, CONNECTION_STRING_INPUT, DATABASE_NAME_INPUT};
use crate::schema::FieldKind;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },

    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Connection settings of a step.
///
/// Each of the three location settings is either fixed here or, when absent,
/// deferred to an invocation input of the same purpose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Store connection string. `None` = read from the `Connection String` input.
    pub connection_string: Option<String>,
    /// Database name. `None` = read from the `Database Name` input.
    pub database: Option<String>,
    /// Collection name. `None` = read from the `Collection Name` input.
    pub collection: Option<String>,
    /// Record type of the collection's documents.
    pub document_type: Option<String>,
    /// Explicit identifier representation, bypassing inference from the type.
    pub id_kind_override: Option<IdentifierKind>,
}

impl ServerConfig {
    /// Inputs the step reserves for deferred connection settings.
    ///
    /// Filters binding one of these names share the value with the connection.
    #[must_use]
    pub fn reserved_inputs(&self) -> Vec<InputDeclaration> {
        [
            (&self.connection_string, CONNECTION_STRING_INPUT),
            (&self.database, DATABASE_NAME_INPUT),
            (&self.collection, COLLECTION_NAME_INPUT),
        ]
        .into_iter()
        .filter(|(setting, _)| setting.is_none())
        .map(|(_, name)| InputDeclaration::new(name, FieldKind::String))
        .collect()
    }
}

/// A record type declared in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeDefinition {
    /// Type name referenced by `server.document_type`.
    pub name: String,
    /// Field name to kind.
    pub fields: IndexMap<String, FieldKind>,
    /// Accept fields not listed in `fields`.
    pub open: bool,
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Limits configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum nesting depth of a filter tree.
    pub max_filter_depth: usize,
    /// Maximum items per bulk write (0 = unlimited).
    pub max_batch_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_filter_depth: 32,
            max_batch_size: 0,
        }
    }
}

/// Main docflow configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocflowConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// Record types.
    pub types: Vec<TypeDefinition>,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Limits configuration.
    pub limits: LimitsConfig,
}

impl DocflowConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("docflow.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DOCFLOW_").split("__").lowercase(true));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Loads configuration from a file that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] if the file is absent, otherwise
    /// as [`DocflowConfig::load_from_path`].
    pub fn load_required<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Self::load_from_path(path)
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if !(1..=256).contains(&self.limits.max_filter_depth) {
            return Err(ConfigError::InvalidValue {
                key: "limits.max_filter_depth".to_string(),
                message: format!(
                    "value {} is out of range [1, 256]",
                    self.limits.max_filter_depth
                ),
            });
        }

        for (key, value) in [
            ("server.connection_string", &self.server.connection_string),
            ("server.database", &self.server.database),
            ("server.collection", &self.server.collection),
            ("server.document_type", &self.server.document_type),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "value must not be empty; omit it to read from inputs".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for (index, def) in self.types.iter().enumerate() {
            if def.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("types[{index}].name"),
                    message: "type name must not be empty".to_string(),
                });
            }
            if !seen.insert(def.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("types[{index}].name"),
                    message: format!("type '{}' is declared more than once", def.name),
                });
            }
            if let Some(field) = def.fields.keys().find(|f| f.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("types[{index}].fields"),
                    message: format!("field name '{field}' must not be empty"),
                });
            }
        }

        Ok(())
    }

    /// Looks up a declared type by name.
    #[must_use]
    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|def| def.name == name)
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
