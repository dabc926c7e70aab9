use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CodeGenError;

pub const DEFAULT_CONFIG_FILE: &str = "appsettings.json";
pub const DEFAULT_NAMESPACE: &str = "GeneratedApp.Data";
pub const DEFAULT_OUTPUT_DIR: &str = "./Generated";
pub const DEFAULT_CONTEXT_NAME: &str = "AppDbContext";

/// Database engines a run can target. The value maps onto the provider
/// invariant name the reader factory discriminates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum Provider {
    SqlServer,
    MySql,
    PostgreSql,
}

impl Provider {
    pub fn invariant_name(&self) -> &'static str {
        match self {
            Provider::SqlServer => "Microsoft.Data.SqlClient",
            Provider::MySql => "MySql.Data.MySqlClient",
            Provider::PostgreSql => "Npgsql",
        }
    }
}

/// Settings of a generator run; the `CodeGenerator` object of the JSON
/// config file, with CLI flags layered on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeGeneratorConfig {
    pub connection: Option<String>,
    pub provider: Option<String>,
    pub namespace: String,
    pub output: String,
    pub pluralize: bool,
    pub data_annotations: bool,
    pub context_name: String,
    /// When false (the default), foreign-key mapping ignores unique
    /// constraints on the dependent side; when true it uses the same
    /// unique-index predicate the relationship analyzer applies.
    pub detect_unique_constraints: bool,
}

impl Default for CodeGeneratorConfig {
    fn default() -> Self {
        CodeGeneratorConfig {
            connection: None,
            provider: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            output: DEFAULT_OUTPUT_DIR.to_string(),
            pluralize: true,
            data_annotations: true,
            context_name: DEFAULT_CONTEXT_NAME.to_string(),
            detect_unique_constraints: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(rename = "CodeGenerator")]
    code_generator: Option<CodeGeneratorConfig>,
}

impl CodeGeneratorConfig {
    /// Reads the config file when it exists; a missing file yields defaults
    /// (the CLI may still supply everything needed).
    pub fn load(path: &Path) -> Result<Self, CodeGenError> {
        if !path.exists() {
            return Ok(CodeGeneratorConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| CodeGenError::config(format!("cannot read {}: {e}", path.display())))?;
        let file: ConfigFile = serde_json::from_str(&text)
            .map_err(|e| CodeGenError::config(format!("invalid config {}: {e}", path.display())))?;
        Ok(file.code_generator.unwrap_or_default())
    }

    /// Final connection string; absence is a configuration error.
    pub fn require_connection(&self) -> Result<&str, CodeGenError> {
        match self.connection.as_deref() {
            Some(cs) if !cs.trim().is_empty() => Ok(cs),
            _ => Err(CodeGenError::config(
                "no connection string: pass --connection or set CodeGenerator.connection",
            )),
        }
    }

    /// Provider invariant name, defaulting to the SQL Server provider.
    pub fn provider_name(&self) -> &str {
        self.provider
            .as_deref()
            .unwrap_or(Provider::SqlServer.invariant_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CodeGeneratorConfig::default();
        assert_eq!(config.namespace, "GeneratedApp.Data");
        assert_eq!(config.output, "./Generated");
        assert!(config.pluralize);
        assert!(config.data_annotations);
        assert!(!config.detect_unique_constraints);
        assert_eq!(config.provider_name(), "Microsoft.Data.SqlClient");
        assert!(config.require_connection().is_err());
    }

    #[test]
    fn test_load_reads_code_generator_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appsettings.json");
        std::fs::write(
            &path,
            r#"{
                "CodeGenerator": {
                    "connection": "Server=.;Database=Shop",
                    "provider": "Npgsql",
                    "namespace": "Shop.Data",
                    "pluralize": false
                }
            }"#,
        )
        .unwrap();
        let config = CodeGeneratorConfig::load(&path).unwrap();
        assert_eq!(config.require_connection().unwrap(), "Server=.;Database=Shop");
        assert_eq!(config.provider_name(), "Npgsql");
        assert_eq!(config.namespace, "Shop.Data");
        assert!(!config.pluralize);
        // untouched keys keep their defaults
        assert_eq!(config.output, "./Generated");
        assert!(config.data_annotations);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CodeGeneratorConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CodeGeneratorConfig::default());
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appsettings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(CodeGeneratorConfig::load(&path).is_err());
    }

    #[test]
    fn test_provider_invariant_names() {
        assert_eq!(Provider::SqlServer.invariant_name(), "Microsoft.Data.SqlClient");
        assert_eq!(Provider::MySql.invariant_name(), "MySql.Data.MySqlClient");
        assert_eq!(Provider::PostgreSql.invariant_name(), "Npgsql");
    }
}
