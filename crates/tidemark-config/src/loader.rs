use std::path::Path;

use tidemark_common::{Error, Result};
use tracing::debug;

use crate::model::TargetConfig;

/// Reads migration targets from YAML or TOML files.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Path) -> Result<TargetConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read error for {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let target = Self::parse(&contents, ext)?;
        debug!("loaded migration target from {}", path.display());
        Ok(target)
    }

    pub fn parse(contents: &str, format: &str) -> Result<TargetConfig> {
        match format {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::ConfigLoader;

    #[test]
    fn loads_yaml_target() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "url: postgres://localhost/app\nmigrations_table: versions\ntransaction_mode: true"
        )
        .unwrap();

        let target = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(target.url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(target.migrations_table.as_deref(), Some("versions"));
        assert_eq!(target.transaction_mode, Some(true));
    }

    #[test]
    fn loads_toml_target() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "url = \"sqlite://./app.db\"").unwrap();

        let target = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(target.url.as_deref(), Some("sqlite://./app.db"));
        assert!(target.migrations_table.is_none());

        let (_, config) = target.resolve().unwrap();
        assert_eq!(config.migrations_table, "schema_migrations");
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = ConfigLoader::parse("url = 1", "ini").unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: unsupported config extension: ini"
        );
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ConfigLoader::load(std::path::Path::new("/nonexistent/target.yaml")).unwrap_err();
        assert!(matches!(err, tidemark_common::Error::Config(_)));
    }
}
