use std::path::{Path, PathBuf};

use crate::config::types::SandboxctlConfig;
use crate::error::{Result, SandboxError};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sandboxctl", "sandboxctl") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".sandboxctl").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<SandboxctlConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // An explicitly named file must exist
        if config_path.is_some() {
            return Err(SandboxError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        return Ok(SandboxctlConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: SandboxctlConfig =
        toml::from_str(&content).map_err(|e| SandboxError::TomlParse(e.to_string()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[sandbox]\ndomain = \"box.example.com\"\ntoken = \"abc\"\n\n[client]\nmax_retries = 5"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.sandbox.domain.as_deref(), Some("box.example.com"));
        assert_eq!(config.client.max_retries, 5);
        assert_eq!(config.client.timeout_seconds, 120);
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sandbox\nurl = ").unwrap();
        assert!(matches!(
            load_config(Some(file.path())),
            Err(SandboxError::TomlParse(_))
        ));
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(SandboxError::Config(_))
        ));
    }
}
