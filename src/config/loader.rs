//! Manifest loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::BinderConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for manifest loading.
#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "IO error: {}", e),
            LoadError::Parse(e) => write!(f, "Parse error: {}", e),
            LoadError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// Load and validate a manifest from a TOML file.
pub fn load_config(path: &Path) -> Result<BinderConfig, LoadError> {
    let content = fs::read_to_string(path).map_err(LoadError::Io)?;
    let config: BinderConfig = toml::from_str(&content).map_err(LoadError::Parse)?;

    validate_config(&config).map_err(LoadError::Validation)?;

    Ok(config)
}
