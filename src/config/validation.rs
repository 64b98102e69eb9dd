//! Manifest validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: BinderConfig → Result<(), Vec<ValidationError>>
//! - Binding rules proper (ambiguity, paths) stay with the registry

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::BinderConfig;
use crate::store::path;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no base paths configured")]
    NoBasePaths,

    #[error("invalid base path '{0}'")]
    InvalidBasePath(String),

    #[error("no members configured")]
    NoMembers,

    #[error("member with empty name")]
    EmptyMemberName,

    #[error("member '{0}' declared more than once")]
    DuplicateMember(String),

    #[error("unknown log level '{0}'")]
    UnknownLogLevel(String),
}

/// Check a parsed manifest.
pub fn validate_config(config: &BinderConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.base_paths.is_empty() {
        errors.push(ValidationError::NoBasePaths);
    }
    for base in &config.base_paths {
        if path::normalize_base(base).is_none() {
            errors.push(ValidationError::InvalidBasePath(base.clone()));
        }
    }

    if config.members.is_empty() {
        errors.push(ValidationError::NoMembers);
    }
    let mut seen = HashSet::new();
    for member in &config.members {
        if member.name.trim().is_empty() {
            errors.push(ValidationError::EmptyMemberName);
        } else if !seen.insert(member.name.as_str()) {
            errors.push(ValidationError::DuplicateMember(member.name.clone()));
        }
    }

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(config.logging.level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
