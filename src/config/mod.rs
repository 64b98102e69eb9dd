//! Manifest configuration for the `config-binder` CLI.
//!
//! # Data Flow
//! ```text
//! manifest file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BinderConfig (validated, immutable)
//!     → descriptor() → TargetDescriptor → ConfigBinder::bind
//! ```
//!
//! # Design Decisions
//! - The manifest is the runtime stand-in for compile-time member declarations
//! - All sections have defaults so a manifest can list only members and base paths
//! - Validation reports every problem at once

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, LoadError};
pub use schema::{BinderConfig, LoggingConfig, MemberConfig, StoreConfig};
pub use validation::{validate_config, ValidationError};
