//! Configuration loading and management

mod loader;

pub use loader::{StrataConfig, CONFIG_ENV_VAR};
