//! Layered, strongly-typed configuration.
//!
//! Two TOML documents (user-global and project-local) merge over built-in
//! defaults, then a fixed table of environment variables applies on top.
//! Merging is deep: a layer replaces the scalars it names and leaves every
//! sibling key alone. Nothing in this module is fatal at load time; a bad
//! layer is logged and skipped.

pub mod env;
pub mod loader;
pub mod schema;

pub use env::{apply_env_overrides, EnvOverride, EnvValueKind, ENV_OVERRIDES};
pub use loader::{
    get_value, load, load_layered, project_config_path, set_value, user_config_path, ConfigError,
    PROJECT_CONFIG_FILE,
};
pub use schema::{
    DocGenerationConfig, DraftsConfig, LimitsConfig, ModelsConfig, NotificationsConfig,
    QuillConfig, QuillConfigOverlay, TriggersConfig,
};
