pub mod loader;
pub mod schema;

pub use loader::{ConfigError, default_config_path, default_data_dir, load_config, load_default_config};
pub use schema::{
    AgentSettings, AppConfig, GatewaySettings, GitSettings, SandboxSettings, StoreSettings,
    StreamSettings, VerifierSettings,
};
