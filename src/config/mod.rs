mod settings;

pub use settings::{DatabaseConfig, DispatchConfig, GatewayConfig, Settings};
