pub mod config;
mod engine;
mod integrations;

pub use config::Config;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::EntityState;
pub use engine::HvacMode;
pub use engine::Platform;
pub use engine::State;
pub use integrations::nature::NatureConfig;
