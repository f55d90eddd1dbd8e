pub mod env;
mod loader;

pub use env::{AppConfig, DirectoryConfig, EngineConfig, TextConfig};
pub use loader::load_config;
