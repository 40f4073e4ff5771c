pub mod loader;
pub mod types;

pub use loader::load_config;
pub use types::{
    BackendType, BwrapConfig, DockerConfig, GeneratorConfig, InterpreterConfig, LimitsConfig,
    PolicyConfig, ProviderConfig, SandboxConfig, ServerConfig, VoxConfig,
};
