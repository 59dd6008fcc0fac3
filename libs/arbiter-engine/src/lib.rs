pub mod comparator;
pub mod complexity;
pub mod config;
pub mod docker;
pub mod error;
pub mod executor;
pub mod harness;
pub mod registry;
pub mod sandbox;
pub mod workspace;


pub use config::EngineConfig;
pub use docker::DockerRuntime;
pub use error::{EngineError, EngineResult};
pub use executor::Executor;
pub use registry::{LanguageRegistry, RuntimeProfile};
pub use sandbox::ContainerRuntime;
