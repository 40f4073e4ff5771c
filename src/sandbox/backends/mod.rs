mod bwrap;
mod docker;
mod process;

pub use bwrap::BwrapBackend;
pub use docker::DockerBackend;
pub use process::ProcessBackend;
