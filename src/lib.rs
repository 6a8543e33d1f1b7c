pub mod boundary;
pub mod cli;
pub mod config;
pub mod deps;
pub mod error;
pub mod runtime;
pub mod sandbox;

pub use boundary::{Boundary, BoundaryRequest, Response};
pub use error::{Result, SandboxError};
pub use sandbox::{Engine, RunRequest, RunResult};
