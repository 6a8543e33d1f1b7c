//! Dependency discovery and installation.

pub mod installer;
pub mod metadata;
pub mod resolver;
pub mod scanner;
pub mod telemetry;

pub use installer::{CommandInstaller, PackageInstaller};
pub use metadata::{declared_dependencies, ScriptMetadata};
pub use resolver::{DependencyResolver, DependencySet, DependencySource, InstalledSet, Resolution};
pub use scanner::ImportScanner;
pub use telemetry::{telemetry_env, TelemetryLatch};
