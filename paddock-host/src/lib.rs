//! paddock-host: confined content staging and process supervision
//!
//! This crate is the core behind a host that stages untrusted content into a
//! sandboxed directory tree and supervises the programs launched from it.

pub mod boundary;
pub mod events;
pub mod host;
pub mod logging;
pub mod resolver;
pub mod staging;
pub mod supervisor;

pub use boundary::{Boundary, Roots};
pub use host::{Host, HostConfig, HostError};
pub use resolver::{ResourceNotFound, ResourceResolver, ServeOrigin};
pub use staging::{StagingEngine, StagingError};
pub use supervisor::{LaunchPolicy, Supervisor, SupervisorConfig, SupervisorError, TakenOutput};
pub use paddock_api::{AssemblyConfig, AssemblyMode, AssemblyRule, ConfigError, RootSelector};
