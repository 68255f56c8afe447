//! paddock-api: Shared types for the paddock staging and supervision host
//!
//! This crate defines the protocol between the host core and its callers:
//! the uniform operation-result envelope, the argument shapes of the named
//! operations, and the assembly-configuration schema with its structural
//! validator.

pub mod config;
pub mod envelope;

pub use config::{AssemblyConfig, AssemblyMode, AssemblyRule, ConfigError, DEFAULT_MODE_KEY};
pub use envelope::{
    failure, success, Assembled, Cleared, ClearArgs, ConfigArgs, DrainedOutput, Killed, KilledAll,
    PidArgs, Prepared, ProcessList, Resolved, ResolveArgs, RootSelector, SessionEnded, StartArgs,
    Started,
};
