//! Container runtime layer: process execution, capability detection and the
//! compose strategy object.

pub mod capabilities;
pub mod compose;
pub mod config;
pub mod detect;
pub mod exec;

pub use capabilities::{CapabilityMatrix, ComposeImplKind, RuntimeKind};
pub use compose::{ComposeError, ComposeHandle, ComposeProject};
pub use detect::{DetectError, Detector, RegistryProbe};
pub use exec::{CommandOutput, ExecError, Invocation, ProcessRunner, SystemRunner};
