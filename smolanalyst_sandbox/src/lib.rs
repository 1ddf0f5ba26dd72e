//! # smolanalyst sandbox
//!
//! An execution sandbox for generated data-analysis code. While a scope is
//! active, writes are confined to a root directory, existing files can never
//! be overwritten, destructive filesystem operations are refused outright and
//! plotting is forced into a headless mode.
//!
//! ## Enforcement
//!
//! Two complementary layers, either or both installed per scope:
//!
//! - **Interception gate** (`gate`): one process-wide observer consulted by
//!   every operation of the interposed filesystem layer (`fs`) before it
//!   touches the disk. It classifies the operation (`operation`) and runs the
//!   path validator for writes.
//! - **Surface guard** (`surface`): wraps the known output entry points of the
//!   analysis objects (`data`) so their path arguments are validated, and
//!   rewritten to absolute paths, before the real export runs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use smolanalyst_sandbox::{SandboxScope, data::Frame, surface::CallArgs};
//!
//! # fn main() -> Result<(), smolanalyst_sandbox::SandboxError> {
//! let frame = Frame::new(&["city"], vec![vec!["Oslo".into()]]);
//! let scope = SandboxScope::new("/work/session")?;
//! scope.run(|_| frame.to_csv(&CallArgs::new().arg("cities.csv")))??;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **`policy`** / **`path_validator`**: the confinement policy and the check
//!   every write target goes through.
//! - **`scope`**: enter/exit orchestration with guaranteed teardown.
//! - **`render`**: process-wide rendering settings and the headless switch.
//! - **`runner`**: executes a JSON batch of analysis steps.
//! - **`config`**, **`utils::logging`**, **`shell`**: configuration, logging and
//!   the command-line binary.

pub mod config;
pub mod data;
pub mod error;
pub mod fs;
pub mod gate;
pub mod operation;
pub mod path_validator;
pub mod policy;
pub mod render;
pub mod runner;
pub mod scope;
pub mod shell;
pub mod surface;
pub mod utils;

pub use config::SandboxConfig;
pub use error::{ErrorKind, SandboxError};
pub use gate::{Decision, PolicyGate, WriteGate};
pub use operation::{Disposition, InterceptedEvent, OperationKind, classify};
pub use policy::SandboxPolicy;
pub use render::{RenderModeSwitch, RenderSettings};
pub use scope::{ActiveScope, Enforcement, SandboxScope};
pub use surface::SurfaceGuard;
