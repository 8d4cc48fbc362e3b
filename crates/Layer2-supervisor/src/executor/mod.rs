//! Command executors
//!
//! - `CommandRunner` - seam for one-shot commands (version checks, clone, install)
//! - `LocalRunner` - runs them on the host with captured output and a timeout

pub mod local;
pub mod r#trait;

pub use local::LocalRunner;
pub use r#trait::{CommandOutput, CommandRunner, CommandSpec};
