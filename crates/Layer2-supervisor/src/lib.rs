//! # devhost-supervisor
//!
//! Lifecycle supervision for a locally served web UI:
//! - `precheck`: required tools and port availability
//! - `checkout` / `install`: source tree and dependencies
//! - `process`: spawn, output capture and shutdown of the dev server
//! - `readiness`: port, compile and HTTP probes
//! - `supervisor`: the start sequence tying it all together

pub mod checkout;
pub mod executor;
pub mod install;
pub mod log;
pub mod precheck;
pub mod process;
pub mod readiness;
pub mod state;
pub mod supervisor;

pub use checkout::{ensure_checkout, resolve_checkout_dir, CheckoutOutcome};
pub use executor::{CommandOutput, CommandRunner, CommandSpec, LocalRunner};
pub use install::{
    classify_install_failure, install_dependencies, InstallFailureKind, InstallReport,
    InstallStrategy,
};
pub use log::{DiagnosticReport, LogEntry, OutputBuffer, OutputStream};
pub use precheck::{check_tool, check_tools, ensure_ports_free, is_port_available, ToolCheck};
pub use process::{ProcessSpec, SupervisedProcess};
pub use readiness::{
    probe_http, wait_for_compilation, wait_for_port_while, CompileStatus, PortWait,
};
pub use state::{ProcessState, ProcessStatus};
pub use supervisor::{StartReport, Supervisor};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::executor::{CommandOutput, CommandRunner, CommandSpec};
    use async_trait::async_trait;
    use devhost_foundation::Result;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays canned outputs and records every spec it was asked to run
    pub struct ScriptedRunner {
        responses: Mutex<VecDeque<CommandOutput>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new(responses: Vec<CommandOutput>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().push(spec.clone());
            Ok(self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| CommandOutput::success("")))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }
}
