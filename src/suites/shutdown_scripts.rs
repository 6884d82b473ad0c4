use crate::workflow::TestWorkflow;

use super::{SuiteConfigurator, SuiteResult};

/// Shutdown script that keeps appending to a log until the machine is gone.
pub const SHUTDOWN_SCRIPT: &str = r#"#!/bin/bash
count=1
while true; do
  echo $count | tee -a /root/the_log
  ((count++))
  sleep 1
done
"#;

/// One machine with a long-running shutdown script.
pub struct ShutdownScripts;

impl SuiteConfigurator for ShutdownScripts {
    fn name(&self) -> &str {
        "shutdown-scripts"
    }

    fn configure(&self, workflow: &mut TestWorkflow) -> SuiteResult<()> {
        workflow.create_vm("vm")?.set_shutdown_script(SHUTDOWN_SCRIPT)?;
        Ok(())
    }
}
