use gtm_protocol::{AGENT_FAILURE_MARKER, AGENT_STATUS_MARKER, AGENT_SUCCESS_MARKER};

use crate::workflow::TestWorkflow;

use super::{SuiteConfigurator, SuiteResult};

/// Two machines, each running its half of the ssh tests.
///
/// Both agents upload to the workflow's one report destination, so the
/// report collected is whichever machine finished last.
pub struct Ssh;

impl SuiteConfigurator for Ssh {
    fn name(&self) -> &str {
        "ssh"
    }

    fn configure(&self, workflow: &mut TestWorkflow) -> SuiteResult<()> {
        workflow.create_vm("vm1")?.run_tests("TestVm1")?;

        let mut vm2 = workflow.create_vm("vm2")?;
        vm2.run_tests("TestVm2")?;
        vm2.add_wait(
            AGENT_SUCCESS_MARKER,
            AGENT_FAILURE_MARKER,
            AGENT_STATUS_MARKER,
            false,
        )?;
        Ok(())
    }
}
