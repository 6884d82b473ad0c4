use crate::workflow::{single_vm_test, TestWorkflow};

use super::{SuiteConfigurator, SuiteResult};

/// Boots one machine and runs the whole image validation suite on it.
pub struct ImageValidation;

impl SuiteConfigurator for ImageValidation {
    fn name(&self) -> &str {
        "image-validation"
    }

    fn configure(&self, workflow: &mut TestWorkflow) -> SuiteResult<()> {
        single_vm_test(workflow)?;
        Ok(())
    }
}
