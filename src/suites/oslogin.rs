use crate::workflow::{single_vm_test, TestWorkflow};

use super::{SuiteConfigurator, SuiteError, SuiteResult};

/// OS Login checks on a single machine. Windows images have no OS Login.
pub struct OsLogin;

impl SuiteConfigurator for OsLogin {
    fn name(&self) -> &str {
        "oslogin"
    }

    fn configure(&self, workflow: &mut TestWorkflow) -> SuiteResult<()> {
        if workflow.image().to_ascii_lowercase().contains("windows") {
            return Err(SuiteError::UnsupportedImage {
                suite: self.name().to_string(),
                image: workflow.image().to_string(),
            });
        }
        single_vm_test(workflow)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_unsupported() {
        let mut wf = TestWorkflow::new("oslogin", "projects/windows-cloud/global/images/Windows-2019");
        let err = OsLogin.configure(&mut wf).unwrap_err();

        assert!(matches!(err, SuiteError::UnsupportedImage { .. }));
        assert!(!wf.is_built());
    }

    #[test]
    fn test_linux_single_machine() {
        let mut wf = TestWorkflow::new("oslogin", "debian-10");
        OsLogin.configure(&mut wf).unwrap();
        assert_eq!(wf.vm_names(), vec!["oslogin"]);
    }
}
