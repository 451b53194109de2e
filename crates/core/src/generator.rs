//! The Generator capability: regenerating derived artifacts (image
//! manifests, Dockerfiles) in the working tree after fork files are applied.

use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::errors::GeneratorError;

pub trait Generator {
    /// Regenerate artifacts under `project`.
    fn generate(&self, project: &Path) -> Result<(), GeneratorError>;
}

/// Runs an external command in the project root.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Build from an argv list. Returns `None` for an empty list.
    pub fn new(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Generator for CommandGenerator {
    fn generate(&self, project: &Path) -> Result<(), GeneratorError> {
        info!(program = %self.program, args = ?self.args, "generating artifacts");
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(project)
            .output()?;
        if !output.status.success() {
            return Err(GeneratorError::CommandFailed {
                program: self.program.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "generator finished"
        );
        Ok(())
    }
}

/// Generator used when generation is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGenerator;

impl Generator for NoopGenerator {
    fn generate(&self, _project: &Path) -> Result<(), GeneratorError> {
        debug!("artifact generation skipped");
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use mock::MockGenerator;

#[cfg(any(test, feature = "test-support"))]
mod mock {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use super::Generator;
    use crate::errors::GeneratorError;

    /// Generator that counts invocations, for tests. Clones share the counter.
    #[derive(Debug, Clone, Default)]
    pub struct MockGenerator {
        calls: Arc<Mutex<usize>>,
        fail: bool,
    }

    impl MockGenerator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl Generator for MockGenerator {
        fn generate(&self, _project: &Path) -> Result<(), GeneratorError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(GeneratorError::CommandFailed {
                    program: "mock".into(),
                    exit_code: 1,
                    stderr: "mock failure".into(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_command() {
        assert!(CommandGenerator::new(&[]).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_runs_in_project() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CommandGenerator::new(&argv(&["sh", "-c", "echo generated > images.yaml"])).unwrap();
        generator.generate(dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("images.yaml")).unwrap(),
            "generated\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_command_failure() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CommandGenerator::new(&argv(&["sh", "-c", "echo broken >&2; exit 3"])).unwrap();
        match generator.generate(dir.path()).unwrap_err() {
            GeneratorError::CommandFailed {
                program,
                exit_code,
                stderr,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected command failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CommandGenerator::new(&argv(&["downsync-no-such-generator"])).unwrap();
        assert!(matches!(
            generator.generate(dir.path()),
            Err(GeneratorError::IoError(_))
        ));
    }

    #[test]
    fn test_mock_counts_calls() {
        let generator = MockGenerator::new();
        let shared = generator.clone();
        generator.generate(Path::new(".")).unwrap();
        generator.generate(Path::new(".")).unwrap();
        assert_eq!(shared.calls(), 2);
        assert!(MockGenerator::failing().generate(Path::new(".")).is_err());
    }
}
