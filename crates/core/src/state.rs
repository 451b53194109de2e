//! The execution context shared by every stage of a sync run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info_span, Span};

use crate::config::{Config, Project};
use crate::forge::Forge;
use crate::generator::Generator;
use crate::git::{Remote, Repository};

/// Set from a signal handler to stop a run at the next step boundary.
pub type CancelFlag = Arc<AtomicBool>;

/// Configuration, project, capabilities and logging span of one run.
///
/// Built once per invocation; stages only read it. Dropping it releases the
/// repository handle.
pub struct State {
    config: Config,
    project: Project,
    repository: Box<dyn Repository>,
    forge: Box<dyn Forge>,
    generator: Box<dyn Generator>,
    span: Span,
    cancel: CancelFlag,
}

impl State {
    pub fn new(
        config: Config,
        project: Project,
        repository: Box<dyn Repository>,
        forge: Box<dyn Forge>,
        generator: Box<dyn Generator>,
    ) -> Self {
        let span = info_span!(
            "sync",
            project = %project.path.display(),
            dry_run = config.dry_run
        );
        Self {
            config,
            project,
            repository,
            forge,
            generator,
            span,
            cancel: CancelFlag::default(),
        }
    }

    /// Share `flag` with whoever requests cancellation.
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    pub fn forge(&self) -> &dyn Forge {
        self.forge.as_ref()
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn upstream(&self) -> Remote {
        Remote::new(&self.config.remotes.upstream, &self.config.upstream)
    }

    pub fn downstream(&self) -> Remote {
        Remote::new(&self.config.remotes.downstream, &self.config.downstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::mock::MockForge;
    use crate::generator::MockGenerator;
    use crate::git::mock::MockRepository;

    #[test]
    fn test_remotes_and_cancel_flag() {
        let config = Config::new(
            "https://github.com/knative/serving.git",
            "https://github.com/openshift-knative/serving.git",
        );
        let flag = CancelFlag::default();
        let state = State::new(
            config,
            Project::new("/work", "/work/.downsync.toml"),
            Box::new(MockRepository::new()),
            Box::new(MockForge::new()),
            Box::new(MockGenerator::new()),
        )
        .with_cancel_flag(flag.clone());

        assert_eq!(state.upstream().name, "upstream");
        assert_eq!(state.upstream().url, "https://github.com/knative/serving.git");
        assert_eq!(state.downstream().name, "downstream");

        assert!(!state.is_cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(state.is_cancelled());
    }
}
