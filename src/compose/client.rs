//! The compose client interface

use super::events::EventStream;
use super::loader::LoadedProject;
use super::logs::LogStream;
use super::model::{ComposeProject, ContainerId, RuntimeVersion, ServiceUpSpec};
use crate::error::Result;
use async_trait::async_trait;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Operator-visible output of a lifecycle call.
///
/// These are side channels only; nothing written here is part of an
/// operation's result. Both default to discarding.
pub struct OutputSinks {
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl Default for OutputSinks {
    fn default() -> Self {
        Self::discard()
    }
}

impl OutputSinks {
    pub fn new(stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self { stdout, stderr }
    }

    /// Sinks that drop everything
    pub fn discard() -> Self {
        Self::new(Box::new(io::sink()), Box::new(io::sink()))
    }

    /// The process's own stdout and stderr
    pub fn inherit() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn stdout(&mut self) -> &mut (dyn Write + Send) {
        self.stdout.as_mut()
    }

    pub fn stderr(&mut self) -> &mut (dyn Write + Send) {
        self.stderr.as_mut()
    }
}

/// Everything an orchestrator needs from a compose runtime.
///
/// Implementations may talk to a real runtime or simulate one; callers must
/// not be able to tell the difference from the shape of the results.
#[async_trait]
pub trait ComposeClient: Send + Sync {
    /// Start the service in `spec`, building its image first if `should_build`
    async fn up(
        &self,
        spec: &ServiceUpSpec,
        should_build: bool,
        sinks: &mut OutputSinks,
    ) -> Result<()>;

    /// Tear down a whole project
    async fn down(&self, project: &ComposeProject, sinks: &mut OutputSinks) -> Result<()>;

    /// Remove the containers of the given services
    async fn rm(&self, specs: &[ServiceUpSpec], sinks: &mut OutputSinks) -> Result<()>;

    /// Follow the logs of one service until it exits or `cancel` fires
    fn stream_logs(&self, spec: &ServiceUpSpec, cancel: CancellationToken) -> LogStream;

    /// Subscribe to the project's event feed until `cancel` fires
    fn stream_events(
        &self,
        project: &ComposeProject,
        cancel: CancellationToken,
    ) -> Result<EventStream>;

    /// Raw, merged compose configuration for the given files
    async fn config(&self, config_paths: &[PathBuf]) -> Result<String>;

    /// Structured view of a project
    async fn project(&self, project: &ComposeProject) -> Result<LoadedProject>;

    /// ID of the container running `spec`
    async fn container_id(&self, spec: &ServiceUpSpec) -> Result<ContainerId>;

    /// Version of the runtime. Never fails for lack of configuration.
    async fn version(&self) -> Result<RuntimeVersion>;
}
