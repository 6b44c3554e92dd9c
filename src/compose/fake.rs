//! Deterministic in-process compose client
//!
//! [`FakeComposeClient`] records every lifecycle call and answers every
//! query from values set on the instance. Nothing here touches a real
//! runtime, and separate instances share no state.

use super::client::{ComposeClient, OutputSinks};
use super::events::{Event, EventBus, EventStream};
use super::loader::{
    load_env_file, read_config_files, ConfigDetails, Environment, LoadedProject, ProjectLoader,
    YamlProjectLoader,
};
use super::logs::LogStream;
use super::model::{
    ComposeProject, ContainerId, DownCall, RmCall, RuntimeVersion, ServiceUpSpec, UpCall,
};
use crate::error::{ComposeError, InjectedFault, Result};
use crate::settings::ClientSettings;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeState {
    log_outputs: HashMap<String, mpsc::Receiver<String>>,
    exit_codes: HashMap<String, i32>,
    container_id_output: ContainerId,
    config_output: String,
    version_output: Option<String>,
    work_dir: Option<PathBuf>,
    environment: Option<Environment>,

    up_calls: Vec<UpCall>,
    down_calls: Vec<DownCall>,
    rm_calls: Vec<RmCall>,

    up_error: Option<InjectedFault>,
    down_error: Option<InjectedFault>,
    rm_error: Option<InjectedFault>,
}

/// A compose client that simulates the runtime
pub struct FakeComposeClient {
    settings: ClientSettings,
    loader: Arc<dyn ProjectLoader>,
    state: Mutex<FakeState>,
    events: EventBus,
}

impl Default for FakeComposeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeComposeClient {
    pub fn new() -> Self {
        Self::with_settings(ClientSettings::default())
    }

    pub fn with_settings(settings: ClientSettings) -> Self {
        let loader = Arc::new(YamlProjectLoader::new(&settings.fallback_project_name));
        let events = EventBus::new(settings.ingest_capacity, settings.subscriber_capacity);
        Self {
            settings,
            loader,
            state: Mutex::new(FakeState::default()),
            events,
        }
    }

    /// Replace the project loader
    pub fn with_loader(mut self, loader: Arc<dyn ProjectLoader>) -> Self {
        self.loader = loader;
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, FakeState>> {
        self.state
            .lock()
            .map_err(|_| ComposeError::Lock("Failed to acquire fake client lock".to_string()))
    }

    /// Feed `service`'s next log stream from `source`. The stream ends with
    /// an exit line once every sender is dropped.
    pub fn set_log_output(&self, service: &str, source: mpsc::Receiver<String>) -> Result<()> {
        self.state()?.log_outputs.insert(service.to_string(), source);
        Ok(())
    }

    /// Create a log source for `service` and return its sending end
    pub fn log_channel(&self, service: &str) -> Result<mpsc::Sender<String>> {
        let (tx, rx) = mpsc::channel(self.settings.log_buffer);
        self.set_log_output(service, rx)?;
        Ok(tx)
    }

    /// Exit code reported when `service`'s log source ends
    pub fn set_exit_code(&self, service: &str, code: i32) -> Result<()> {
        self.state()?.exit_codes.insert(service.to_string(), code);
        Ok(())
    }

    pub fn set_container_id(&self, id: ContainerId) -> Result<()> {
        self.state()?.container_id_output = id;
        Ok(())
    }

    /// Raw compose text returned by `config` and loaded by `project`
    pub fn set_config_output(&self, config: &str) -> Result<()> {
        self.state()?.config_output = config.to_string();
        Ok(())
    }

    pub fn set_version_output(&self, version: Option<&str>) -> Result<()> {
        self.state()?.version_output = version.map(str::to_string);
        Ok(())
    }

    /// Working directory used by `project` in place of the project's own path
    pub fn set_work_dir(&self, work_dir: Option<PathBuf>) -> Result<()> {
        self.state()?.work_dir = work_dir;
        Ok(())
    }

    /// Environment used by `project` for interpolation and naming. Unset
    /// means empty; the process environment is never consulted.
    pub fn set_environment(&self, environment: Option<Environment>) -> Result<()> {
        self.state()?.environment = environment;
        Ok(())
    }

    /// Fail every later `up` with `fault` until cleared with `None`
    pub fn set_up_error(&self, fault: Option<InjectedFault>) -> Result<()> {
        self.state()?.up_error = fault;
        Ok(())
    }

    /// Fail every later `down` with `fault` until cleared with `None`
    pub fn set_down_error(&self, fault: Option<InjectedFault>) -> Result<()> {
        self.state()?.down_error = fault;
        Ok(())
    }

    /// Fail every later `rm` with `fault` until cleared with `None`
    pub fn set_rm_error(&self, fault: Option<InjectedFault>) -> Result<()> {
        self.state()?.rm_error = fault;
        Ok(())
    }

    pub fn up_calls(&self) -> Result<Vec<UpCall>> {
        Ok(self.state()?.up_calls.clone())
    }

    pub fn down_calls(&self) -> Result<Vec<DownCall>> {
        Ok(self.state()?.down_calls.clone())
    }

    pub fn rm_calls(&self) -> Result<Vec<RmCall>> {
        Ok(self.state()?.rm_calls.clone())
    }

    /// Publish an event to every `stream_events` subscriber
    pub async fn send_event(&self, event: &Event) -> Result<()> {
        self.events.send_event(event).await
    }

    /// The event bus behind `stream_events`
    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl ComposeClient for FakeComposeClient {
    async fn up(
        &self,
        spec: &ServiceUpSpec,
        should_build: bool,
        _sinks: &mut OutputSinks,
    ) -> Result<()> {
        let mut state = self.state()?;
        state.up_calls.push(UpCall {
            spec: spec.clone(),
            should_build,
        });
        tracing::debug!("up {} (build: {})", spec, should_build);

        match &state.up_error {
            Some(fault) => {
                tracing::warn!("up {} failing with injected fault: {}", spec, fault);
                Err(fault.clone().into())
            }
            None => Ok(()),
        }
    }

    async fn down(&self, project: &ComposeProject, _sinks: &mut OutputSinks) -> Result<()> {
        let mut state = self.state()?;
        state.down_calls.push(DownCall {
            project: project.clone(),
        });
        tracing::debug!("down {}", project.project_path.display());

        // Sticky: the fault stays set until the caller clears it.
        match &state.down_error {
            Some(fault) => {
                tracing::warn!("down failing with injected fault: {}", fault);
                Err(fault.clone().into())
            }
            None => Ok(()),
        }
    }

    async fn rm(&self, specs: &[ServiceUpSpec], _sinks: &mut OutputSinks) -> Result<()> {
        let mut state = self.state()?;
        state.rm_calls.push(RmCall {
            specs: specs.to_vec(),
        });
        tracing::debug!("rm {} services", specs.len());

        match &state.rm_error {
            Some(fault) => {
                tracing::warn!("rm failing with injected fault: {}", fault);
                Err(fault.clone().into())
            }
            None => Ok(()),
        }
    }

    fn stream_logs(&self, spec: &ServiceUpSpec, cancel: CancellationToken) -> LogStream {
        let (source, exit_code) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let source = state.log_outputs.remove(spec.service());
            let exit_code = state.exit_codes.get(spec.service()).copied().unwrap_or(0);
            (source, exit_code)
        };

        LogStream::spawn(
            spec.service(),
            source,
            exit_code,
            self.settings.log_buffer,
            cancel,
        )
    }

    fn stream_events(
        &self,
        project: &ComposeProject,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        tracing::debug!("Streaming events for {}", project.project_path.display());
        self.events.subscribe(cancel)
    }

    async fn config(&self, _config_paths: &[PathBuf]) -> Result<String> {
        Ok(self.state()?.config_output.clone())
    }

    async fn project(&self, project: &ComposeProject) -> Result<LoadedProject> {
        let (config_output, work_dir, environment) = {
            let state = self.state()?;
            (
                state.config_output.clone(),
                state.work_dir.clone(),
                state.environment.clone(),
            )
        };

        let config_texts = if !config_output.is_empty() {
            vec![config_output]
        } else if let Some(yaml) = &project.yaml {
            vec![yaml.clone()]
        } else {
            read_config_files(&project.config_paths)?
        };

        let mut environment = environment.unwrap_or_default();
        if let Some(env_file) = &project.env_file {
            environment = load_env_file(env_file, environment)?;
        }

        let details = ConfigDetails {
            config_texts,
            working_dir: work_dir.unwrap_or_else(|| project.project_path.clone()),
            environment,
            project_name: project.name.clone(),
            profiles: project.profiles.clone(),
        };

        self.loader.load(&details)
    }

    async fn container_id(&self, _spec: &ServiceUpSpec) -> Result<ContainerId> {
        Ok(self.state()?.container_id_output.clone())
    }

    async fn version(&self) -> Result<RuntimeVersion> {
        let configured = self.state()?.version_output.clone();
        let version = configured.unwrap_or_else(|| self.settings.default_version.clone());
        Ok(RuntimeVersion::new(&version, &self.settings.fake_build))
    }
}
