//! Docker Compose control client
//!
//! This module provides the interface an orchestrator uses to drive a
//! compose runtime, plus a fake that simulates one for tests.

pub mod client;
pub mod config;
pub mod events;
pub mod fake;
pub mod loader;
pub mod logs;
pub mod model;

pub use client::{ComposeClient, OutputSinks};
pub use config::{ComposeFile, ServiceConfig};
pub use events::{Action, Event, EventBus, EventStream, EventType};
pub use fake::FakeComposeClient;
pub use loader::{
    derive_project_name, normalize_project_name, ConfigDetails, Environment, LoadedProject,
    ProjectLoader, YamlProjectLoader,
};
pub use logs::LogStream;
pub use model::{
    ComposeProject, ContainerId, ContainerStatus, DownCall, RmCall, RuntimeVersion,
    ServiceUpSpec, UpCall,
};
