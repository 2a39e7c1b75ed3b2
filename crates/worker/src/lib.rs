pub mod client;
pub mod collaborators;
pub mod command_map;
pub mod executor;
pub mod service;

pub use client::{WorkClient, WorkReport, WorkqueueClient};
pub use collaborators::{CredentialBroker, HttpCredentialBroker, HttpSiteCatalog, SiteCatalog};
pub use service::WorkerService;
