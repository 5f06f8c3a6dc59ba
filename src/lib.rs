//! # parachain-helpdesk
//!
//! Turns customer support requests published on a parachain into Odoo
//! helpdesk tickets with the customer's log bundle attached.
//!
//! ## Features
//!
//! - **Odoo Client** - Single-attempt RPC calls: tickets, log notes, attachments, partner lookup
//! - **Retrying Service** - Drives ticket creation and log attachment until they succeed
//! - **Retry Policy** - Fixed or exponential delay, optional attempt cap and deadline, cancellation
//! - **Pipeline** - One tokio task per request so a stuck backend never stalls ingestion
//!
//! ## Usage
//!
//! ```rust,no_run
//! use parachain_helpdesk::{
//!     LogBundle, OdooClient, OdooConfig, SupportPipeline, SupportRequest, TicketService,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> parachain_helpdesk::Result<()> {
//! let config = OdooConfig::from_env()?;
//! let client = Arc::new(OdooClient::connect(&config).await?);
//! let service = Arc::new(TicketService::new(client));
//! let pipeline = SupportPipeline::new(service);
//!
//! let request = SupportRequest {
//!     email: "alice@example.com".to_string(),
//!     chain_address: "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY".to_string(),
//!     phone: "+100000000".to_string(),
//!     description: "Device offline".to_string(),
//!     log_hash: "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG".to_string(),
//! };
//! let logs = LogBundle::File {
//!     file_name: "logs.zip".to_string(),
//!     path: "/tmp/logs.zip".into(),
//! };
//!
//! let outcome = pipeline
//!     .spawn(request, logs)
//!     .await
//!     .expect("pipeline task panicked")?;
//! println!("ticket {}", outcome.ticket_id);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use client::{OdooClient, TicketBackend};
pub use config::{ConfigError, OdooConfig};
pub use models::*;
pub use pipeline::{PipelineOutcome, SupportPipeline};
pub use retry::{Backoff, RetryPolicy};
pub use service::TicketService;
pub use transport::{JsonRpcTransport, RpcTransport};

use thiserror::Error;

/// Helpdesk bridge errors
#[derive(Error, Debug)]
pub enum HelpdeskError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend fault {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Credentials are wrong for remote system access")]
    AuthenticationFailed,

    #[error("{model}.{method} returned an empty result")]
    EmptyResult {
        model: &'static str,
        method: &'static str,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<HelpdeskError>,
    },

    #[error("Cancelled")]
    Cancelled,
}

impl HelpdeskError {
    /// Whether repeating the failed call may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            HelpdeskError::Config(_)
                | HelpdeskError::AuthenticationFailed
                | HelpdeskError::RetryExhausted { .. }
                | HelpdeskError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, HelpdeskError>;
