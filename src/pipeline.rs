//! Per-request processing on independent tokio tasks.
//!
//! Each support request gets its own task that creates the ticket and then
//! attaches the logs. A request stuck retrying against the backend never holds
//! up the ones behind it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::models::{LogBundle, LogNote, SupportRequest, TicketId};
use crate::service::TicketService;
use crate::Result;

/// What a finished request left in the helpdesk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub ticket_id: TicketId,
    pub note: LogNote,
}

#[derive(Clone)]
pub struct SupportPipeline {
    service: Arc<TicketService>,
}

impl SupportPipeline {
    pub fn new(service: Arc<TicketService>) -> Self {
        Self { service }
    }

    /// Process one request in the background.
    pub fn spawn(&self, request: SupportRequest, logs: LogBundle) -> JoinHandle<Result<PipelineOutcome>> {
        let service = Arc::clone(&self.service);
        let span = tracing::info_span!(
            "support_request",
            chain_address = %request.chain_address,
            log_hash = %request.log_hash
        );

        tokio::spawn(async move { process(&service, request, &logs).await }.instrument(span))
    }

    /// Cancel every in-flight request at its next retry wait.
    pub fn shutdown(&self) {
        tracing::info!("Cancelling in-flight support requests");
        self.service.cancel();
    }
}

/// Ticket first, then the log note on it.
pub async fn process(
    service: &TicketService,
    mut request: SupportRequest,
    logs: &LogBundle,
) -> Result<PipelineOutcome> {
    if request.email.is_empty() {
        request.email = resolve_email(service, &request.chain_address).await;
    }

    let ticket_id = service.create_ticket(&request).await?;
    let note = service.attach_log(ticket_id, logs).await?;

    tracing::info!(%ticket_id, file_name = logs.file_name(), "Support request delivered");
    Ok(PipelineOutcome { ticket_id, note })
}

/// Contact email on file for the address, or empty when there is none.
async fn resolve_email(service: &TicketService, address: &str) -> String {
    match service.find_partner_email(address).await {
        Ok(Some(email)) => email,
        Ok(None) => String::new(),
        Err(e) => {
            tracing::warn!(address, "Partner lookup failed, opening ticket without email: {}", e);
            String::new()
        }
    }
}
