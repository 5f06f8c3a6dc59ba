//! Retrying facade over a [`TicketBackend`].
//!
//! Ticket creation and log attachment are repeated under the service's
//! [`RetryPolicy`] until they succeed. With the default policy they never give
//! up, so a caller awaiting them waits out any backend outage.
//!
//! Repeating a create is not idempotent: if the backend stored the ticket but
//! the reply was lost, the next attempt opens a second ticket.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::TicketBackend;
use crate::models::{LogBundle, LogNote, SupportRequest, TicketId};
use crate::retry::{retry, RetryPolicy};
use crate::Result;

pub struct TicketService {
    backend: Arc<dyn TicketBackend>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl TicketService {
    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        Self {
            backend,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share a cancellation token with the host's shutdown logic
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Stop every retry loop running on this service at its next wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Create a ticket, retrying until the backend returns an id.
    ///
    /// # Errors
    ///
    /// Only `Cancelled`, or `RetryExhausted` under a bounded policy.
    pub async fn create_ticket(&self, request: &SupportRequest) -> Result<TicketId> {
        tracing::debug!(chain_address = %request.chain_address, "Creating ticket...");

        let ticket_id = retry(&self.policy, &self.cancel, "create_ticket", move |_| {
            self.backend.create_ticket(request)
        })
        .await?;

        tracing::debug!(%ticket_id, "Ticket created");
        Ok(ticket_id)
    }

    /// Attach the file at `file_path` to the ticket as a log note.
    ///
    /// The file is read again on every attempt; a read failure counts as a
    /// failed attempt.
    pub async fn create_note_with_attachment(
        &self,
        ticket_id: TicketId,
        file_name: &str,
        file_path: &Path,
    ) -> Result<LogNote> {
        tracing::debug!(%ticket_id, path = %file_path.display(), "Creating note...");

        let note = retry(&self.policy, &self.cancel, "create_note_with_attachment", move |_| async move {
            let bytes = tokio::fs::read(file_path).await.map_err(|e| {
                tracing::error!(path = %file_path.display(), "Couldn't read log file: {}", e);
                e
            })?;
            self.backend
                .create_note_with_attachment(ticket_id, file_name, &bytes)
                .await
        })
        .await?;

        tracing::debug!(%ticket_id, message_id = %note.message_id, "Note created");
        Ok(note)
    }

    /// Attach in-memory log bytes to the ticket as a log note.
    pub async fn attach_log_bytes(
        &self,
        ticket_id: TicketId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<LogNote> {
        tracing::debug!(%ticket_id, size = bytes.len(), "Creating note...");

        let note = retry(&self.policy, &self.cancel, "create_note_with_attachment", move |_| {
            self.backend
                .create_note_with_attachment(ticket_id, file_name, bytes)
        })
        .await?;

        tracing::debug!(%ticket_id, message_id = %note.message_id, "Note created");
        Ok(note)
    }

    pub async fn attach_log(&self, ticket_id: TicketId, logs: &LogBundle) -> Result<LogNote> {
        match logs {
            LogBundle::Bytes { file_name, bytes } => {
                self.attach_log_bytes(ticket_id, file_name, bytes).await
            }
            LogBundle::File { file_name, path } => {
                self.create_note_with_attachment(ticket_id, file_name, path)
                    .await
            }
        }
    }

    /// Single lookup, not retried. `Ok(None)` when no partner matches.
    pub async fn find_partner_email(&self, address: &str) -> Result<Option<String>> {
        self.backend.find_partner_email(address).await
    }
}
