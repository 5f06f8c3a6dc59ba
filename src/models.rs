use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Odoo model holding helpdesk tickets.
pub const TICKET_MODEL: &str = "helpdesk.ticket";
/// Odoo model holding chatter messages.
pub const MESSAGE_MODEL: &str = "mail.message";
/// Odoo model holding binary attachments.
pub const ATTACHMENT_MODEL: &str = "ir.attachment";
/// Odoo model holding contacts.
pub const PARTNER_MODEL: &str = "res.partner";

/// Priority every bridged ticket is opened with.
pub const TICKET_PRIORITY: &str = "3";
/// Helpdesk channel every bridged ticket is filed under.
pub const TICKET_CHANNEL_ID: i64 = 5;
/// Body of the note carrying the customer's logs.
pub const LOG_NOTE_BODY: &str = "Logs from user";

/// Odoo x2many command linking an existing record.
const LINK_COMMAND: i64 = 4;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Backend-assigned id of a `helpdesk.ticket` row
    TicketId
);
record_id!(
    /// Backend-assigned id of a `mail.message` row
    MessageId
);
record_id!(
    /// Backend-assigned id of an `ir.attachment` row
    AttachmentId
);
record_id!(
    /// Backend-assigned id of a `res.partner` row
    PartnerId
);

/// A customer support request observed on chain.
///
/// All fields are opaque to this crate and passed through unvalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportRequest {
    pub email: String,
    pub chain_address: String,
    pub phone: String,
    pub description: String,
    /// Content-addressed reference of the log bundle, e.g. an IPFS CID
    pub log_hash: String,
}

impl SupportRequest {
    pub fn ticket_name(&self) -> String {
        format!("Issue from {}", self.chain_address)
    }

    pub fn ticket_description(&self) -> String {
        format!("Hash: {} .Issue from HA: {}", self.log_hash, self.description)
    }
}

/// Payload of the `helpdesk.ticket` create call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTicket {
    pub name: String,
    pub description: String,
    pub priority: String,
    pub channel_id: i64,
    pub partner_email: String,
    pub phone: String,
}

impl From<&SupportRequest> for NewTicket {
    fn from(request: &SupportRequest) -> Self {
        Self {
            name: request.ticket_name(),
            description: request.ticket_description(),
            priority: TICKET_PRIORITY.to_string(),
            channel_id: TICKET_CHANNEL_ID,
            partner_email: request.email.clone(),
            phone: request.phone.clone(),
        }
    }
}

/// Payload of the `mail.message` create call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub body: String,
    pub model: String,
    pub res_id: TicketId,
}

impl NewMessage {
    pub fn log_note(ticket_id: TicketId) -> Self {
        Self {
            body: LOG_NOTE_BODY.to_string(),
            model: TICKET_MODEL.to_string(),
            res_id: ticket_id,
        }
    }
}

/// Payload of the `ir.attachment` create call. `datas` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAttachment {
    pub name: String,
    pub datas: String,
    pub res_model: String,
    pub res_id: TicketId,
}

/// Values of the `mail.message` write that links an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentLink {
    pub attachment_ids: Vec<(i64, AttachmentId)>,
}

impl AttachmentLink {
    pub fn append(attachment_id: AttachmentId) -> Self {
        Self {
            attachment_ids: vec![(LINK_COMMAND, attachment_id)],
        }
    }
}

/// Records produced by one successful note-with-attachment run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogNote {
    pub message_id: MessageId,
    pub attachment_id: AttachmentId,
}

/// Where the log bundle of a request lives once fetched from the content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBundle {
    Bytes { file_name: String, bytes: Vec<u8> },
    File { file_name: String, path: PathBuf },
}

impl LogBundle {
    pub fn file_name(&self) -> &str {
        match self {
            LogBundle::Bytes { file_name, .. } | LogBundle::File { file_name, .. } => file_name,
        }
    }
}
