use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::OdooConfig;
use crate::models::{
    AttachmentId, AttachmentLink, LogNote, MessageId, NewAttachment, NewMessage, NewTicket,
    PartnerId, SupportRequest, TicketId, ATTACHMENT_MODEL, MESSAGE_MODEL, PARTNER_MODEL,
    TICKET_MODEL,
};
use crate::transport::{JsonRpcTransport, RpcTransport};
use crate::{HelpdeskError, Result};

/// Single-attempt operations against the ticketing backend.
#[async_trait]
pub trait TicketBackend: Send + Sync {
    async fn create_ticket(&self, request: &SupportRequest) -> Result<TicketId>;

    async fn create_note_with_attachment(
        &self,
        ticket_id: TicketId,
        file_name: &str,
        file_bytes: &[u8],
    ) -> Result<LogNote>;

    async fn find_partner_email(&self, address: &str) -> Result<Option<String>>;
}

/// Authenticated session against an Odoo instance.
///
/// The session identity is fixed at construction and read-only afterwards,
/// so one client can be shared by any number of concurrent callers.
pub struct OdooClient {
    transport: Arc<dyn RpcTransport>,
    database: String,
    password: String,
    uid: i64,
}

impl OdooClient {
    /// Authenticate over HTTP JSON-RPC.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` when the backend rejects the credentials, or
    /// the transport error when it cannot be reached. There is no reconnect.
    pub async fn connect(config: &OdooConfig) -> Result<Self> {
        let transport = Arc::new(JsonRpcTransport::new(config)?);
        Self::connect_with(config, transport).await
    }

    /// Authenticate over a caller-supplied transport.
    pub async fn connect_with(config: &OdooConfig, transport: Arc<dyn RpcTransport>) -> Result<Self> {
        config.validate()?;

        let reply = transport
            .call(
                "common",
                "authenticate",
                vec![
                    json!(config.database),
                    json!(config.username),
                    json!(config.password),
                    json!({}),
                ],
            )
            .await
            .map_err(|e| {
                tracing::error!("Couldn't connect to the db: {}", e);
                e
            })?;

        let uid = record_id(&reply).ok_or_else(|| {
            tracing::error!(user = %config.username, "Couldn't connect to the db: credentials rejected");
            HelpdeskError::AuthenticationFailed
        })?;

        tracing::debug!(uid, database = %config.database, "Connection established");

        Ok(Self {
            transport,
            database: config.database.clone(),
            password: config.password.clone(),
            uid,
        })
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    /// Look up the partner whose name equals `address` exactly.
    pub async fn find_partner_id(&self, address: &str) -> Result<Option<PartnerId>> {
        let found = self
            .execute_kw(
                PARTNER_MODEL,
                "search",
                vec![json!([["name", "=", address]])],
                None,
            )
            .await?;

        let ids = found.as_array().ok_or_else(|| {
            HelpdeskError::InvalidResponse(format!("res.partner.search returned {found}"))
        })?;
        let partner_id = ids.first().and_then(record_id).map(PartnerId);

        tracing::debug!(?partner_id, address, "Partner search finished");
        Ok(partner_id)
    }

    async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Option<Value>,
    ) -> Result<Value> {
        let mut params = vec![
            json!(self.database),
            json!(self.uid),
            json!(self.password),
            json!(model),
            json!(method),
            Value::Array(args),
        ];
        if let Some(kwargs) = kwargs {
            params.push(kwargs);
        }

        self.transport.call("object", "execute_kw", params).await
    }

    async fn create<T: Serialize + Sync>(&self, model: &'static str, values: &T) -> Result<i64> {
        let values = serde_json::to_value(values)
            .map_err(|e| HelpdeskError::InvalidResponse(e.to_string()))?;
        let reply = self.execute_kw(model, "create", vec![values], None).await?;

        record_id(&reply).ok_or(HelpdeskError::EmptyResult {
            model,
            method: "create",
        })
    }

    async fn attach(&self, ticket_id: TicketId, file_name: &str, file_bytes: &[u8]) -> Result<LogNote> {
        let message_id = MessageId(self.create(MESSAGE_MODEL, &NewMessage::log_note(ticket_id)).await?);

        let attachment = NewAttachment {
            name: file_name.to_string(),
            datas: STANDARD.encode(file_bytes),
            res_model: TICKET_MODEL.to_string(),
            res_id: ticket_id,
        };
        let attachment_id = match self.create(ATTACHMENT_MODEL, &attachment).await {
            Ok(id) => AttachmentId(id),
            Err(e) => {
                tracing::warn!(%message_id, %ticket_id, "Log note left without attachment");
                return Err(e);
            }
        };

        let link = serde_json::to_value(AttachmentLink::append(attachment_id))
            .map_err(|e| HelpdeskError::InvalidResponse(e.to_string()))?;
        let linked = self
            .execute_kw(MESSAGE_MODEL, "write", vec![json!([message_id]), link], None)
            .await?;

        if !is_truthy(&linked) {
            tracing::warn!(%message_id, %attachment_id, "Attachment not linked to log note");
            return Err(HelpdeskError::EmptyResult {
                model: MESSAGE_MODEL,
                method: "write",
            });
        }

        Ok(LogNote {
            message_id,
            attachment_id,
        })
    }

    async fn lookup_partner_email(&self, address: &str) -> Result<Option<String>> {
        let Some(partner_id) = self.find_partner_id(address).await? else {
            tracing::error!("Couldn't find partner for {}", address);
            return Ok(None);
        };

        let records = self
            .execute_kw(
                PARTNER_MODEL,
                "read",
                vec![json!([partner_id])],
                Some(json!({ "fields": ["email"] })),
            )
            .await?;

        // Odoo sends `false` for an unset char field
        let email = records
            .get(0)
            .and_then(|record| record.get("email"))
            .and_then(Value::as_str)
            .filter(|email| !email.is_empty())
            .map(str::to_string);

        tracing::debug!(%partner_id, ?email, "Found partner's email");
        Ok(email)
    }
}

#[async_trait]
impl TicketBackend for OdooClient {
    /// Create a helpdesk ticket for the request
    async fn create_ticket(&self, request: &SupportRequest) -> Result<TicketId> {
        let ticket = NewTicket::from(request);

        let ticket_id = self.create(TICKET_MODEL, &ticket).await.map_err(|e| {
            tracing::error!("Couldn't create ticket: {}", e);
            e
        })?;

        Ok(TicketId(ticket_id))
    }

    /// Post a log note on the ticket and attach the file to it.
    ///
    /// Message, attachment and link are three separate calls; a failure after
    /// the first leaves the earlier records in place.
    async fn create_note_with_attachment(
        &self,
        ticket_id: TicketId,
        file_name: &str,
        file_bytes: &[u8],
    ) -> Result<LogNote> {
        self.attach(ticket_id, file_name, file_bytes)
            .await
            .map_err(|e| {
                tracing::error!(%ticket_id, "Couldn't create note: {}", e);
                e
            })
    }

    /// Resolve a partner's email from their chain address
    async fn find_partner_email(&self, address: &str) -> Result<Option<String>> {
        self.lookup_partner_email(address).await.map_err(|e| {
            tracing::error!("Couldn't find partner for {}: {}", address, e);
            e
        })
    }
}

/// A positive integer id; `false`, `null` and `0` mean nothing was created.
fn record_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().filter(|id| *id > 0),
        Value::Array(ids) if ids.len() == 1 => record_id(&ids[0]),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_i64() != Some(0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct RecordedCall {
        pub service: String,
        pub method: String,
        pub args: Vec<Value>,
    }

    impl RecordedCall {
        /// Model and method of an `execute_kw` call
        pub fn target(&self) -> (&str, &str) {
            (
                self.args[3].as_str().unwrap_or_default(),
                self.args[4].as_str().unwrap_or_default(),
            )
        }
    }

    /// Replays canned replies in order and records every call.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Value>>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::default(),
            })
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value> {
            self.calls.lock().unwrap().push(RecordedCall {
                service: service.to_string(),
                method: method.to_string(),
                args,
            });
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(HelpdeskError::Transport("no scripted reply".into())))
        }
    }

    fn config() -> OdooConfig {
        OdooConfig::new("http://odoo.test", "helpdesk", "bot", "secret").unwrap()
    }

    fn request() -> SupportRequest {
        SupportRequest {
            email: "a@b.com".to_string(),
            chain_address: "5Grwva".to_string(),
            phone: "123".to_string(),
            description: "device offline".to_string(),
            log_hash: "Qm123".to_string(),
        }
    }

    /// Counts events logged at ERROR.
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_errors() -> (Arc<AtomicUsize>, tracing::subscriber::DefaultGuard) {
        let errors = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));
        (errors, tracing::subscriber::set_default(subscriber))
    }

    async fn connected(replies: Vec<Result<Value>>) -> (OdooClient, Arc<ScriptedTransport>) {
        let mut script = vec![Ok(json!(2))];
        script.extend(replies);
        let transport = ScriptedTransport::new(script);
        let client = OdooClient::connect_with(&config(), transport.clone()).await.unwrap();
        (client, transport)
    }

    #[tokio::test]
    async fn authenticates_once_with_credentials() {
        let (client, transport) = connected(vec![]).await;

        assert_eq!(client.uid(), 2);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].service, "common");
        assert_eq!(calls[0].method, "authenticate");
        assert_eq!(calls[0].args, vec![json!("helpdesk"), json!("bot"), json!("secret"), json!({})]);
    }

    #[tokio::test]
    async fn rejected_credentials_are_fatal() {
        for reply in [json!(false), json!(0)] {
            let transport = ScriptedTransport::new(vec![Ok(reply)]);
            let result = OdooClient::connect_with(&config(), transport).await;
            assert!(matches!(result, Err(HelpdeskError::AuthenticationFailed)));
        }
    }

    #[tokio::test]
    async fn unreachable_backend_fails_construction() {
        let transport = ScriptedTransport::new(vec![Err(HelpdeskError::Transport(
            "connection refused".into(),
        ))]);
        let result = OdooClient::connect_with(&config(), transport).await;
        assert!(matches!(result, Err(HelpdeskError::Transport(_))));
    }

    #[tokio::test]
    async fn create_ticket_sends_ticket_record() {
        let (client, transport) = connected(vec![Ok(json!(17))]).await;

        let ticket_id = client.create_ticket(&request()).await.unwrap();

        assert_eq!(ticket_id, TicketId(17));
        let call = &transport.calls()[1];
        assert_eq!(call.method, "execute_kw");
        assert_eq!(call.target(), ("helpdesk.ticket", "create"));
        assert_eq!(&call.args[..3], &[json!("helpdesk"), json!(2), json!("secret")]);

        let record = &call.args[5][0];
        assert_eq!(record["name"], "Issue from 5Grwva");
        let description = record["description"].as_str().unwrap();
        assert!(description.contains("Hash: Qm123"));
        assert!(description.contains("device offline"));
        assert_eq!(record["priority"], "3");
        assert_eq!(record["channel_id"], 5);
        assert_eq!(record["partner_email"], "a@b.com");
        assert_eq!(record["phone"], "123");
    }

    #[tokio::test]
    async fn falsy_ticket_id_is_a_failure() {
        let (client, _) = connected(vec![Ok(json!(false))]).await;

        let err = client.create_ticket(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            HelpdeskError::EmptyResult { model: "helpdesk.ticket", method: "create" }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn backend_fault_is_returned() {
        let (client, _) = connected(vec![Err(HelpdeskError::Rpc {
            code: 200,
            message: "Odoo Server Error".into(),
        })])
        .await;

        let err = client.create_ticket(&request()).await.unwrap_err();
        assert!(matches!(err, HelpdeskError::Rpc { code: 200, .. }));
    }

    #[tokio::test]
    async fn note_creates_message_attachment_then_link() {
        let (client, transport) = connected(vec![Ok(json!(31)), Ok(json!(47)), Ok(json!(true))]).await;

        let note = client
            .create_note_with_attachment(TicketId(17), "logs.zip", b"hello")
            .await
            .unwrap();

        assert_eq!(note.message_id, MessageId(31));
        assert_eq!(note.attachment_id, AttachmentId(47));

        let calls = transport.calls();
        assert_eq!(calls.len(), 4);

        assert_eq!(calls[1].target(), ("mail.message", "create"));
        assert_eq!(
            calls[1].args[5][0],
            json!({ "body": "Logs from user", "model": "helpdesk.ticket", "res_id": 17 })
        );

        assert_eq!(calls[2].target(), ("ir.attachment", "create"));
        assert_eq!(
            calls[2].args[5][0],
            json!({ "name": "logs.zip", "datas": "aGVsbG8=", "res_model": "helpdesk.ticket", "res_id": 17 })
        );

        assert_eq!(calls[3].target(), ("mail.message", "write"));
        assert_eq!(calls[3].args[5], json!([[31], { "attachment_ids": [[4, 47]] }]));
    }

    #[tokio::test]
    async fn link_is_skipped_when_attachment_create_fails() {
        let (client, transport) = connected(vec![Ok(json!(31)), Ok(json!(false))]).await;

        let err = client
            .create_note_with_attachment(TicketId(17), "logs.zip", b"hello")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HelpdeskError::EmptyResult { model: "ir.attachment", method: "create" }
        ));
        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.service != "object" || c.target().1 != "write"));
    }

    #[tokio::test]
    async fn nothing_follows_a_failed_message_create() {
        let (client, transport) =
            connected(vec![Err(HelpdeskError::Transport("timed out".into()))]).await;

        let result = client
            .create_note_with_attachment(TicketId(17), "logs.zip", b"hello")
            .await;

        assert!(result.is_err());
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn unlinked_attachment_reports_failure() {
        let (client, _) = connected(vec![Ok(json!(31)), Ok(json!(47)), Ok(json!(false))]).await;

        let err = client
            .create_note_with_attachment(TicketId(17), "logs.zip", b"hello")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HelpdeskError::EmptyResult { model: "mail.message", method: "write" }
        ));
    }

    #[tokio::test]
    async fn partner_email_found_by_exact_name() {
        let (client, transport) = connected(vec![
            Ok(json!([9])),
            Ok(json!([{ "id": 9, "email": "owner@example.com" }])),
        ])
        .await;

        let email = client.find_partner_email("5Grwva").await.unwrap();

        assert_eq!(email.as_deref(), Some("owner@example.com"));
        let calls = transport.calls();
        assert_eq!(calls[1].target(), ("res.partner", "search"));
        assert_eq!(calls[1].args[5], json!([[["name", "=", "5Grwva"]]]));
        assert_eq!(calls[2].target(), ("res.partner", "read"));
        assert_eq!(calls[2].args[5], json!([[9]]));
        assert_eq!(calls[2].args[6], json!({ "fields": ["email"] }));
    }

    #[tokio::test]
    async fn partner_miss_is_not_an_error() {
        let (client, transport) = connected(vec![Ok(json!([]))]).await;

        assert_eq!(client.find_partner_email("5Grwva").await.unwrap(), None);
        // no read after an empty search
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn partner_without_email_is_not_found() {
        let (client, _) = connected(vec![Ok(json!([9])), Ok(json!([{ "id": 9, "email": false }]))]).await;

        assert_eq!(client.find_partner_email("5Grwva").await.unwrap(), None);
    }

    #[tokio::test]
    async fn partner_search_fault_is_reported() {
        let (client, transport) =
            connected(vec![Err(HelpdeskError::Transport("connection reset".into()))]).await;
        let (errors, _guard) = count_errors();

        let result = client.find_partner_email("5Grwva").await;

        assert!(matches!(result, Err(HelpdeskError::Transport(_))));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        // no read after a failed search
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn malformed_partner_search_is_reported() {
        let (client, _) = connected(vec![Ok(json!(false))]).await;
        let (errors, _guard) = count_errors();

        let result = client.find_partner_email("5Grwva").await;

        assert!(matches!(result, Err(HelpdeskError::InvalidResponse(_))));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partner_read_fault_is_reported() {
        let (client, _) = connected(vec![
            Ok(json!([9])),
            Err(HelpdeskError::Rpc {
                code: 200,
                message: "res.partner: access denied".into(),
            }),
        ])
        .await;
        let (errors, _guard) = count_errors();

        let result = client.find_partner_email("5Grwva").await;

        assert!(matches!(result, Err(HelpdeskError::Rpc { code: 200, .. })));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn record_id_rejects_falsy_values() {
        assert_eq!(record_id(&json!(5)), Some(5));
        assert_eq!(record_id(&json!([5])), Some(5));
        assert_eq!(record_id(&json!(0)), None);
        assert_eq!(record_id(&json!(false)), None);
        assert_eq!(record_id(&Value::Null), None);
        assert_eq!(record_id(&json!(-1)), None);
    }
}
