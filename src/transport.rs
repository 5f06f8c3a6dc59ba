//! JSON-RPC transport to Odoo.
//!
//! Odoo serves its `common` and `object` services on `/jsonrpc`; the request
//! envelope names the service, the method and its positional arguments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::OdooConfig;
use crate::{HelpdeskError, Result};

/// A single remote procedure call against an Odoo service.
///
/// Implementations make exactly one attempt and never retry.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: RpcParams<'a>,
    id: u64,
}

#[derive(Serialize)]
struct RpcParams<'a> {
    service: &'a str,
    method: &'a str,
    args: Vec<Value>,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Deserialize)]
struct RpcFault {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcFaultData>,
}

#[derive(Deserialize)]
struct RpcFaultData {
    #[serde(default)]
    message: Option<String>,
}

impl RpcFault {
    fn into_error(self) -> HelpdeskError {
        // Odoo puts the actual exception text in data.message
        let message = match self.data.and_then(|d| d.message) {
            Some(detail) if !detail.is_empty() => format!("{}: {}", self.message, detail),
            _ => self.message,
        };
        HelpdeskError::Rpc {
            code: self.code,
            message,
        }
    }
}

/// HTTP transport speaking Odoo's JSON-RPC dialect.
#[derive(Debug)]
pub struct JsonRpcTransport {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(config: &OdooConfig) -> Result<Self> {
        Self::with_timeout(config, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(config: &OdooConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HelpdeskError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.rpc_endpoint(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RpcTransport for JsonRpcTransport {
    async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method: "call",
            params: RpcParams {
                service,
                method,
                args,
            },
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| HelpdeskError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HelpdeskError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let envelope = response
            .json::<RpcResponse>()
            .await
            .map_err(|e| HelpdeskError::InvalidResponse(e.to_string()))?;

        match (envelope.error, envelope.result) {
            (Some(fault), _) => Err(fault.into_error()),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}
