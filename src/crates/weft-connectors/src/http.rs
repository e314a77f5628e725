//! HTTP connector
//!
//! A reqwest-backed `request` operation. Transport failures and 5xx/429
//! responses classify as retryable; other 4xx responses do not. A 2xx/3xx
//! response is the operation's output: `{ status, headers, body }`, with the
//! body parsed as JSON when the payload allows it.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use weft_registry::{
    ConnectorRuntime, ErrorKind, InvocationOutcome, InvocationRequest, InvokeContext, InvokeError,
    OpRole,
};

/// Runtime for the `http` connector
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Runtime over a default client
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Runtime over a caller-configured client (proxies, TLS, pools)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectorRuntime for HttpConnector {
    fn connector_id(&self) -> &str {
        "http"
    }

    fn supported_operations(&self) -> Vec<(String, OpRole)> {
        vec![("request".to_string(), OpRole::Action)]
    }

    async fn invoke(
        &self,
        request: InvocationRequest,
        ctx: &InvokeContext,
    ) -> Result<InvocationOutcome, InvokeError> {
        if request.operation != "request" {
            return Err(InvokeError::new(
                ErrorKind::UnknownOperation,
                format!("http has no operation '{}'", request.operation),
            ));
        }

        let url = request
            .params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| InvokeError::new(ErrorKind::Validation, "request requires a url"))?;
        let method = request
            .params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        let method: reqwest::Method = method.parse().map_err(|_| {
            InvokeError::new(ErrorKind::Validation, format!("invalid method '{}'", method))
        })?;

        let timeout = request
            .params
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(ctx.deadline);

        let mut builder = self.client.request(method, url).timeout(timeout);
        if let Some(headers) = request.params.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    builder = builder.header(name, value);
                }
            }
        }
        if let Some(body) = request.params.get("body") {
            if !body.is_null() {
                builder = builder.json(body);
            }
        }

        let response = tokio::select! {
            sent = builder.send() => sent.map_err(classify_transport)?,
            _ = ctx.cancel.cancelled() => {
                return Err(InvokeError::new(ErrorKind::CancelledByUser, "request canceled")
                    .with_retryable(false));
            }
        };

        let status = response.status();
        tracing::debug!(url, status = status.as_u16(), "HTTP request finished");
        if let Err(err) = classify_status(status) {
            return Err(err);
        }

        let mut headers = Map::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), json!(value));
            }
        }

        let text = response.text().await.map_err(classify_transport)?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(InvocationOutcome::with_output(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        })))
    }
}

fn classify_transport(err: reqwest::Error) -> InvokeError {
    if err.is_timeout() || err.is_connect() {
        InvokeError::new(ErrorKind::NetworkTimeout, err.to_string())
    } else {
        InvokeError::new(ErrorKind::Provider5xx, err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode) -> Result<(), InvokeError> {
    if status.as_u16() == 429 {
        return Err(InvokeError::new(
            ErrorKind::RateLimited,
            "429 Too Many Requests",
        ));
    }
    if status.is_server_error() {
        return Err(InvokeError::new(
            ErrorKind::Provider5xx,
            format!("server error: {}", status),
        ));
    }
    if status.is_client_error() {
        return Err(InvokeError::new(
            ErrorKind::Provider4xx,
            format!("client error: {}", status),
        ));
    }
    Ok(())
}
