//! Remote endpoint abstraction and an HTTP implementation.
//!
//! The engine only needs to hand one operation at a time to the remote and
//! learn how delivery went. The actual HTTP client is abstracted via a trait
//! so hosts can plug in reqwest, hyper or a platform fetch API.

use crate::error::DeliveryError;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use stride_oplog::PendingOperation;

/// Header carrying the operation's idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Where pending operations are delivered.
///
/// Delivery is at-least-once: the same operation may arrive more than once
/// (for example when an acknowledgement is lost), always with the same
/// idempotency key.
pub trait RemoteEndpoint: Send + Sync {
    /// Delivers one operation.
    ///
    /// `Ok(())` means the remote durably accepted it and it may be removed
    /// from the log.
    fn deliver(
        &self,
        op: &PendingOperation,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

impl<E: RemoteEndpoint + ?Sized> RemoteEndpoint for Arc<E> {
    fn deliver(
        &self,
        op: &PendingOperation,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send {
        (**self).deliver(op)
    }
}

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Returns the first value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (DNS, TLS, reset).
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    fn post(&self, request: HttpRequest)
        -> impl Future<Output = Result<HttpResponse, String>> + Send;
}

/// Delivers operations by POSTing their payload to `{base_url}/{kind}`.
///
/// Status mapping:
///
/// | Status            | Result                        |
/// |-------------------|-------------------------------|
/// | 2xx               | delivered                     |
/// | 401, 403          | [`DeliveryError::Auth`]       |
/// | 409               | [`DeliveryError::Conflict`]   |
/// | 408, 429, 5xx     | [`DeliveryError::Server`]     |
/// | other 4xx         | [`DeliveryError::Validation`] |
pub struct HttpEndpoint<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpEndpoint<C> {
    /// Creates a new HTTP endpoint.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the message of the most recent failed delivery.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn request_for(&self, op: &PendingOperation) -> HttpRequest {
        HttpRequest {
            url: format!("{}/{}", self.base_url, op.kind),
            headers: vec![
                (IDEMPOTENCY_HEADER.to_string(), op.idempotency_key.to_string()),
                ("Content-Type".to_string(), "application/cbor".to_string()),
            ],
            body: op.payload.clone(),
        }
    }

    fn record(&self, result: Result<(), DeliveryError>) -> Result<(), DeliveryError> {
        match &result {
            Ok(()) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        result
    }
}

/// Maps an HTTP status to a delivery outcome.
pub fn classify_status(status: u16, body: &[u8]) -> Result<(), DeliveryError> {
    const MAX_MESSAGE: usize = 256;

    if (200..300).contains(&status) {
        return Ok(());
    }

    let mut message = String::from_utf8_lossy(body).trim().to_string();
    if message.len() > MAX_MESSAGE {
        let mut end = MAX_MESSAGE;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    if message.is_empty() {
        message = format!("HTTP {status}");
    }

    Err(match status {
        401 | 403 => DeliveryError::Auth(message),
        409 => DeliveryError::Conflict(message),
        408 | 429 | 500..=599 => DeliveryError::server(status, message),
        400..=499 => DeliveryError::Validation(message),
        _ => DeliveryError::server(status, message),
    })
}

impl<C: HttpClient> RemoteEndpoint for HttpEndpoint<C> {
    async fn deliver(&self, op: &PendingOperation) -> Result<(), DeliveryError> {
        let request = self.request_for(op);
        tracing::trace!(id = op.id, url = %request.url, "posting operation");

        let result = match self.client.post(request).await {
            Ok(response) => classify_status(response.status, &response.body),
            Err(e) => Err(DeliveryError::Network(e)),
        };
        self.record(result)
    }
}
