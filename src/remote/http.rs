use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{Delivery, DeliveryError, DeliveryReceipt, OutgoingMessage};
use crate::config::RemoteConfig;

/// Longest error body kept in `last_error`.
const MAX_ERROR_BODY: usize = 200;

/// POSTs messages as JSON to the chat endpoint.
pub struct HttpDelivery {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendReply {
    #[serde(default)]
    session_id: Option<String>,
}

impl HttpDelivery {
    /// `timeout` caps a single request; the sync manager applies its own bound on top.
    pub fn new(config: &RemoteConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build delivery HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let mut request = self.client.post(&self.endpoint).json(message);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(DeliveryError::from_status(status.as_u16(), body));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        if bytes.is_empty() {
            return Ok(DeliveryReceipt::default());
        }

        // The message was accepted; an unreadable body only costs the session update.
        match serde_json::from_slice::<SendReply>(&bytes) {
            Ok(reply) => Ok(DeliveryReceipt {
                session_id: reply.session_id,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "could not decode send reply, keeping session");
                Ok(DeliveryReceipt::default())
            }
        }
    }
}

fn transport_error(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Timeout
    } else {
        DeliveryError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response; returns the endpoint URL and
    /// a handle yielding the raw request text.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });

        (format!("http://{addr}/api/chat"), handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn delivery(endpoint: String, token: Option<&str>) -> HttpDelivery {
        let config = RemoteConfig {
            endpoint,
            auth_token: token.map(str::to_string),
        };
        HttpDelivery::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn hello() -> OutgoingMessage {
        OutgoingMessage {
            client_id: "0190-abc".into(),
            content: "Hello".into(),
            session_id: None,
        }
    }

    #[tokio::test]
    async fn success_returns_session() {
        let (url, server) = serve_once("200 OK", r#"{"session_id":"s42","reply":"hi"}"#).await;
        let receipt = delivery(url, Some("tok")).deliver(&hello()).await.unwrap();
        assert_eq!(receipt.session_id.as_deref(), Some("s42"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/chat"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer tok"));
        assert!(request.contains(r#""client_message_id":"0190-abc""#));
        assert!(request.contains(r#""content":"Hello""#));
    }

    #[tokio::test]
    async fn undecodable_success_body_is_still_success() {
        let (url, _server) = serve_once("200 OK", "not json").await;
        let receipt = delivery(url, None).deliver(&hello()).await.unwrap();
        assert_eq!(receipt, DeliveryReceipt::default());
    }

    #[tokio::test]
    async fn unprocessable_entity_is_permanent() {
        let (url, _server) =
            serve_once("422 Unprocessable Entity", r#"{"error":"too long"}"#).await;
        let err = delivery(url, None).deliver(&hello()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected { status: 422, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn service_unavailable_is_retryable() {
        let (url, _server) = serve_once("503 Service Unavailable", "").await;
        let err = delivery(url, None).deliver(&hello()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Server { status: 503 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = delivery(format!("http://{addr}/api/chat"), None)
            .deliver(&hello())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert!(err.is_retryable());
    }
}
