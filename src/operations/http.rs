use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use uuid::Uuid;

use crate::workflow::processors::upload::{TransportError, UploadPayload, UploadTransport};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Multipart POST transport.
///
/// Parts: `file` (original), `thumbnail`, `watermarked` and `metadata` (JSON).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(concat!("photopusher/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// `GET {base_url}/ping` must answer 200 before anything is pushed.
    pub async fn ping(&self, base_url: &str) -> Result<()> {
        let url = format!("{}/ping", base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", url))?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            bail!("{} answered {}", url, status);
        }
        info!("Endpoint {} is up", base_url);
        Ok(())
    }

    fn form(payload: &UploadPayload) -> Result<Form, TransportError> {
        let invalid = |err: reqwest::Error| TransportError::Invalid(err.to_string());
        let metadata = Part::text(payload.metadata.clone())
            .mime_str("application/json")
            .map_err(invalid)?;
        Ok(Form::new()
            .part(
                "file",
                Part::stream_with_length(payload.original.clone(), payload.original.len() as u64)
                    .file_name(payload.file_name.clone()),
            )
            .part(
                "thumbnail",
                Part::stream_with_length(payload.thumbnail.clone(), payload.thumbnail.len() as u64)
                    .file_name(payload.thumbnail_name.clone()),
            )
            .part(
                "watermarked",
                Part::stream_with_length(payload.watermarked.clone(), payload.watermarked.len() as u64)
                    .file_name(payload.watermarked_name.clone()),
            )
            .part("metadata", metadata))
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::Invalid(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn post(&self, url: &str, payload: &UploadPayload) -> Result<u16, TransportError> {
        let request_id = Uuid::new_v4().to_string();
        debug!("POST {} {} ({})", url, payload.file_name, request_id);

        let response = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, &payload.idempotency_key)
            .header(REQUEST_ID_HEADER, &request_id)
            .multipart(Self::form(payload)?)
            .send()
            .await
            .map_err(transport_error)?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaType;
    use bytes::Bytes;

    #[tokio::test]
    async fn unreachable_endpoints_are_connection_errors() {
        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let payload = UploadPayload {
            file_name: "photo1.jpg".into(),
            media_type: MediaType::Photo,
            idempotency_key: "key".into(),
            content_hash: "hash".into(),
            original: Bytes::from_static(b"original"),
            thumbnail_name: "thumb_photo1.jpg".into(),
            thumbnail: Bytes::from_static(b"thumb"),
            watermarked_name: "photo1.jpg".into(),
            watermarked: Bytes::from_static(b"stamped"),
            metadata: "{}".into(),
        };

        // Port 9 (discard) on loopback is closed on any sane test machine.
        let err = transport.post("http://127.0.0.1:9/photo", &payload).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn ping_fails_when_nothing_listens() {
        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        assert!(transport.ping("http://127.0.0.1:9").await.is_err());
    }
}
