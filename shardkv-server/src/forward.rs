use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use shardkv_core::{KvError, Result};

/// Marks a request that was already proxied once by another node.
pub const FORWARDED_HEADER: &str = "x-shardkv-forwarded";

/// Proxies data-plane requests to the node that owns the key.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Replay `path_and_query` against `address` and stream the owner's
    /// response back unchanged, whatever its status.
    pub async fn forward(&self, address: &str, path_and_query: &str) -> Result<Response> {
        let url = format!("http://{}{}", address, path_and_query);

        let upstream = self
            .client
            .get(&url)
            .header(FORWARDED_HEADER, "1")
            .send()
            .await
            .map_err(|error| KvError::Http(error.to_string()))?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let content_type = upstream
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| HeaderValue::from_bytes(value.as_bytes()).ok());

        let mut response = (status, Body::from_stream(upstream.bytes_stream())).into_response();
        if let Some(content_type) = content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }

        Ok(response)
    }
}
