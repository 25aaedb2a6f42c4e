use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};

use crate::effects::body::Body;
use crate::effects::chain::{Request, Response, Transport};
use crate::error::{Error, Result};

/// Production transport backed by `reqwest`.
///
/// Request bodies are streamed, so byte counting follows what the connection
/// actually pulls from the body.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self { Self { client } }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::Transport(format!("invalid method {:?}: {e}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if !request.body.is_empty() {
            if let Some(length) = request.body.content_length() {
                builder = builder.header(CONTENT_LENGTH, length);
            }
            if let Some(content_type) = request.body.content_type() {
                builder = builder.header(CONTENT_TYPE, content_type);
            }
            let stream = request.body.into_stream()?;
            builder = builder.body(reqwest::Body::wrap_stream(stream));
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = header_pairs(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let length = response.content_length();
        let mut body = Body::from_stream(response.bytes_stream().map(|chunk| chunk.map_err(Error::from)), length);
        if let Some(content_type) = content_type {
            body = body.with_content_type(content_type);
        }

        let mut response = Response::new(status, url, body);
        response.headers = headers;
        Ok(response)
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
        .collect()
}
