//! Minimal model of an HTTP client with an interceptor chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::data::Tag;
use crate::effects::body::Body;
use crate::error::Result;

/// Outgoing request as seen by interceptors.
pub struct Request {
    pub method:  String,
    pub url:     String,
    pub headers: Vec<(String, String)>,
    pub body:    Body,
    pub tag:     Option<Tag>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method:  method.into(),
            url:     url.into(),
            headers: Vec::new(),
            body:    Body::empty(),
            tag:     None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self { Self::new("GET", url) }

    pub fn post(url: impl Into<String>) -> Self { Self::new("POST", url) }

    pub fn put(url: impl Into<String>) -> Self { Self::new("PUT", url) }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach an opaque value that progress listeners can read back.
    #[must_use]
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("tag", &self.tag.is_some())
            .finish()
    }
}

/// Incoming response. The body is read lazily.
#[derive(Debug)]
pub struct Response {
    pub status:  u16,
    pub url:     String,
    pub headers: Vec<(String, String)>,
    pub body:    Body,
}

impl Response {
    pub fn new(status: u16, url: impl Into<String>, body: Body) -> Self {
        Self {
            status,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    /// First header value with a case-insensitive name match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn into_body(self) -> Body { self.body }
}

/// Sends a request over the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Observes or rewrites an exchange on its way through the chain.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response>;
}

/// The rest of the chain, ending at the transport.
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    transport:    &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub async fn run(self, request: Request) -> Result<Response> {
        match self.interceptors.split_first() {
            Some((first, rest)) => {
                let next = Next {
                    interceptors: rest,
                    transport:    self.transport,
                };
                first.intercept(request, next).await
            }
            None => self.transport.send(request).await,
        }
    }
}

/// An ordered interceptor chain in front of a transport.
pub struct Chain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    transport:    Arc<dyn Transport>,
}

impl Chain {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            interceptors: Vec::new(),
            transport:    Arc::new(transport),
        }
    }

    /// Append an interceptor. It runs after every interceptor added before it.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) { self.interceptors.push(interceptor); }

    /// Whether this exact interceptor instance is in the chain.
    pub fn contains(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        self.interceptors
            .iter()
            .any(|existing| std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(interceptor)))
    }

    pub fn len(&self) -> usize { self.interceptors.len() }

    pub fn is_empty(&self) -> bool { self.interceptors.is_empty() }

    pub async fn execute(&self, request: Request) -> Result<Response> {
        Next {
            interceptors: &self.interceptors,
            transport:    self.transport.as_ref(),
        }
        .run(request)
        .await
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}
