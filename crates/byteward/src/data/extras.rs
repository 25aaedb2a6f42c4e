use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::data::progress::Direction;
use crate::error::{Error, Result};

/// Opaque caller value carried from a request into its progress events.
pub type Tag = Arc<dyn Any + Send + Sync>;

/// Strip every whitespace character (spaces, tabs, newlines) from a URL.
///
/// Two URLs that normalize to the same string share one dispatch key.
///
/// # Examples
///
/// ```
/// use byteward::normalize;
///
/// assert_eq!(normalize(" http://x/a\tb\n"), "http://x/ab");
/// assert_eq!(normalize(" \t\n"), "");
/// ```
pub fn normalize(url: &str) -> String { url.chars().filter(|c| !c.is_whitespace()).collect() }

/// Registry key: a direction plus a non-empty normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    direction: Direction,
    url:       Arc<str>,
}

impl ListenerKey {
    /// Build a key, rejecting URLs that normalize to an empty string.
    pub fn new(direction: Direction, url: &str) -> Result<Self> {
        let normalized = normalize(url);
        if normalized.is_empty() {
            return Err(Error::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            direction,
            url: Arc::from(normalized),
        })
    }

    pub fn direction(&self) -> Direction { self.direction }

    pub fn url(&self) -> &str { &self.url }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.url)
    }
}

struct Exchange {
    id:             u64,
    normalized_url: Arc<str>,
    tag:            Option<Tag>,
}

/// Per-exchange identity used to key listener dispatch.
///
/// Built once when an exchange enters the interceptor. The request and
/// response stages hold the same underlying exchange, so listeners on both
/// directions see one consistently keyed stream.
#[derive(Clone)]
pub struct Extras {
    exchange:  Arc<Exchange>,
    direction: Direction,
}

impl Extras {
    /// Identity for a standalone transfer, outside any exchange.
    pub fn new(url: &str, direction: Direction) -> Self { Self::for_exchange(0, url, direction, None) }

    pub(crate) fn for_exchange(id: u64, url: &str, direction: Direction, tag: Option<Tag>) -> Self {
        Self {
            exchange: Arc::new(Exchange {
                id,
                normalized_url: Arc::from(normalize(url)),
                tag,
            }),
            direction,
        }
    }

    /// The same exchange seen from the other body.
    #[must_use]
    pub fn with_direction(&self, direction: Direction) -> Self {
        Self {
            exchange: Arc::clone(&self.exchange),
            direction,
        }
    }

    pub fn normalized_url(&self) -> &str { &self.exchange.normalized_url }

    pub fn direction(&self) -> Direction { self.direction }

    /// Exchange counter assigned by the owning operation (0 when standalone).
    pub fn id(&self) -> u64 { self.exchange.id }

    pub fn tag(&self) -> Option<&Tag> { self.exchange.tag.as_ref() }

    /// Downcast the caller tag.
    pub fn tag_as<T: Any>(&self) -> Option<&T> { self.tag()?.downcast_ref::<T>() }

    /// An empty normalized URL can never be used for registry lookups.
    pub fn is_valid(&self) -> bool { !self.exchange.normalized_url.is_empty() }

    /// Returns `true` when both values were built for the same exchange.
    pub fn same_exchange(&self, other: &Extras) -> bool { Arc::ptr_eq(&self.exchange, &other.exchange) }

    pub fn key(&self) -> Result<ListenerKey> {
        if !self.is_valid() {
            return Err(Error::InvalidUrl(String::new()));
        }
        Ok(ListenerKey {
            direction: self.direction,
            url:       Arc::clone(&self.exchange.normalized_url),
        })
    }
}

impl fmt::Debug for Extras {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extras")
            .field("id", &self.exchange.id)
            .field("normalized_url", &self.exchange.normalized_url)
            .field("direction", &self.direction)
            .field("tag", &self.exchange.tag.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}
