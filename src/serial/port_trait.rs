//! Trait abstraction for the vehicle transport to enable testing

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// An open duplex byte pipe to the vehicle
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Owned, type-erased link
pub type BoxedLink = Box<dyn Link>;

/// Opens links on behalf of the session
///
/// The session calls [`open`](Connector::open) on every connect and drops the
/// returned link on disconnect.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh link
    async fn open(&self) -> Result<BoxedLink>;

    /// Human-readable endpoint name for logs
    fn describe(&self) -> String;
}

/// Wraps an already-open link; yields it once
///
/// Useful when the caller owns transport setup (TCP bridges, test pipes).
pub struct PreopenedConnector {
    link: tokio::sync::Mutex<Option<BoxedLink>>,
    name: String,
}

impl PreopenedConnector {
    pub fn new(link: BoxedLink, name: impl Into<String>) -> Self {
        Self {
            link: tokio::sync::Mutex::new(Some(link)),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Connector for PreopenedConnector {
    async fn open(&self) -> Result<BoxedLink> {
        self.link
            .lock()
            .await
            .take()
            .ok_or_else(|| crate::error::FlightLinkError::Serial(format!("{} already consumed", self.name)))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
