//! Gateway collaborators
//!
//! The fleet core only sees the [`Session`] and [`SessionFactory`] traits and the
//! two dispatch events it cares about. `client` holds the live websocket session,
//! `metadata` the one-shot `/gateway/bot` lookup.

pub mod client;
pub mod event;
pub mod metadata;

use {async_trait::async_trait, thiserror::Error, tokio::sync::mpsc};

pub use client::{GatewaySession, GatewaySessionFactory};
pub use event::{GatewayEvent, GuildCreate, Ready, UnavailableGuild};
pub use metadata::{GatewayBot, GatewayBotClient, MetadataError, MetadataSource, SessionStartLimit};

/// Shard tuple sent in Identify: `[id, count]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardInfo {
    pub id: u32,
    pub count: u32,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed gateway payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed before Hello")]
    ClosedBeforeHello,
}

/// One shard's connection to the gateway
///
/// `open` returns the stream of dispatch events for this shard. `close` must be
/// idempotent; the caller drops the receiver before closing.
#[async_trait]
pub trait Session: Send {
    async fn open(&mut self) -> Result<mpsc::Receiver<GatewayEvent>, GatewayError>;

    async fn close(&mut self);
}

/// Builds one session per shard index
pub trait SessionFactory: Send + Sync {
    fn create(&self, shard: ShardInfo) -> Box<dyn Session>;
}
