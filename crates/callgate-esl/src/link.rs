//! Control link: the one shared connection to the switch
//!
//! The link is reconnect-on-demand. `acquire()` hands out the live
//! connection, or starts a connect attempt that every concurrent caller
//! awaits together. A failed attempt leaves the slot empty so the next
//! caller starts fresh.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::commands;
use crate::config::EslConfig;
use crate::connection::EslConnection;
use crate::errors::{EslError, Result};
use crate::event::LinkEvent;
use crate::executor;

type ConnectAttempt = Shared<BoxFuture<'static, Result<Arc<EslConnection>>>>;

enum Slot {
    Idle,
    Connecting {
        generation: u64,
        attempt: ConnectAttempt,
    },
    Ready(Arc<EslConnection>),
}

/// What the call-control layer needs from the switch: request/response
/// commands and the channel event stream.
#[async_trait]
pub trait SwitchControl: Send + Sync + 'static {
    /// Run `api <command> <args>` and return the trimmed reply body
    async fn api(&self, command: &str, args: &str, timeout: Duration) -> Result<String>;

    /// Fresh receiver on the channel event stream
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;
}

/// Owned handle to the switch connection
pub struct ControlLink {
    config: EslConfig,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    /// Outlives individual connections so subscriptions survive reconnects
    events: broadcast::Sender<LinkEvent>,
}

impl ControlLink {
    pub fn new(config: EslConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(16));
        Self {
            config,
            slot: Mutex::new(Slot::Idle),
            generation: AtomicU64::new(0),
            events,
        }
    }

    pub fn config(&self) -> &EslConfig {
        &self.config
    }

    /// Live connection, reusing a healthy one or connecting.
    pub async fn acquire(&self) -> Result<Arc<EslConnection>> {
        let (generation, attempt) = {
            let mut slot = self.slot.lock();
            let in_flight = match &*slot {
                Slot::Ready(conn) if conn.is_alive() => return Ok(Arc::clone(conn)),
                Slot::Connecting { generation, attempt } => Some((*generation, attempt.clone())),
                Slot::Ready(_) => {
                    debug!("Cached link is dead, reconnecting");
                    None
                }
                Slot::Idle => None,
            };
            match in_flight {
                Some(joined) => joined,
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    let attempt = Self::connect(self.config.clone(), self.events.clone())
                        .boxed()
                        .shared();
                    *slot = Slot::Connecting {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let result = attempt.await;

        let mut slot = self.slot.lock();
        let current = matches!(&*slot, Slot::Connecting { generation: g, .. } if *g == generation);
        match result {
            Ok(conn) => {
                if current {
                    *slot = Slot::Ready(Arc::clone(&conn));
                }
                Ok(conn)
            }
            Err(e) => {
                if current {
                    *slot = Slot::Idle;
                }
                Err(e)
            }
        }
    }

    async fn connect(
        config: EslConfig,
        events: broadcast::Sender<LinkEvent>,
    ) -> Result<Arc<EslConnection>> {
        let bound = config.connect_timeout;
        match tokio::time::timeout(bound, EslConnection::connect(&config, events)).await {
            Ok(Ok(conn)) => Ok(Arc::new(conn)),
            Ok(Err(e)) => {
                warn!(addr = %config.address(), "Control link connect failed: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!(addr = %config.address(), timeout_ms = bound.as_millis() as u64, "Control link connect timed out");
                Err(EslError::ConnectTimeout(bound))
            }
        }
    }

    /// Tear down the live connection, if any. Idempotent; close errors are
    /// logged, never returned.
    pub async fn release(&self) {
        let previous = {
            let mut slot = self.slot.lock();
            std::mem::replace(&mut *slot, Slot::Idle)
        };

        match previous {
            Slot::Ready(conn) => {
                let peer = conn.peer();
                if let Err(e) = conn.close().await {
                    debug!(%peer, "Error closing control link: {}", e);
                }
                info!(%peer, "Control link released");
            }
            Slot::Connecting { .. } => debug!("Released link while a connect was in flight"),
            Slot::Idle => {}
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Ready(conn) if conn.is_alive())
    }

    /// Number of live event subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Switch version string; doubles as a liveness probe
    pub async fn ping(&self) -> Result<String> {
        self.api(commands::VERSION, "", self.config.api_timeout).await
    }
}

#[async_trait]
impl SwitchControl for ControlLink {
    async fn api(&self, command: &str, args: &str, timeout: Duration) -> Result<String> {
        let conn = self.acquire().await?;
        executor::execute(&conn, command, args, timeout).await
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}
