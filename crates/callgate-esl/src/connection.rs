//! One authenticated event socket connection

use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::EslConfig;
use crate::errors::{EslError, Result};
use crate::event::{ChannelEvent, LinkEvent};
use crate::protocol::{encode_command, parse_event_body, Frame, FrameDecoder, FrameKind};

/// Replies arrive in the order commands were written, so waiters queue FIFO.
#[derive(Default)]
struct ReplyQueue {
    closed: bool,
    waiters: VecDeque<oneshot::Sender<Frame>>,
}

impl ReplyQueue {
    /// Mark closed and drop every waiter; their receivers observe the close.
    fn close(&mut self) -> usize {
        self.closed = true;
        let dropped = self.waiters.len();
        self.waiters.clear();
        dropped
    }
}

/// Authenticated connection with a background reader.
///
/// Command replies are routed to waiters in send order; channel events are
/// published on the broadcast sender handed in at connect time.
pub struct EslConnection {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    replies: Arc<SyncMutex<ReplyQueue>>,
    alive: Arc<AtomicBool>,
    events: broadcast::Sender<LinkEvent>,
    reader: JoinHandle<()>,
}

impl EslConnection {
    /// Connect, authenticate and subscribe to the configured events.
    ///
    /// Not time-bounded by itself; the link wraps it in the connect timeout.
    #[instrument(skip_all, fields(addr = %config.address()))]
    pub async fn connect(
        config: &EslConfig,
        events: broadcast::Sender<LinkEvent>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(config.address())
            .await
            .map_err(|e| EslError::ConnectFailed(e.to_string()))?;
        let peer = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        let (mut read_half, mut write_half) = stream.into_split();
        let mut decoder = FrameDecoder::new();

        let greeting = read_frame(&mut read_half, &mut decoder).await?;
        if greeting.kind() != FrameKind::AuthRequest {
            return Err(EslError::Protocol(format!(
                "expected auth/request, got {:?}",
                greeting.content_type()
            )));
        }

        write_line(&mut write_half, &format!("auth {}", config.password)).await?;
        let auth = read_reply(&mut read_half, &mut decoder).await?;
        if !auth.is_ok_reply() {
            return Err(EslError::AuthFailed(auth.reply_body()));
        }
        debug!("Authenticated with switch");

        if !config.events.is_empty() {
            write_line(&mut write_half, &format!("event plain {}", config.events.join(" "))).await?;
            let reply = read_reply(&mut read_half, &mut decoder).await?;
            if !reply.is_ok_reply() {
                return Err(EslError::Protocol(format!(
                    "event subscription refused: {}",
                    reply.reply_body()
                )));
            }
        }

        let replies = Arc::new(SyncMutex::new(ReplyQueue::default()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            read_half,
            decoder,
            Arc::clone(&replies),
            Arc::clone(&alive),
            events.clone(),
        ));

        info!(%peer, events = ?config.events, "Control link connected");

        Ok(Self {
            peer,
            writer: Mutex::new(write_half),
            replies,
            alive,
            events,
            reader,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Write one command and return the receiver for its reply.
    ///
    /// The receiver errors if the connection closes before the reply
    /// arrives. Dropping this future mid-write tears the connection down:
    /// the socket may hold a partial frame and the queued waiter would
    /// otherwise take the next command's reply.
    pub async fn send(&self, line: &str) -> Result<oneshot::Receiver<Frame>> {
        let frame = encode_command(line)?;
        let (tx, rx) = oneshot::channel();

        // queue position and write order must agree
        let mut writer = self.writer.lock().await;
        {
            let mut replies = self.replies.lock();
            if replies.closed {
                return Err(EslError::ConnectionClosed);
            }
            replies.waiters.push_back(tx);
        }

        let mut pending = PendingWrite {
            conn: self,
            done: false,
        };
        let written = writer.write_all(&frame).await;
        pending.done = true;

        if let Err(e) = written {
            warn!(peer = %self.peer, "Command write failed: {}", e);
            self.poison(format!("write failed: {}", e));
            return Err(e.into());
        }

        Ok(rx)
    }

    /// Mark the connection dead, fail every pending reply and tell
    /// subscribers the link is gone.
    fn poison(&self, reason: String) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        self.reader.abort();
        let dropped = self.replies.lock().close();
        warn!(peer = %self.peer, %reason, dropped, "Control link poisoned");
        let _ = self.events.send(LinkEvent::Disconnected { reason });
    }

    /// Close the socket. Pending commands resolve as closed and subscribers
    /// are told the link went away.
    pub async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::Release);
        self.reader.abort();
        let dropped = self.replies.lock().close();
        if dropped > 0 {
            debug!(dropped, "Dropped pending replies on close");
        }
        let _ = self.events.send(LinkEvent::Disconnected {
            reason: "released".to_string(),
        });

        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(b"exit\n\n").await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// Armed while a command frame is being written
struct PendingWrite<'a> {
    conn: &'a EslConnection,
    done: bool,
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.conn.poison("command write interrupted".to_string());
        }
    }
}

impl Drop for EslConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frame(read_half: &mut OwnedReadHalf, decoder: &mut FrameDecoder) -> Result<Frame> {
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(frame);
        }
        let n = read_half.read_buf(decoder.buffer_mut()).await?;
        if n == 0 {
            return Err(EslError::ConnectionClosed);
        }
    }
}

/// Next `command/reply` during the handshake, skipping anything else
async fn read_reply(read_half: &mut OwnedReadHalf, decoder: &mut FrameDecoder) -> Result<Frame> {
    loop {
        let frame = read_frame(read_half, decoder).await?;
        match frame.kind() {
            FrameKind::CommandReply => return Ok(frame),
            FrameKind::DisconnectNotice => return Err(EslError::ConnectionClosed),
            other => debug!(kind = ?other, "Skipping frame during handshake"),
        }
    }
}

async fn write_line(write_half: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    let frame = encode_command(line)?;
    write_half.write_all(&frame).await?;
    Ok(())
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    mut decoder: FrameDecoder,
    replies: Arc<SyncMutex<ReplyQueue>>,
    alive: Arc<AtomicBool>,
    events: broadcast::Sender<LinkEvent>,
) {
    let reason = loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => match read_half.read_buf(decoder.buffer_mut()).await {
                Ok(0) => break "closed by peer".to_string(),
                Ok(_) => continue,
                Err(e) => break format!("read error: {}", e),
            },
            Err(e) => break e.to_string(),
        };

        match frame.kind() {
            FrameKind::CommandReply | FrameKind::ApiResponse => {
                let waiter = replies.lock().waiters.pop_front();
                match waiter {
                    // receiver may have timed out already
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => debug!("Unsolicited reply dropped"),
                }
            }
            FrameKind::Event => {
                let headers = parse_event_body(frame.body.as_deref().unwrap_or_default());
                if let Some(event) = ChannelEvent::from_headers(headers) {
                    // no subscribers is fine
                    let _ = events.send(LinkEvent::Channel(Arc::new(event)));
                }
            }
            FrameKind::DisconnectNotice => break "disconnect notice".to_string(),
            FrameKind::AuthRequest => warn!("Unexpected auth/request on live link"),
            FrameKind::Other(content_type) => debug!(%content_type, "Ignoring frame"),
        }
    };

    alive.store(false, Ordering::Release);
    let dropped = replies.lock().close();
    warn!(%reason, dropped, "Control link closed");
    let _ = events.send(LinkEvent::Disconnected { reason });
}
