//! Connection pump.
//!
//! Bridges one WebSocket connection to its room. Two loops run concurrently:
//!
//! - the read loop forwards binary frames to the room actor and enforces the
//!   read deadline, which every successful read (including pongs) refreshes
//! - the write loop drains the client's [`Outbox`] to the socket, sends a ping
//!   whenever the connection has been quiet for a ping period, and bounds
//!   every write by the write deadline
//!
//! Whichever loop ends first ends the pump. The client is then unregistered
//! and the socket closed, on every exit path.
//!
//! The room never waits on a client: it enqueues with
//! [`ClientSink::try_send`], and a full outbox gets the client evicted.
//! The replay snapshot handed over at registration travels on a separate
//! channel that is drained first and does not count against the outbound
//! capacity, so a long buffer cannot evict a joiner before it has read a byte.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use hubbub_core::{ClientSink, SinkError};
use hubbub_proto::{ClientId, DEFAULT_MAX_MESSAGE_SIZE};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{
        Notify,
        mpsc::{self, error::TrySendError},
    },
    time::{self, Instant, MissedTickBehavior},
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, warn};

use crate::{error::ServerError, room_task::RoomHandle};

/// Per-connection limits and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpConfig {
    /// Outbound queue capacity, in frames.
    pub outbound_capacity: usize,
    /// Quiet time after which the write loop sends a ping.
    pub ping_period: Duration,
    /// Read deadline. Must exceed `ping_period` so a pong can arrive.
    pub pong_wait: Duration,
    /// Deadline for each socket write.
    pub write_wait: Duration,
    /// Largest inbound message forwarded to the room.
    pub max_message_size: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Room-side end of a client's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    replay: mpsc::UnboundedSender<Bytes>,
    frames: mpsc::Sender<Bytes>,
    shutdown: Arc<Notify>,
}

impl Outbox {
    /// Whether both ends belong to the same connection.
    pub fn same_connection(&self, other: &Self) -> bool {
        self.frames.same_channel(&other.frames)
    }
}

impl ClientSink for Outbox {
    fn try_send(&self, frame: Bytes) -> Result<(), SinkError> {
        self.frames.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn replay(&self, frames: Vec<Bytes>) -> Result<(), SinkError> {
        frames
            .into_iter()
            .try_for_each(|frame| self.replay.send(frame).map_err(|_| SinkError::Closed))
    }

    fn close(&self) {
        self.shutdown.notify_one();
    }
}

/// Connection-side end of a client's outbound queue.
#[derive(Debug)]
pub struct OutboxReceiver {
    replay: mpsc::UnboundedReceiver<Bytes>,
    frames: mpsc::Receiver<Bytes>,
    shutdown: Arc<Notify>,
}

impl OutboxReceiver {
    /// Next queued frame, or `None` once the room has closed the outbox.
    ///
    /// A close wins over queued frames. Replayed frames come before live ones.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            biased;
            () = self.shutdown.notified() => None,
            Some(frame) = self.replay.recv() => Some(frame),
            frame = self.frames.recv() => frame,
        }
    }
}

/// Create a bounded outbound queue.
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (replay_tx, replay_rx) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shutdown = Arc::new(Notify::new());
    let outbox = Outbox { replay: replay_tx, frames: tx, shutdown: Arc::clone(&shutdown) };
    (outbox, OutboxReceiver { replay: replay_rx, frames: rx, shutdown })
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Disconnect {
    /// Peer sent a close frame or the stream ended.
    #[error("peer closed the connection")]
    PeerClosed,
    /// Nothing was read within the read deadline.
    #[error("read deadline expired")]
    ReadTimeout,
    /// A write did not complete within the write deadline.
    #[error("write deadline expired")]
    WriteTimeout,
    /// The room closed the outbox (eviction or room shutdown).
    #[error("closed by the room")]
    Evicted,
    /// The room actor is gone.
    #[error("room is closed")]
    RoomClosed,
    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Run a connection against `room` until either side ends it.
///
/// # Errors
///
/// Returns [`ServerError::Room`] if the room refuses the client. The peer is
/// told why in a close frame.
pub async fn serve<S>(
    ws: WebSocketStream<S>,
    room: RoomHandle,
    config: &PumpConfig,
) -> Result<Disconnect, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (outbox, mut inbox) = outbox(config.outbound_capacity);
    let (mut sink, mut stream) = ws.split();

    let id = match room.register(outbox.clone()).await {
        Ok(id) => id,
        Err(e) => {
            let frame = CloseFrame { code: CloseCode::Again, reason: e.to_string().into() };
            let _ = time::timeout(config.write_wait, sink.send(Message::Close(Some(frame)))).await;
            return Err(e.into());
        },
    };
    debug!(room = room.room_id(), client = id, "pump started");

    let reason = tokio::select! {
        reason = read_loop(&mut stream, &room, id, &outbox, config) => reason,
        reason = write_loop(&mut sink, &mut inbox, config) => reason,
    };

    room.unregister(id, outbox).await;
    let _ = time::timeout(config.write_wait, sink.close()).await;

    match &reason {
        Disconnect::PeerClosed => debug!(room = room.room_id(), client = id, "peer closed"),
        other => warn!(room = room.room_id(), client = id, reason = %other, "connection dropped"),
    }
    Ok(reason)
}

async fn read_loop<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    room: &RoomHandle,
    id: ClientId,
    outbox: &Outbox,
    config: &PumpConfig,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = match time::timeout(config.pong_wait, stream.next()).await {
            Err(_) => return Disconnect::ReadTimeout,
            Ok(None) => return Disconnect::PeerClosed,
            Ok(Some(Err(e))) => return Disconnect::Transport(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Binary(frame) => {
                if frame.is_empty() || frame.len() > config.max_message_size {
                    debug!(client = id, len = frame.len(), "frame size out of bounds, dropped");
                    continue;
                }
                if room.receive(id, outbox, frame).await.is_err() {
                    return Disconnect::RoomClosed;
                }
            },
            Message::Text(_) => debug!(client = id, "text frame dropped"),
            Message::Close(_) => return Disconnect::PeerClosed,
            // Pings are answered by the transport.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {},
        }
    }
}

async fn write_loop<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    inbox: &mut OutboxReceiver,
    config: &PumpConfig,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let period = config.ping_period.max(Duration::from_millis(1));
    let mut keepalive = time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            frame = inbox.recv() => match frame {
                Some(frame) => Message::Binary(frame),
                None => return Disconnect::Evicted,
            },
            _ = keepalive.tick() => Message::Ping(Bytes::new()),
        };

        match time::timeout(config.write_wait, sink.send(message)).await {
            Ok(Ok(())) => keepalive.reset(),
            Ok(Err(e)) => return Disconnect::Transport(e.to_string()),
            Err(_) => return Disconnect::WriteTimeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_outbox_refuses_without_waiting() {
        let (outbox, _inbox) = outbox(2);

        assert_eq!(outbox.try_send(Bytes::from_static(b"a")), Ok(()));
        assert_eq!(outbox.try_send(Bytes::from_static(b"b")), Ok(()));
        assert_eq!(outbox.try_send(Bytes::from_static(b"c")), Err(SinkError::Full));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (outbox, inbox) = outbox(2);
        drop(inbox);

        assert_eq!(outbox.try_send(Bytes::new()), Err(SinkError::Closed));
    }

    #[test]
    fn connection_identity() {
        let (a, _a_rx) = outbox(1);
        let (b, _b_rx) = outbox(1);

        assert!(a.same_connection(&a.clone()));
        assert!(!a.same_connection(&b));
    }

    #[tokio::test]
    async fn replay_bypasses_capacity_and_comes_first() {
        let (outbox, mut inbox) = outbox(2);
        let snapshot: Vec<Bytes> = (0..5u8).map(|i| Bytes::from(vec![i])).collect();

        outbox.replay(snapshot.clone()).unwrap();
        outbox.try_send(Bytes::from_static(b"live-1")).unwrap();
        outbox.try_send(Bytes::from_static(b"live-2")).unwrap();
        assert_eq!(outbox.try_send(Bytes::from_static(b"live-3")), Err(SinkError::Full));

        let mut received = Vec::new();
        for _ in 0..7 {
            received.push(inbox.recv().await.unwrap());
        }
        let mut expected = snapshot;
        expected.extend([Bytes::from_static(b"live-1"), Bytes::from_static(b"live-2")]);
        assert_eq!(received, expected);
    }

    #[test]
    fn replay_to_dropped_receiver_reports_closed() {
        let (outbox, inbox) = outbox(2);
        drop(inbox);

        assert_eq!(outbox.replay(vec![Bytes::new()]), Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn close_wins_over_queued_frames() {
        let (outbox, mut inbox) = outbox(4);
        outbox.try_send(Bytes::from_static(b"queued")).unwrap();

        assert_eq!(inbox.recv().await, Some(Bytes::from_static(b"queued")));

        outbox.try_send(Bytes::from_static(b"late")).unwrap();
        outbox.close();
        assert_eq!(inbox.recv().await, None);
    }
}
