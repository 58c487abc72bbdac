//! Per-client stream sessions.

use crate::frames;
use bytes::Bytes;
use futures::prelude::*;
use glimpse_refresh_core::stream::{CloseReason, ErrorFrame, StreamFrame, HEARTBEAT_INTERVAL};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Frames buffered per client before the session is closed as a slow
/// consumer.
pub const QUEUE_CAPACITY: usize = 64;

pub type StreamingBody = http_body_util::combinators::BoxBody<Bytes, std::convert::Infallible>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("send queue full")]
    SlowConsumer,
    #[error("client disconnected")]
    Gone,
    #[error("frame encoding failed: {0}")]
    Encode(#[from] anyhow::Error),
}

/// Server-side handle to one client's bounded send queue.
pub struct Session {
    tx: mpsc::Sender<Bytes>,
}

/// Creates a session and the HTTP response body that drains it.
pub fn channel() -> (Session, StreamingBody) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let body = http_body_util::BodyExt::boxed(http_body_util::StreamBody::new(
        ReceiverStream::new(rx).map(|bytes| Ok(http_body::Frame::data(bytes))),
    ));
    (Session { tx }, body)
}

impl Session {
    pub fn send<T: Serialize>(&self, frame: &T) -> Result<(), SessionError> {
        let bytes = frames::encode(frame)?;
        match self.tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SessionError::SlowConsumer),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::Gone),
        }
    }

    /// Best-effort terminal error frame. The queue may already be full; a
    /// slow consumer loses the courtesy frame.
    pub fn close(&self, reason: CloseReason, message: impl Into<String>) {
        let frame = StreamFrame::Error(ErrorFrame::new(reason, message));
        let _ = self.send(&frame);
    }
}

/// Shared session skeleton: forwards frames from a source stream, emits
/// heartbeats, and closes with a typed terminal frame on shutdown, source
/// exhaustion, or a slow consumer.
pub async fn pump(
    mut source: impl Stream<Item = StreamFrame> + Unpin,
    session: Session,
    shutdown: drain::Watch,
) {
    let release = shutdown.signaled();
    tokio::pin!(release);
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The immediate first tick doubles as a liveness probe for the client.
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut release => {
                session.close(CloseReason::Shutdown, "refresh subsystem shutting down");
                return;
            }
            _ = heartbeat.tick() => {
                seq += 1;
                if let Err(error) = session.send(&StreamFrame::Heartbeat { seq }) {
                    debug!(%error, "Closing session");
                    session.close(CloseReason::SlowConsumer, error.to_string());
                    return;
                }
            }
            frame = source.next() => match frame {
                Some(frame) => {
                    if let Err(error) = session.send(&frame) {
                        debug!(%error, "Closing session");
                        session.close(CloseReason::SlowConsumer, error.to_string());
                        return;
                    }
                }
                None => {
                    session.close(CloseReason::StreamError, "stream source ended");
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn drain_frames(body: &mut StreamingBody) -> Vec<serde_json::Value> {
        let mut buf = BytesMut::new();
        while let Some(Ok(frame)) =
            futures::FutureExt::now_or_never(body.frame()).flatten()
        {
            if let Some(data) = frame.data_ref() {
                buf.extend_from_slice(data);
            }
        }
        let mut out = Vec::new();
        while let Some(json) = crate::frames::decode(&mut buf) {
            out.push(serde_json::from_slice(&json).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn slow_consumers_are_closed() {
        let (session, mut body) = channel();
        for seq in 0..QUEUE_CAPACITY as u64 {
            session.send(&StreamFrame::Heartbeat { seq }).unwrap();
        }
        assert!(matches!(
            session.send(&StreamFrame::Heartbeat { seq: 999 }),
            Err(SessionError::SlowConsumer)
        ));

        let frames = drain_frames(&mut body);
        assert_eq!(frames.len(), QUEUE_CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_heartbeats_and_terminates_on_source_end() {
        let (session, mut body) = channel();
        let (signal, shutdown) = drain::channel();
        let (tx, rx) = mpsc::channel::<StreamFrame>(8);

        let task = tokio::spawn(pump(ReceiverStream::new(rx), session, shutdown));
        tokio::task::yield_now().await;

        tx.send(StreamFrame::Heartbeat { seq: 42 }).await.unwrap();
        drop(tx);
        task.await.unwrap();
        drop(signal);

        let frames = drain_frames(&mut body);
        // Initial heartbeat, the forwarded frame, then the terminal error.
        assert_eq!(frames[0]["type"], "heartbeat");
        assert!(frames.iter().any(|f| f["seq"] == 42));
        let last = frames.last().unwrap();
        assert_eq!(last["type"], "error");
        assert_eq!(last["reason"], "streamError");
        assert!(last["reconnectAfterMs"].as_u64().unwrap() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_closes_on_shutdown() {
        let (session, mut body) = channel();
        let (signal, shutdown) = drain::channel();
        let (_tx, rx) = mpsc::channel::<StreamFrame>(8);

        let task = tokio::spawn(pump(ReceiverStream::new(rx), session, shutdown));
        tokio::task::yield_now().await;
        signal.drain().await;
        task.await.unwrap();

        let frames = drain_frames(&mut body);
        let last = frames.last().unwrap();
        assert_eq!(last["type"], "error");
        assert_eq!(last["reason"], "shutdown");
    }
}
