//! Length-prefixed JSON frame codec.
//!
//! One logical event per frame: a u32 big-endian byte length followed by
//! exactly that many bytes of JSON.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

pub fn encode<T: Serialize>(frame: &T) -> anyhow::Result<Bytes> {
    let json = serde_json::to_vec(frame)?;
    let mut buf = BytesMut::with_capacity(4 + json.len());
    buf.put_u32(json.len() as u32);
    buf.put_slice(&json);
    Ok(buf.freeze())
}

/// Splits one frame's JSON payload off the front of `buf`, if a whole frame
/// has arrived.
pub fn decode(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return None;
    }
    buf.advance(4);
    Some(buf.split_to(len).freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_refresh_core::stream::StreamFrame;

    #[test]
    fn round_trips_one_frame_per_length_prefix() {
        let a = encode(&StreamFrame::Heartbeat { seq: 1 }).unwrap();
        let b = encode(&StreamFrame::Heartbeat { seq: 2 }).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);

        let first: serde_json::Value = serde_json::from_slice(&decode(&mut buf).unwrap()).unwrap();
        assert_eq!(first["seq"], 1);
        let second: serde_json::Value = serde_json::from_slice(&decode(&mut buf).unwrap()).unwrap();
        assert_eq!(second["seq"], 2);
        assert!(decode(&mut buf).is_none());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let frame = encode(&StreamFrame::Heartbeat { seq: 1 }).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..frame.len() - 1]);
        assert!(decode(&mut buf).is_none());
        buf.extend_from_slice(&frame[frame.len() - 1..]);
        assert!(decode(&mut buf).is_some());
    }
}
