//! PHDC manager service.
//!
//! Personal Health Device agents connect on `urn:nfc:sn:phdc` and exchange
//! IEEE 11073 APDUs, each preceded by its length:
//!
//! ```text
//! +------------------+---------------------+
//! | length (u16, BE) |  APDU (length bytes) |
//! +------------------+---------------------+
//! ```
//!
//! A framed APDU may span several LLCP frames. Complete APDUs are published
//! as [`EngineEvent::PhdcReceived`]; replies go back through the attached
//! [`PhdcChannel`].

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::handles::Socket;
use crate::runtime::{Activation, EngineEvent, EventEmitter, Service};

const LENGTH_SIZE: usize = 2;

/// Prefix `apdu` with its length.
pub fn encode_apdu(apdu: &[u8]) -> Result<Bytes> {
    let len = u16::try_from(apdu.len()).map_err(|_| Error::InvalidParam("APDU longer than 65535 bytes"))?;
    let mut buf = BytesMut::with_capacity(LENGTH_SIZE + apdu.len());
    buf.put_u16(len);
    buf.put_slice(apdu);
    Ok(buf.freeze())
}

/// Collects length-prefixed APDUs from a frame stream.
#[derive(Debug, Default)]
pub struct ApduReader {
    buf: BytesMut,
}

impl ApduReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: &[u8]) {
        self.buf.extend_from_slice(frame);
    }

    /// Next complete APDU, if one is buffered.
    pub fn next_apdu(&mut self) -> Option<Bytes> {
        if self.buf.len() < LENGTH_SIZE {
            return None;
        }
        let len = usize::from(u16::from_be_bytes([self.buf[0], self.buf[1]]));
        if self.buf.len() < LENGTH_SIZE + len {
            return None;
        }
        self.buf.advance(LENGTH_SIZE);
        Some(self.buf.split_to(len).freeze())
    }
}

/// Sends APDUs back to the agent of one PHDC connection.
#[derive(Clone)]
pub struct PhdcChannel {
    socket: Arc<Socket>,
    sending: Arc<Mutex<()>>,
}

impl PhdcChannel {
    fn new(socket: Arc<Socket>) -> Self {
        Self {
            socket,
            sending: Arc::new(Mutex::new(())),
        }
    }

    /// Frame and send one APDU.
    ///
    /// Concurrent senders are serialized so their frames never interleave.
    pub async fn send(&self, apdu: &[u8]) -> Result<()> {
        let framed = encode_apdu(apdu)?;
        let _guard = self.sending.lock().await;
        let miu = usize::from(self.socket.miu());
        for chunk in framed.chunks(miu) {
            self.socket.send(Bytes::copy_from_slice(chunk)).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for PhdcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhdcChannel")
            .field("socket", &self.socket.id())
            .finish()
    }
}

/// PHDC manager, registered on `urn:nfc:sn:phdc` when enabled.
#[derive(Debug, Default)]
pub struct PhdcServer;

impl PhdcServer {
    pub fn new() -> Self {
        Self
    }
}

async fn serve(socket: Arc<Socket>, events: EventEmitter) {
    let channel = PhdcChannel::new(Arc::clone(&socket));
    let mut reader = ApduReader::new();
    loop {
        let frame = match socket.receive().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("PHDC connection {} done: {}", socket.id(), e);
                break;
            }
        };
        reader.push(&frame);
        while let Some(apdu) = reader.next_apdu() {
            debug!("PHDC APDU of {} bytes on {}", apdu.len(), socket.id());
            events.emit(EngineEvent::PhdcReceived {
                apdu,
                channel: channel.clone(),
            });
        }
    }
}

impl Service for PhdcServer {
    fn name(&self) -> &str {
        "phdc"
    }

    fn activate(&self, activation: Activation) {
        let (socket, events, runtime) = activation.into_parts();
        info!("PHDC agent connected on {}", socket.id());
        runtime.spawn(serve(Arc::new(socket), events));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_spans_frames() {
        let first = encode_apdu(b"\xE2\x00\x00\x32").unwrap();
        let second = encode_apdu(b"\xE7\x00").unwrap();
        let mut stream = BytesMut::new();
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&second);

        let mut reader = ApduReader::new();
        reader.push(&stream[..1]);
        assert!(reader.next_apdu().is_none());
        reader.push(&stream[1..5]);
        assert!(reader.next_apdu().is_none());
        reader.push(&stream[5..]);
        assert_eq!(reader.next_apdu().as_deref(), Some(&b"\xE2\x00\x00\x32"[..]));
        assert_eq!(reader.next_apdu().as_deref(), Some(&b"\xE7\x00"[..]));
        assert!(reader.next_apdu().is_none());
    }

    #[test]
    fn test_encode_rejects_oversized() {
        assert_eq!(encode_apdu(&[]).unwrap().as_ref(), &[0, 0]);
        assert!(encode_apdu(&vec![0u8; 70_000]).is_err());
    }
}
