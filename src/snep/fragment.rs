//! Splitting messages into LLCP frames and putting them back together.

use bytes::{Bytes, BytesMut};

use super::wire::Header;
use crate::error::{ProtocolError, Result};

/// Split `message` into frames of at most `miu` bytes.
///
/// An empty message yields no frames.
pub fn split(message: &Bytes, miu: usize) -> Vec<Bytes> {
    let miu = miu.max(1);
    let mut frames = Vec::with_capacity(message.len().div_ceil(miu));
    let mut offset = 0;
    while offset < message.len() {
        let end = (offset + miu).min(message.len());
        frames.push(message.slice(offset..end));
        offset = end;
    }
    frames
}

/// Outcome of feeding a frame to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// More frames are needed.
    Pending,
    /// The declared length has been reached.
    Complete { header: Header, information: Bytes },
}

/// Collects frames of one SNEP message.
///
/// The header is checked as soon as all six bytes are in; a bad version or
/// an oversized length fails the push that completed the header.
#[derive(Debug)]
pub struct Reassembler {
    buf: BytesMut,
    header: Option<Header>,
    max_information: usize,
}

impl Reassembler {
    pub fn new(max_information: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            header: None,
            max_information,
        }
    }

    /// Header of the message being collected, once known.
    pub fn header(&self) -> Option<Header> {
        self.header
    }

    /// Information bytes still missing, `None` until the header is known.
    pub fn missing(&self) -> Option<usize> {
        self.header
            .map(|h| (h.length as usize).saturating_sub(self.buf.len()))
    }

    pub fn push(&mut self, frame: &[u8]) -> Result<Assembly> {
        self.buf.extend_from_slice(frame);
        if self.header.is_none() {
            if self.buf.len() < Header::SIZE {
                return Ok(Assembly::Pending);
            }
            let header = Header::parse(&mut self.buf).ok_or(ProtocolError::InvalidFormat)?;
            header.validate(self.max_information)?;
            self.buf.reserve(header.length as usize);
            self.header = Some(header);
        }
        let Some(header) = self.header else {
            return Ok(Assembly::Pending);
        };
        let expected = header.length as usize;
        if self.buf.len() > expected {
            // Trailing bytes beyond the declared length belong to nothing
            self.buf.truncate(expected);
        }
        if self.buf.len() < expected {
            return Ok(Assembly::Pending);
        }
        let information = self.buf.split().freeze();
        self.header = None;
        Ok(Assembly::Complete {
            header,
            information,
        })
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::snep::wire::{encode, MAX_INFORMATION};

    #[test]
    fn test_split_sizes() {
        let message = Bytes::from(vec![7u8; 300]);
        let frames = split(&message, 128);
        let sizes: Vec<_> = frames.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![128, 128, 44]);
        assert!(split(&Bytes::new(), 128).is_empty());
    }

    #[test]
    fn test_header_split_across_frames() {
        let message = encode(0x02, b"hello");
        let mut reassembler = Reassembler::new(MAX_INFORMATION);
        assert_eq!(reassembler.push(&message[..3]).unwrap(), Assembly::Pending);
        assert!(reassembler.header().is_none());
        assert_eq!(reassembler.push(&message[3..8]).unwrap(), Assembly::Pending);
        assert_eq!(reassembler.missing(), Some(3));
        match reassembler.push(&message[8..]).unwrap() {
            Assembly::Complete { header, information } => {
                assert_eq!(header.code, 0x02);
                assert_eq!(&information[..], b"hello");
            }
            Assembly::Pending => panic!("message should be complete"),
        }
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_oversized_length_rejected_on_first_frame() {
        let mut reassembler = Reassembler::new(16);
        let message = encode(0x02, &[0u8; 17]);
        assert_eq!(
            reassembler.push(&message[..Header::SIZE]),
            Err(Error::Protocol(ProtocolError::ExcessData))
        );
    }
}
