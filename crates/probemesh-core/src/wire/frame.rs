//! CRC-checked frames
//!
//! The same framing carries direct UART traffic to a probe and relayed
//! traffic through the repeater mesh. Only mesh frames carry ids.
//!
//! ```text
//! Direct request : CA FE | CRC (2B LE) | type      |                            | len | payload
//! Direct response: CA FE | CRC (2B LE) | type      |                       | ok | len | payload
//! Mesh request   : CA FE | CRC (2B LE) | type      | req (4B)                   | len | payload
//! Mesh response  : CA FE | CRC (2B LE) | type|0x80 | req (4B) | resp (4B) | ok | len | payload
//! ```
//!
//! The CRC covers everything from the type byte to the end of the payload.
//! Direct frames look the same in both directions, so the caller names the
//! layout it expects with [`FrameFormat`].

use super::crc::crc16_ccitt;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sync marker opening every frame
pub const SYNC: [u8; 2] = [0xCA, 0xFE];

/// Set in the type byte of mesh responses
pub const RESPONSE_FLAG: u8 = 0x80;

/// Sync marker plus CRC
const PREFIX_LEN: usize = 4;

/// Largest payload the length byte can describe
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Mesh-space request identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl RequestId {
    /// Draw a fresh random id
    pub fn random() -> Self {
        RequestId(rand::random())
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({:08x})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Which layout to expect when decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Controller to probe over a direct link
    DirectRequest,
    /// Probe to controller over a direct link
    DirectResponse,
    /// Anything through a repeater; requests and responses are told apart
    /// by [`RESPONSE_FLAG`]
    Mesh,
}

/// Frame header variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    DirectRequest,
    DirectResponse {
        success: bool,
    },
    MeshRequest {
        request_id: RequestId,
    },
    MeshResponse {
        /// The responder's own id
        request_id: RequestId,
        /// The request being answered
        response_to: RequestId,
        success: bool,
    },
}

impl FrameKind {
    /// Header bytes between the CRC and the payload, length byte included
    fn header_len(&self) -> usize {
        match self {
            FrameKind::DirectRequest => 2,
            FrameKind::DirectResponse { .. } => 3,
            FrameKind::MeshRequest { .. } => 6,
            FrameKind::MeshResponse { .. } => 11,
        }
    }
}

/// A validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message class byte with [`RESPONSE_FLAG`] stripped
    pub message_type: u8,
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

/// Outcome of parsing the front of a buffer
enum Parsed {
    Frame(Frame, usize),
    Incomplete,
    Invalid,
}

impl Frame {
    pub fn direct_request(message_type: u8, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            kind: FrameKind::DirectRequest,
            payload,
        }
    }

    pub fn direct_response(message_type: u8, success: bool, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            kind: FrameKind::DirectResponse { success },
            payload,
        }
    }

    pub fn mesh_request(message_type: u8, request_id: RequestId, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            kind: FrameKind::MeshRequest { request_id },
            payload,
        }
    }

    pub fn mesh_response(
        message_type: u8,
        request_id: RequestId,
        response_to: RequestId,
        success: bool,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_type,
            kind: FrameKind::MeshResponse {
                request_id,
                response_to,
                success,
            },
            payload,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::DirectResponse { .. } | FrameKind::MeshResponse { .. }
        )
    }

    /// Device-reported success; requests are always `true`
    pub fn success(&self) -> bool {
        match self.kind {
            FrameKind::DirectResponse { success } | FrameKind::MeshResponse { success, .. } => {
                success
            }
            _ => true,
        }
    }

    /// Serialize to wire bytes
    ///
    /// Payloads longer than [`MAX_PAYLOAD`] are truncated.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = &self.payload[..self.payload.len().min(MAX_PAYLOAD)];
        let mut body = Vec::with_capacity(self.kind.header_len() + payload.len());

        match self.kind {
            FrameKind::DirectRequest => body.push(self.message_type),
            FrameKind::DirectResponse { success } => {
                body.push(self.message_type);
                body.push(success as u8);
            }
            FrameKind::MeshRequest { request_id } => {
                body.push(self.message_type & !RESPONSE_FLAG);
                body.extend_from_slice(&request_id.0.to_le_bytes());
            }
            FrameKind::MeshResponse {
                request_id,
                response_to,
                success,
            } => {
                body.push(self.message_type | RESPONSE_FLAG);
                body.extend_from_slice(&request_id.0.to_le_bytes());
                body.extend_from_slice(&response_to.0.to_le_bytes());
                body.push(success as u8);
            }
        }
        body.push(payload.len() as u8);
        body.extend_from_slice(payload);

        let mut out = Vec::with_capacity(PREFIX_LEN + body.len());
        out.extend_from_slice(&SYNC);
        out.extend_from_slice(&crc16_ccitt(&body).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Parse one frame from the start of `bytes`
    ///
    /// Returns `None` on sync mismatch, CRC mismatch or a declared length
    /// longer than the input. Trailing bytes after the frame are ignored.
    pub fn from_bytes(bytes: &[u8], format: FrameFormat) -> Option<Self> {
        match parse(bytes, format) {
            Parsed::Frame(frame, _) => Some(frame),
            Parsed::Incomplete | Parsed::Invalid => None,
        }
    }
}

fn parse(bytes: &[u8], format: FrameFormat) -> Parsed {
    let sync_len = bytes.len().min(SYNC.len());
    if bytes[..sync_len] != SYNC[..sync_len] {
        return Parsed::Invalid;
    }
    let Some(&type_byte) = bytes.get(PREFIX_LEN) else {
        return Parsed::Incomplete;
    };

    let header_len = match format {
        FrameFormat::DirectRequest => 2,
        FrameFormat::DirectResponse => 3,
        FrameFormat::Mesh if type_byte & RESPONSE_FLAG != 0 => 11,
        FrameFormat::Mesh => 6,
    };
    let Some(&len) = bytes.get(PREFIX_LEN + header_len - 1) else {
        return Parsed::Incomplete;
    };
    let total = PREFIX_LEN + header_len + len as usize;
    if bytes.len() < total {
        return Parsed::Incomplete;
    }

    let body = &bytes[PREFIX_LEN..total];
    let crc = LittleEndian::read_u16(&bytes[2..4]);
    if crc16_ccitt(body) != crc {
        return Parsed::Invalid;
    }

    let kind = match (format, header_len) {
        (FrameFormat::DirectRequest, _) => FrameKind::DirectRequest,
        (FrameFormat::DirectResponse, _) => FrameKind::DirectResponse {
            success: body[1] != 0,
        },
        (FrameFormat::Mesh, 6) => FrameKind::MeshRequest {
            request_id: RequestId(LittleEndian::read_u32(&body[1..5])),
        },
        (FrameFormat::Mesh, _) => FrameKind::MeshResponse {
            request_id: RequestId(LittleEndian::read_u32(&body[1..5])),
            response_to: RequestId(LittleEndian::read_u32(&body[5..9])),
            success: body[9] != 0,
        },
    };
    let message_type = match format {
        FrameFormat::Mesh => type_byte & !RESPONSE_FLAG,
        _ => type_byte,
    };

    let frame = Frame {
        message_type,
        kind,
        payload: body[header_len..].to_vec(),
    };
    Parsed::Frame(frame, total)
}

/// Streaming frame decoder for one link
///
/// Accepts arbitrary chunks of a byte stream and yields every complete,
/// CRC-valid frame. Garbage before a sync marker and frames that fail
/// validation are dropped, after which the decoder hunts for the next
/// sync marker.
#[derive(Debug)]
pub struct FrameDecoder {
    format: FrameFormat,
    buf: Vec<u8>,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            buf: Vec::new(),
            dropped: 0,
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Bytes discarded while resynchronising
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Feed received bytes; returns the frames completed by this chunk
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            match self.buf.windows(SYNC.len()).position(|w| w == SYNC) {
                Some(0) => {}
                Some(start) => self.discard(start),
                None => {
                    // A trailing first sync byte may be the start of a frame
                    let keep = usize::from(self.buf.last() == Some(&SYNC[0]));
                    self.discard(self.buf.len() - keep);
                    break;
                }
            }

            match parse(&self.buf, self.format) {
                Parsed::Frame(frame, consumed) => {
                    self.buf.drain(..consumed);
                    frames.push(frame);
                }
                Parsed::Incomplete => break,
                Parsed::Invalid => {
                    tracing::trace!("dropping invalid frame candidate");
                    self.discard(1);
                }
            }
        }

        frames
    }

    /// Forget any partial frame (e.g. after a reconnect)
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn discard(&mut self, count: usize) {
        self.dropped += count as u64;
        self.buf.drain(..count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_request_layout() {
        let frame = Frame::direct_request(0x04, vec![1, 0, 0, 0, 9, 0, 0, 0]);
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..2], &SYNC);
        assert_eq!(bytes[4], 0x04);
        assert_eq!(bytes[5], 8);
        assert_eq!(bytes.len(), 4 + 2 + 8);
        let crc = crc16_ccitt(&bytes[4..]);
        assert_eq!(&bytes[2..4], &crc.to_le_bytes());

        assert_eq!(Frame::from_bytes(&bytes, FrameFormat::DirectRequest), Some(frame));
    }

    #[test]
    fn test_direct_response_success_byte() {
        let frame = Frame::direct_response(0x03, false, vec![]);
        let bytes = frame.to_bytes();
        assert_eq!(bytes[5], 0);
        let decoded = Frame::from_bytes(&bytes, FrameFormat::DirectResponse).unwrap();
        assert!(!decoded.success());
        assert!(decoded.is_response());
    }

    #[test]
    fn test_mesh_frames() {
        let request = Frame::mesh_request(0x04, RequestId(0x1122_3344), vec![0xAA; 12]);
        let bytes = request.to_bytes();
        assert_eq!(bytes[4] & RESPONSE_FLAG, 0);
        assert_eq!(&bytes[5..9], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(Frame::from_bytes(&bytes, FrameFormat::Mesh), Some(request));

        let response = Frame::mesh_response(
            0x04,
            RequestId(7),
            RequestId(0x1122_3344),
            true,
            vec![1, 2, 3],
        );
        let bytes = response.to_bytes();
        assert_eq!(bytes[4], 0x84);
        let decoded = Frame::from_bytes(&bytes, FrameFormat::Mesh).unwrap();
        assert_eq!(decoded.message_type, 0x04);
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_rejects_bad_sync_crc_and_length() {
        let bytes = Frame::direct_request(0x09, vec![5, 6, 7]).to_bytes();

        let mut bad_sync = bytes.clone();
        bad_sync[1] = 0xFF;
        assert!(Frame::from_bytes(&bad_sync, FrameFormat::DirectRequest).is_none());

        let mut bad_crc = bytes.clone();
        bad_crc[2] ^= 0x01;
        assert!(Frame::from_bytes(&bad_crc, FrameFormat::DirectRequest).is_none());

        let mut bad_payload = bytes.clone();
        bad_payload[7] ^= 0x40;
        assert!(Frame::from_bytes(&bad_payload, FrameFormat::DirectRequest).is_none());

        assert!(Frame::from_bytes(&bytes[..bytes.len() - 1], FrameFormat::DirectRequest).is_none());
        assert!(Frame::from_bytes(&[], FrameFormat::DirectRequest).is_none());
    }

    #[test]
    fn test_decoder_split_chunks() {
        let frame = Frame::mesh_request(0x03, RequestId(99), vec![1, 2, 3, 4]);
        let bytes = frame.to_bytes();
        let mut decoder = FrameDecoder::new(FrameFormat::Mesh);

        assert!(decoder.feed(&bytes[..3]).is_empty());
        assert!(decoder.feed(&bytes[3..7]).is_empty());
        assert_eq!(decoder.feed(&bytes[7..]), vec![frame]);
    }

    #[test]
    fn test_decoder_resyncs_after_garbage() {
        let first = Frame::direct_response(0x06, true, vec![1]);
        let second = Frame::direct_response(0x09, true, b"1.2.3".to_vec());

        let mut corrupt = first.to_bytes();
        corrupt[7] ^= 0xFF;

        let mut stream = vec![0x00, 0xCA, 0x13, 0xFE];
        stream.extend_from_slice(&corrupt);
        stream.extend_from_slice(&[0xDE, 0xAD]);
        stream.extend_from_slice(&first.to_bytes());
        stream.extend_from_slice(&second.to_bytes());

        let mut decoder = FrameDecoder::new(FrameFormat::DirectResponse);
        let frames = decoder.feed(&stream);
        assert_eq!(frames, vec![first, second]);
        assert!(decoder.dropped() > 0);
    }

    #[test]
    fn test_decoder_keeps_trailing_sync_byte() {
        let frame = Frame::direct_request(0x08, vec![]);
        let bytes = frame.to_bytes();
        let mut decoder = FrameDecoder::new(FrameFormat::DirectRequest);

        let mut chunk = vec![0x55, 0x66];
        chunk.push(bytes[0]);
        assert!(decoder.feed(&chunk).is_empty());
        assert_eq!(decoder.feed(&bytes[1..]), vec![frame]);
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId(0xAB).to_string(), "000000ab");
    }
}
