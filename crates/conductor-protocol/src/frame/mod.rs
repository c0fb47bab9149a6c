//! Length-prefixed framing for wire records.
//!
//! Every frame starts with a fixed 8-byte header in network byte order:
//!
//! | Offset | Size | Field       |
//! |--------|------|-------------|
//! | 0      | 4    | total length, header included |
//! | 4      | 2    | frame kind  |
//! | 6      | 2    | protocol version |
//!
//! The body that follows is a JSON document holding one [`Command`],
//! [`CommandResult`] record, or [`Response`]. Decoding never reads beyond
//! the declared length and rejects frames whose declared length exceeds the
//! bytes received.

use std::os::fd::OwnedFd;

use crate::result::ResultRecord;
use crate::{Command, CommandResult, ProtocolError, Response};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest frame accepted, header included.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

/// Protocol version written into every header.
pub const PROTOCOL_VERSION: u16 = 1;

/// Record carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// A [`Command`] from client to daemon.
    Command,
    /// A [`CommandResult`] answering a command.
    Result,
    /// A pushed [`Response`].
    Response,
}

impl FrameKind {
    const fn code(self) -> u16 {
        match self {
            Self::Command => 1,
            Self::Result => 2,
            Self::Response => 3,
        }
    }

    const fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Command),
            2 => Some(Self::Result),
            3 => Some(Self::Response),
            _ => None,
        }
    }

    /// Lowercase name used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Result => "result",
            Self::Response => "response",
        }
    }
}

/// Decoded fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame length, header included.
    pub total_len: u32,
    /// Raw frame kind.
    pub kind: u16,
    /// Protocol version.
    pub version: u16,
}

impl FrameHeader {
    /// Parses and bounds-checks the header at the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ShortHeader`] when fewer than
    /// [`HEADER_LEN`] bytes are available and
    /// [`ProtocolError::InvalidLength`] when the declared length is outside
    /// `HEADER_LEN..=MAX_FRAME_LEN`.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = bytes
            .first_chunk::<HEADER_LEN>()
            .ok_or(ProtocolError::ShortHeader {
                required: HEADER_LEN,
                available: bytes.len(),
            })?;
        let parsed = Self::from_bytes(header);
        let declared = parsed.frame_len();
        if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&declared) {
            return Err(ProtocolError::InvalidLength {
                declared,
                limit: MAX_FRAME_LEN,
            });
        }
        Ok(parsed)
    }

    /// Declared frame length as a buffer offset.
    #[must_use]
    pub fn frame_len(self) -> usize {
        usize::try_from(self.total_len).unwrap_or(usize::MAX)
    }

    #[expect(
        clippy::big_endian_bytes,
        reason = "the frame header is defined in network byte order"
    )]
    fn from_bytes(header: &[u8; HEADER_LEN]) -> Self {
        let [l0, l1, l2, l3, k0, k1, v0, v1] = *header;
        Self {
            total_len: u32::from_be_bytes([l0, l1, l2, l3]),
            kind: u16::from_be_bytes([k0, k1]),
            version: u16::from_be_bytes([v0, v1]),
        }
    }

    #[expect(
        clippy::big_endian_bytes,
        reason = "the frame header is defined in network byte order"
    )]
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let [l0, l1, l2, l3] = self.total_len.to_be_bytes();
        let [k0, k1] = self.kind.to_be_bytes();
        let [v0, v1] = self.version.to_be_bytes();
        [l0, l1, l2, l3, k0, k1, v0, v1]
    }
}

/// One whole frame with its JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    body: Vec<u8>,
}

impl Frame {
    /// Wraps a command.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Body`] if serialisation fails.
    pub fn command(command: &Command) -> Result<Self, ProtocolError> {
        Self::from_record(FrameKind::Command, command)
    }

    /// Wraps a result. An attached descriptor is not part of the frame and
    /// must be sent alongside it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Body`] if serialisation fails.
    pub fn result(result: &CommandResult) -> Result<Self, ProtocolError> {
        Self::from_record(FrameKind::Result, &result.to_record())
    }

    /// Wraps a response.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Body`] if serialisation fails.
    pub fn response(response: &Response) -> Result<Self, ProtocolError> {
        Self::from_record(FrameKind::Response, response)
    }

    fn from_record(kind: FrameKind, record: &impl serde::Serialize) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind,
            body: serde_json::to_vec(record)?,
        })
    }

    /// Kind of record carried.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Raw JSON body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serialises the frame, header included.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidLength`] when the frame would exceed
    /// [`MAX_FRAME_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let declared = HEADER_LEN.saturating_add(self.body.len());
        let total_len = u32::try_from(declared)
            .ok()
            .filter(|_| declared <= MAX_FRAME_LEN)
            .ok_or(ProtocolError::InvalidLength {
                declared,
                limit: MAX_FRAME_LEN,
            })?;
        let header = FrameHeader {
            total_len,
            kind: self.kind.code(),
            version: PROTOCOL_VERSION,
        };
        let mut bytes = Vec::with_capacity(declared);
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&self.body);
        Ok(bytes)
    }

    /// Decodes the single frame at the start of `bytes`, returning it with
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns header errors from [`FrameHeader::parse`],
    /// [`ProtocolError::Truncated`] when fewer bytes than declared are
    /// present, and [`ProtocolError::UnsupportedVersion`] or
    /// [`ProtocolError::UnknownFrameKind`] for headers this build cannot
    /// interpret.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let header = FrameHeader::parse(bytes)?;
        let declared = header.frame_len();
        let (frame, _) = bytes
            .split_at_checked(declared)
            .ok_or(ProtocolError::Truncated {
                declared,
                available: bytes.len(),
            })?;
        Ok((Self::from_parts(header, frame)?, declared))
    }

    fn from_parts(header: FrameHeader, frame: &[u8]) -> Result<Self, ProtocolError> {
        if header.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                version: header.version,
            });
        }
        let kind = FrameKind::from_code(header.kind)
            .ok_or(ProtocolError::UnknownFrameKind { kind: header.kind })?;
        let body = frame.get(HEADER_LEN..).unwrap_or_default().to_vec();
        Ok(Self { kind, body })
    }

    /// Decodes the body as a command.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedFrame`] for other frame kinds and
    /// [`ProtocolError::Body`] for malformed JSON.
    pub fn to_command(&self) -> Result<Command, ProtocolError> {
        self.expect_kind(FrameKind::Command)?;
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decodes the body as a result, attaching a descriptor received
    /// alongside the frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedFrame`] for other frame kinds,
    /// [`ProtocolError::Body`] for malformed JSON, and
    /// [`ProtocolError::MissingDescriptor`] when the result announces a
    /// descriptor that did not arrive.
    pub fn to_result(&self, descriptor: Option<OwnedFd>) -> Result<CommandResult, ProtocolError> {
        self.expect_kind(FrameKind::Result)?;
        let record: ResultRecord = serde_json::from_slice(&self.body)?;
        CommandResult::from_record(record, descriptor)
    }

    /// Decodes the body as a response.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedFrame`] for other frame kinds and
    /// [`ProtocolError::Body`] for malformed JSON.
    pub fn to_response(&self) -> Result<Response, ProtocolError> {
        self.expect_kind(FrameKind::Response)?;
        Ok(serde_json::from_slice(&self.body)?)
    }

    fn expect_kind(&self, expected: FrameKind) -> Result<(), ProtocolError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedFrame {
                expected: expected.as_str(),
                found: self.kind.as_str(),
            })
        }
    }
}

/// Splits a received buffer into frames.
///
/// Frames with an unknown kind or version are reported and skipped using
/// their declared length. A malformed header or a truncated tail is
/// reported once and ends iteration, since nothing after it can be framed.
#[must_use]
pub fn split_frames(bytes: &[u8]) -> SplitFrames<'_> {
    SplitFrames {
        remaining: bytes,
        finished: false,
    }
}

/// Iterator returned by [`split_frames`].
#[derive(Debug)]
pub struct SplitFrames<'a> {
    remaining: &'a [u8],
    finished: bool,
}

impl Iterator for SplitFrames<'_> {
    type Item = Result<Frame, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.remaining.is_empty() {
            return None;
        }
        let header = match FrameHeader::parse(self.remaining) {
            Ok(header) => header,
            Err(error) => {
                self.finished = true;
                return Some(Err(error));
            }
        };
        let declared = header.frame_len();
        let Some((frame, rest)) = self.remaining.split_at_checked(declared) else {
            self.finished = true;
            return Some(Err(ProtocolError::Truncated {
                declared,
                available: self.remaining.len(),
            }));
        };
        self.remaining = rest;
        Some(Frame::from_parts(header, frame))
    }
}

/// Reassembles frames from a byte stream delivered in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as frames.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next whole frame, or `None` until more bytes arrive.
    ///
    /// A frame with an unknown kind or version is consumed and reported as
    /// an error; the caller may keep decoding.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidLength`] when the buffered header is
    /// malformed. The stream cannot be resynchronised after that, and the
    /// caller should drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::parse(&self.buffer)?;
        let declared = header.frame_len();
        if self.buffer.len() < declared {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buffer.drain(..declared).collect();
        Frame::from_parts(header, &frame).map(Some)
    }
}
