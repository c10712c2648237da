//! Message framing.
//!
//! Every message travels as one self-delimiting frame:
//!
//! ```text
//! [type: u16 LE][payload length: u32 LE][payload bytes ...]
//! ```
//!
//! A [`Message`] owns its payload plus a read cursor. Writers always append to
//! the payload; readers consume it front to back and never fail. Reading past
//! the end yields zero bytes, so callers must read exactly what the sender
//! wrote. Decoding raw bytes from the wire is the strict side: see
//! [`Message::deserialize`].

use anyhow::ensure;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 6;

/// Largest byte string that fits behind the 2-byte length prefix.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Largest payload the 4-byte header length can describe. Receivers enforce
/// a much smaller configured limit.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// Message type tag carried in the first two header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connect,
    Disconnect,
    PlayerJoin,
    PlayerLeave,
    EntityUpdate,
    SectorChange,
    ChatMessage,
    ActionCommand,
    InventoryUpdate,
    CombatEvent,
    /// A tag this build does not know. Kept so the frame still decodes.
    Other(u16),
}

impl MessageType {
    pub const fn as_u16(self) -> u16 {
        match self {
            MessageType::Connect => 1,
            MessageType::Disconnect => 2,
            MessageType::PlayerJoin => 3,
            MessageType::PlayerLeave => 4,
            MessageType::EntityUpdate => 5,
            MessageType::SectorChange => 6,
            MessageType::ChatMessage => 7,
            MessageType::ActionCommand => 8,
            MessageType::InventoryUpdate => 9,
            MessageType::CombatEvent => 10,
            MessageType::Other(tag) => tag,
        }
    }

    pub const fn from_u16(tag: u16) -> Self {
        match tag {
            1 => MessageType::Connect,
            2 => MessageType::Disconnect,
            3 => MessageType::PlayerJoin,
            4 => MessageType::PlayerLeave,
            5 => MessageType::EntityUpdate,
            6 => MessageType::SectorChange,
            7 => MessageType::ChatMessage,
            8 => MessageType::ActionCommand,
            9 => MessageType::InventoryUpdate,
            10 => MessageType::CombatEvent,
            other => MessageType::Other(other),
        }
    }
}

impl From<u16> for MessageType {
    fn from(tag: u16) -> Self {
        MessageType::from_u16(tag)
    }
}

impl From<MessageType> for u16 {
    fn from(ty: MessageType) -> Self {
        ty.as_u16()
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            message_type: MessageType::from_u16(u16::from_le_bytes([bytes[0], bytes[1]])),
            payload_len: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let ty = self.message_type.as_u16().to_le_bytes();
        let len = self.payload_len.to_le_bytes();
        [ty[0], ty[1], len[0], len[1], len[2], len[3]]
    }

    /// Total frame size (header + payload).
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len as usize
    }
}

/// A typed, length-prefixed binary envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    payload: BytesMut,
    read_pos: usize,
}

impl Message {
    /// Creates an empty outbound message.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            payload: BytesMut::new(),
            read_pos: 0,
        }
    }

    /// Creates a message around an already-received payload.
    pub fn from_payload(message_type: MessageType, payload: &[u8]) -> Self {
        Self {
            message_type,
            payload: BytesMut::from(payload),
            read_pos: 0,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn header(&self) -> FrameHeader {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD_LEN, "payload exceeds u32 length field");
        FrameHeader {
            message_type: self.message_type,
            payload_len: self.payload.len() as u32,
        }
    }

    // ─── Writers ───

    pub fn write_u8(&mut self, value: u8) {
        self.payload.put_u8(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.payload.put_i16_le(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.payload.put_u16_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.payload.put_i32_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.payload.put_u32_le(value);
    }

    /// Writes the IEEE-754 bit pattern as a little-endian `u32`.
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// Writes a 2-byte length prefix followed by the raw bytes.
    ///
    /// No text encoding is enforced. Fails without writing anything when the
    /// value is longer than [`MAX_STRING_LEN`].
    pub fn write_string(&mut self, value: impl AsRef<[u8]>) -> anyhow::Result<()> {
        let bytes = value.as_ref();
        ensure!(
            bytes.len() <= MAX_STRING_LEN,
            "string of {} bytes exceeds the {} byte limit",
            bytes.len(),
            MAX_STRING_LEN
        );
        self.write_u16(bytes.len() as u16);
        self.payload.put_slice(bytes);
        Ok(())
    }

    /// Appends a raw byte span with no prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.payload.put_slice(bytes);
    }

    // ─── Readers ───

    pub fn read_u8(&mut self) -> u8 {
        match self.payload.get(self.read_pos) {
            Some(&b) => {
                self.read_pos += 1;
                b
            }
            None => 0,
        }
    }

    pub fn read_i16(&mut self) -> i16 {
        i16::from_le_bytes(self.read_array())
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_le_bytes(self.read_array())
    }

    pub fn read_i32(&mut self) -> i32 {
        i32::from_le_bytes(self.read_array())
    }

    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.read_array())
    }

    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_u32())
    }

    /// Reads a length-prefixed byte string.
    pub fn read_string_bytes(&mut self) -> Bytes {
        let len = self.read_u16() as usize;
        self.read_bytes(len)
    }

    /// Reads a length-prefixed string, replacing invalid UTF-8.
    pub fn read_string(&mut self) -> String {
        String::from_utf8_lossy(&self.read_string_bytes()).into_owned()
    }

    /// Reads `len` raw bytes. Missing bytes past the end read as zero.
    pub fn read_bytes(&mut self, len: usize) -> Bytes {
        let mut out = BytesMut::zeroed(len);
        let available = self.remaining().min(len);
        out[..available].copy_from_slice(&self.payload[self.read_pos..self.read_pos + available]);
        self.read_pos += available;
        out.freeze()
    }

    /// Bytes left between the read cursor and the end of the payload.
    pub fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.read_pos)
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    pub fn reset_read_position(&mut self) {
        self.read_pos = 0;
    }

    fn read_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        for b in out.iter_mut() {
            *b = self.read_u8();
        }
        out
    }

    // ─── Frame encoding ───

    /// Encodes header + payload into one frame.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(&self.header().encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes one frame from the front of `buffer`.
    ///
    /// Returns `None` when the buffer is shorter than the header or than the
    /// declared payload. Bytes after the declared frame are ignored.
    pub fn deserialize(buffer: &[u8]) -> Option<Message> {
        let header_bytes: &[u8; HEADER_LEN] = buffer.get(..HEADER_LEN)?.try_into().ok()?;
        let header = FrameHeader::decode(header_bytes);
        let end = HEADER_LEN.checked_add(header.payload_len as usize)?;
        let payload = buffer.get(HEADER_LEN..end)?;
        Some(Message::from_payload(header.message_type, payload))
    }
}

/// Builds a connect announcement carrying the player's display name.
pub fn connect(name: &str) -> anyhow::Result<Message> {
    let mut msg = Message::new(MessageType::Connect);
    msg.write_string(name)?;
    Ok(msg)
}

/// Builds a chat message carrying one string.
pub fn chat(text: &str) -> anyhow::Result<Message> {
    let mut msg = Message::new(MessageType::ChatMessage);
    msg.write_string(text)?;
    Ok(msg)
}

/// Builds a sector-change request for `(x, y)`.
pub fn sector_change(x: i32, y: i32) -> Message {
    let mut msg = Message::new(MessageType::SectorChange);
    msg.write_i32(x);
    msg.write_i32(y);
    msg
}
