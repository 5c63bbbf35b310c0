//! Binary wire codec.
//!
//! Every packet on the wire is a fixed-width, big-endian encoding — not
//! `serde_json`. This keeps packet sizes small and predictable, which matters
//! for a protocol sent many times a second over UDP.

use thiserror::Error;

use crate::math::Vec3;

/// Hard ceiling on any length-prefixed byte/string payload. Enforced before
/// any allocation happens, so an attacker cannot use a forged length prefix
/// to make the decoder allocate an unbounded buffer.
pub const MAX_STRING_LENGTH: u32 = 4096;

/// Errors produced while decoding a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer underflow: needed {needed} more byte(s)")]
    BufferUnderflow { needed: usize },
    #[error("string length {len} exceeds MAX_STRING_LENGTH ({MAX_STRING_LENGTH})")]
    StringTooLong { len: u32 },
    #[error("unknown message type byte: {0}")]
    UnknownMessageType(u8),
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
}

/// One-byte message discriminant, shared by every packet variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    None = 0,
    EchoRequest = 1,
    EchoResponse = 2,
    PlayerMovementRequest = 3,
    PlayerStateUpdate = 4,
    ServerAnnouncement = 5,
}

impl MessageType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(b: u8) -> Result<Self, DecodeError> {
        match b {
            0 => Ok(Self::None),
            1 => Ok(Self::EchoRequest),
            2 => Ok(Self::EchoResponse),
            3 => Ok(Self::PlayerMovementRequest),
            4 => Ok(Self::PlayerStateUpdate),
            5 => Ok(Self::ServerAnnouncement),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }
}

/// (type, sequence) pair that precedes every packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub message_type: MessageType,
    pub sequence: u32,
}

/// Appends fixed-width fields in network byte order.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// IEEE-754 bit pattern, big-endian.
    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(if v { 1 } else { 0 });
    }

    /// u32 length prefix followed by raw bytes. Callers are responsible for
    /// keeping `bytes.len()` within `MAX_STRING_LENGTH`; encoding itself
    /// never fails.
    pub fn write_length_prefixed(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_length_prefixed(s.as_bytes());
    }

    pub fn write_header(&mut self, header: PacketHeader) {
        self.write_u8(header.message_type.to_u8());
        self.write_u32(header.sequence);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fixed-width fields from a byte slice, tracking a cursor.
pub struct WireReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn require(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.len() - self.offset < n {
            Err(DecodeError::BufferUnderflow {
                needed: n - (self.buf.len() - self.offset),
            })
        } else {
            Ok(())
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.require(1)?;
        let v = self.buf[self.offset];
        self.offset += 1;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.require(4)?;
        let v = u32::from_be_bytes(self.buf[self.offset..self.offset + 4].try_into().unwrap());
        self.offset += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.require(8)?;
        let v = u64::from_be_bytes(self.buf[self.offset..self.offset + 8].try_into().unwrap());
        self.offset += 8;
        Ok(v)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Peeks the u32 length prefix and validates it against
    /// `MAX_STRING_LENGTH` *before* advancing the cursor or allocating —
    /// a forged huge length must not cost an allocation.
    pub fn read_length_prefixed(&mut self) -> Result<Vec<u8>, DecodeError> {
        self.require(4)?;
        let len = u32::from_be_bytes(self.buf[self.offset..self.offset + 4].try_into().unwrap());
        if len > MAX_STRING_LENGTH {
            return Err(DecodeError::StringTooLong { len });
        }
        self.offset += 4;
        self.require(len as usize)?;
        let bytes = self.buf[self.offset..self.offset + len as usize].to_vec();
        self.offset += len as usize;
        Ok(bytes)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_length_prefixed()?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_header(&mut self) -> Result<PacketHeader, DecodeError> {
        let message_type = MessageType::from_u8(self.read_u8()?)?;
        let sequence = self.read_u32()?;
        Ok(PacketHeader {
            message_type,
            sequence,
        })
    }

    fn read_vec3(&mut self) -> Result<Vec3, DecodeError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        Ok(Vec3::new(x, y, z))
    }
}

fn write_vec3(w: &mut WireWriter, v: Vec3) {
    w.write_f32(v.x);
    w.write_f32(v.y);
    w.write_f32(v.z);
}

/// Client → server: one frame of input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerMovementRequest {
    pub player_id: u32,
    pub movement: Vec3,
    pub velocity_y: f32,
    pub is_jumping: bool,
    pub input_sequence_number: u32,
}

impl PlayerMovementRequest {
    pub fn encode(&self, w: &mut WireWriter) {
        w.write_u32(self.player_id);
        write_vec3(w, self.movement);
        w.write_f32(self.velocity_y);
        w.write_bool(self.is_jumping);
        w.write_u32(self.input_sequence_number);
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, DecodeError> {
        Ok(Self {
            player_id: r.read_u32()?,
            movement: r.read_vec3()?,
            velocity_y: r.read_f32()?,
            is_jumping: r.read_bool()?,
            input_sequence_number: r.read_u32()?,
        })
    }
}

/// Server → client: authoritative state for one player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerStatePacket {
    pub player_id: u32,
    pub position: Vec3,
    pub velocity_y: f32,
    pub is_jumping: bool,
    pub last_processed_input_sequence: u32,
}

impl PlayerStatePacket {
    pub fn encode(&self, w: &mut WireWriter) {
        w.write_u32(self.player_id);
        write_vec3(w, self.position);
        w.write_f32(self.velocity_y);
        w.write_bool(self.is_jumping);
        w.write_u32(self.last_processed_input_sequence);
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, DecodeError> {
        Ok(Self {
            player_id: r.read_u32()?,
            position: r.read_vec3()?,
            velocity_y: r.read_f32()?,
            is_jumping: r.read_bool()?,
            last_processed_input_sequence: r.read_u32()?,
        })
    }
}

/// Free-form server broadcast text, e.g. a lobby message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAnnouncement {
    pub message: String,
}

impl ServerAnnouncement {
    pub fn encode(&self, w: &mut WireWriter) {
        w.write_string(&self.message);
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, DecodeError> {
        Ok(Self {
            message: r.read_string()?,
        })
    }
}

/// Wraps a payload with a monotonic-nanosecond timestamp, prefixed on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamped<T> {
    pub timestamp_ns: u64,
    pub value: T,
}

impl PlayerStatePacket {
    pub fn encode_timestamped(this: &Timestamped<Self>, w: &mut WireWriter) {
        w.write_u64(this.timestamp_ns);
        this.value.encode(w);
    }

    pub fn decode_timestamped(r: &mut WireReader) -> Result<Timestamped<Self>, DecodeError> {
        let timestamp_ns = r.read_u64()?;
        let value = Self::decode(r)?;
        Ok(Timestamped {
            timestamp_ns,
            value,
        })
    }
}

impl PlayerMovementRequest {
    pub fn encode_timestamped(this: &Timestamped<Self>, w: &mut WireWriter) {
        w.write_u64(this.timestamp_ns);
        this.value.encode(w);
    }

    pub fn decode_timestamped(r: &mut WireReader) -> Result<Timestamped<Self>, DecodeError> {
        let timestamp_ns = r.read_u64()?;
        let value = Self::decode(r)?;
        Ok(Timestamped {
            timestamp_ns,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_state_packet_roundtrip_is_34_bytes() {
        let header = PacketHeader {
            message_type: MessageType::PlayerStateUpdate,
            sequence: 42,
        };
        let packet = PlayerStatePacket {
            player_id: 7,
            position: Vec3::new(1.5, 2.0, -3.25),
            velocity_y: 0.0,
            is_jumping: true,
            last_processed_input_sequence: 42,
        };

        let mut w = WireWriter::new();
        w.write_header(header);
        packet.encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 34);

        let mut r = WireReader::new(&bytes);
        let decoded_header = r.read_header().unwrap();
        assert_eq!(decoded_header, header);
        let decoded = PlayerStatePacket::decode(&mut r).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn movement_request_roundtrip() {
        let req = PlayerMovementRequest {
            player_id: 1,
            movement: Vec3::new(1.0, 0.0, 0.0),
            velocity_y: -9.8,
            is_jumping: false,
            input_sequence_number: 5,
        };
        let mut w = WireWriter::new();
        req.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(PlayerMovementRequest::decode(&mut r).unwrap(), req);
    }

    #[test]
    fn truncated_buffer_errors_without_panicking() {
        let mut w = WireWriter::new();
        w.write_u32(123);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes[..2]);
        assert!(matches!(
            r.read_u32(),
            Err(DecodeError::BufferUnderflow { .. })
        ));
    }

    #[test]
    fn oversize_length_prefix_rejected_before_allocating() {
        let mut w = WireWriter::new();
        w.write_u32(MAX_STRING_LENGTH + 1);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(
            r.read_length_prefixed(),
            Err(DecodeError::StringTooLong {
                len: MAX_STRING_LENGTH + 1
            })
        );
    }

    #[test]
    fn announcement_roundtrip() {
        let ann = ServerAnnouncement {
            message: "server restarting in 60s".to_string(),
        };
        let mut w = WireWriter::new();
        ann.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(ServerAnnouncement::decode(&mut r).unwrap(), ann);
    }

    #[test]
    fn unknown_message_type_errors() {
        assert_eq!(MessageType::from_u8(99), Err(DecodeError::UnknownMessageType(99)));
    }

    #[test]
    fn timestamped_roundtrip() {
        let packet = Timestamped {
            timestamp_ns: 123_456_789,
            value: PlayerStatePacket {
                player_id: 3,
                position: Vec3::ZERO,
                velocity_y: 0.0,
                is_jumping: false,
                last_processed_input_sequence: 10,
            },
        };
        let mut w = WireWriter::new();
        PlayerStatePacket::encode_timestamped(&packet, &mut w);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        let decoded = PlayerStatePacket::decode_timestamped(&mut r).unwrap();
        assert_eq!(decoded.timestamp_ns, packet.timestamp_ns);
        assert_eq!(decoded.value, packet.value);
    }
}
