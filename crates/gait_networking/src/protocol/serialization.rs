//! # Packet Serialization
//!
//! Explicit little-endian field codec.
//!
//! ## Design
//!
//! - The writer owns one fixed buffer of [`MAX_DATAGRAM_SIZE`] bytes and is
//!   reused for every datagram
//! - The reader borrows the received bytes and validates everything it
//!   hands out (version, kind, mode byte, finiteness)
//! - Vector fields go through `bytemuck` casts of the Pod math types

use bytemuck::cast;
use gait_shared::{
    ActorId, AuthorityState, InputCommand, MovementMode, Quaternion, Vec3, MAX_DATAGRAM_SIZE, MAX_INPUTS_PER_BATCH,
    PROTOCOL_VERSION,
};
use thiserror::Error;

use super::packets::{
    AuthorityRecord, Datagram, InputRecord, PacketHeader, PacketKind, Payload, QuantizedInputRecord,
};

/// Errors raised while decoding a datagram.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The datagram ended early.
    #[error("datagram truncated: needed {needed} more bytes, {remaining} left")]
    Truncated {
        /// Bytes the next field needs.
        needed: usize,
        /// Bytes left in the datagram.
        remaining: usize,
    },

    /// Protocol version not understood.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Payload kind not understood.
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),

    /// Movement mode byte out of range.
    #[error("invalid movement mode {0}")]
    InvalidMode(u8),

    /// A float field was NaN or infinite.
    #[error("non-finite value in authority record")]
    NonFinite,

    /// Datagram or batch larger than allowed.
    #[error("datagram too large: {len} exceeds {max}")]
    Oversized {
        /// Offending size (bytes, or records for a batch).
        len: usize,
        /// Limit.
        max: usize,
    },
}

/// Result type for decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Packet writer - writes datagrams into a pre-allocated buffer.
///
/// Reused across datagrams to avoid allocations.
pub struct PacketWriter {
    buffer: [u8; MAX_DATAGRAM_SIZE],
    position: usize,
}

impl PacketWriter {
    /// Creates a writer with a fresh buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0u8; MAX_DATAGRAM_SIZE],
            position: 0,
        }
    }

    /// Resets the writer for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Number of bytes written.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.position
    }

    /// True if nothing has been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.position]
    }

    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        let end = self.position + bytes.len();
        if end > MAX_DATAGRAM_SIZE {
            return false;
        }
        self.buffer[self.position..end].copy_from_slice(bytes);
        self.position = end;
        true
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> bool {
        self.write_bytes(&[value])
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes an i16 in little-endian format.
    #[inline]
    pub fn write_i16(&mut self, value: i16) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes an f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a vector as three f32.
    pub fn write_vec3(&mut self, value: Vec3) -> bool {
        let [x, y, z]: [f32; 3] = cast(value);
        self.write_f32(x) && self.write_f32(y) && self.write_f32(z)
    }

    /// Writes a quaternion as four f32.
    pub fn write_quat(&mut self, value: Quaternion) -> bool {
        let [x, y, z, w]: [f32; 4] = cast(value);
        self.write_f32(x) && self.write_f32(y) && self.write_f32(z) && self.write_f32(w)
    }

    /// Writes the envelope.
    pub fn write_header(&mut self, header: &PacketHeader) -> bool {
        self.write_u8(header.version)
            && self.write_u8(header.kind)
            && self.write_u32(header.actor.raw())
            && self.write_u16(header.sequence)
            && self.write_u16(header.ack)
            && self.write_u32(header.ack_bits)
    }

    /// Writes a full-precision input record.
    pub fn write_input(&mut self, record: &InputRecord) -> bool {
        self.write_u32(record.tick)
            && self.write_f32(record.axis_x)
            && self.write_f32(record.axis_y)
            && self.write_u8(record.flags)
    }

    /// Writes a quantized input record.
    pub fn write_quantized_input(&mut self, record: &QuantizedInputRecord) -> bool {
        self.write_u32(record.tick)
            && self.write_i16(record.axis_x)
            && self.write_i16(record.axis_y)
            && self.write_u8(record.flags)
    }

    /// Writes an authority record.
    pub fn write_authority(&mut self, record: &AuthorityRecord) -> bool {
        self.write_u32(record.tick)
            && self.write_vec3(record.position)
            && self.write_vec3(record.velocity)
            && self.write_quat(record.orientation)
            && self.write_u8(record.mode.as_u8())
    }

    /// Serializes an input batch. Keeps at most [`MAX_INPUTS_PER_BATCH`]
    /// of the newest inputs.
    ///
    /// The header's kind is overwritten to match `quantized`.
    pub fn serialize_inputs(&mut self, header: &PacketHeader, inputs: &[InputCommand], quantized: bool) -> bool {
        self.reset();
        let start = inputs.len().saturating_sub(MAX_INPUTS_PER_BATCH);
        let inputs = &inputs[start..];
        let kind = if quantized { PacketKind::QuantizedInputBatch } else { PacketKind::InputBatch };
        let header = PacketHeader { kind: kind as u8, ..*header };

        // MAX_INPUTS_PER_BATCH fits in a byte
        if !(self.write_header(&header) && self.write_u8(inputs.len() as u8)) {
            return false;
        }
        inputs.iter().all(|command| {
            if quantized {
                self.write_quantized_input(&QuantizedInputRecord::from_command(command))
            } else {
                self.write_input(&InputRecord::from_command(command))
            }
        })
    }

    /// Serializes an authority datagram.
    pub fn serialize_authority(&mut self, header: &PacketHeader, authority: &AuthorityState) -> bool {
        self.reset();
        let header = PacketHeader { kind: PacketKind::Authority as u8, ..*header };
        self.write_header(&header) && self.write_authority(&AuthorityRecord::from_authority(authority))
    }

    /// Serializes a leave datagram.
    pub fn serialize_leave(&mut self, header: &PacketHeader) -> bool {
        self.reset();
        let header = PacketHeader { kind: PacketKind::Leave as u8, ..*header };
        self.write_header(&header)
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Packet reader - decodes one datagram.
pub struct PacketReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a reader over a received datagram.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let remaining = self.remaining();
        if remaining < N {
            return Err(DecodeError::Truncated { needed: N, remaining });
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..self.position + N]);
        self.position += N;
        Ok(bytes)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        self.take::<1>().map(|[b]| b)
    }

    /// Reads a u16 in little-endian format.
    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        self.take().map(u16::from_le_bytes)
    }

    /// Reads an i16 in little-endian format.
    pub fn read_i16(&mut self) -> DecodeResult<i16> {
        self.take().map(i16::from_le_bytes)
    }

    /// Reads a u32 in little-endian format.
    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        self.take().map(u32::from_le_bytes)
    }

    /// Reads an f32 in little-endian format.
    pub fn read_f32(&mut self) -> DecodeResult<f32> {
        self.take().map(f32::from_le_bytes)
    }

    /// Reads three f32 as a vector.
    pub fn read_vec3(&mut self) -> DecodeResult<Vec3> {
        let raw = [self.read_f32()?, self.read_f32()?, self.read_f32()?];
        Ok(cast(raw))
    }

    /// Reads four f32 as a quaternion.
    pub fn read_quat(&mut self) -> DecodeResult<Quaternion> {
        let raw = [self.read_f32()?, self.read_f32()?, self.read_f32()?, self.read_f32()?];
        Ok(cast(raw))
    }

    /// Reads and validates the envelope.
    ///
    /// # Errors
    ///
    /// [`DecodeError::Truncated`], [`DecodeError::UnsupportedVersion`] or
    /// [`DecodeError::UnknownKind`].
    pub fn read_header(&mut self) -> DecodeResult<(PacketHeader, PacketKind)> {
        let version = self.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let kind_byte = self.read_u8()?;
        let kind = PacketKind::from_u8(kind_byte).ok_or(DecodeError::UnknownKind(kind_byte))?;
        let header = PacketHeader {
            version,
            kind: kind_byte,
            actor: ActorId::new(self.read_u32()?),
            sequence: self.read_u16()?,
            ack: self.read_u16()?,
            ack_bits: self.read_u32()?,
        };
        Ok((header, kind))
    }

    /// Reads a full-precision input record.
    pub fn read_input(&mut self) -> DecodeResult<InputRecord> {
        Ok(InputRecord {
            tick: self.read_u32()?,
            axis_x: self.read_f32()?,
            axis_y: self.read_f32()?,
            flags: self.read_u8()?,
        })
    }

    /// Reads a quantized input record.
    pub fn read_quantized_input(&mut self) -> DecodeResult<QuantizedInputRecord> {
        Ok(QuantizedInputRecord {
            tick: self.read_u32()?,
            axis_x: self.read_i16()?,
            axis_y: self.read_i16()?,
            flags: self.read_u8()?,
        })
    }

    /// Reads and validates an authority record.
    ///
    /// # Errors
    ///
    /// [`DecodeError::InvalidMode`] or [`DecodeError::NonFinite`] besides
    /// truncation.
    pub fn read_authority(&mut self) -> DecodeResult<AuthorityRecord> {
        let tick = self.read_u32()?;
        let position = self.read_vec3()?;
        let velocity = self.read_vec3()?;
        let orientation = self.read_quat()?;
        let mode_byte = self.read_u8()?;
        let mode = MovementMode::from_u8(mode_byte).ok_or(DecodeError::InvalidMode(mode_byte))?;
        if !(position.is_finite() && velocity.is_finite() && orientation.is_finite()) {
            return Err(DecodeError::NonFinite);
        }
        Ok(AuthorityRecord { tick, position, velocity, orientation, mode })
    }

    /// Decodes a whole datagram.
    ///
    /// # Errors
    ///
    /// Any [`DecodeError`].
    pub fn decode(&mut self) -> DecodeResult<Datagram> {
        if self.buffer.len() > MAX_DATAGRAM_SIZE {
            return Err(DecodeError::Oversized { len: self.buffer.len(), max: MAX_DATAGRAM_SIZE });
        }
        let (header, kind) = self.read_header()?;

        let payload = match kind {
            PacketKind::InputBatch | PacketKind::QuantizedInputBatch => {
                let count = usize::from(self.read_u8()?);
                if count > MAX_INPUTS_PER_BATCH {
                    return Err(DecodeError::Oversized { len: count, max: MAX_INPUTS_PER_BATCH });
                }
                let mut inputs = Vec::with_capacity(count);
                for _ in 0..count {
                    let command = if kind == PacketKind::QuantizedInputBatch {
                        self.read_quantized_input()?.to_command()
                    } else {
                        self.read_input()?.to_command()
                    };
                    inputs.push(command);
                }
                Payload::Inputs(inputs)
            }
            PacketKind::Authority => Payload::Authority(self.read_authority()?.to_authority()),
            PacketKind::Leave => Payload::Leave,
        };

        Ok(Datagram { header, payload })
    }
}

/// Decodes one datagram.
///
/// # Errors
///
/// Any [`DecodeError`].
pub fn decode(bytes: &[u8]) -> DecodeResult<Datagram> {
    PacketReader::new(bytes).decode()
}
