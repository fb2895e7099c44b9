//! # Packet Definitions
//!
//! Fixed-size wire records. Every record carries exactly the state the
//! other side needs and nothing else.

use gait_shared::{
    ActionFlags, ActorId, AuthorityState, InputCommand, MovementMode, MovementState, Quaternion, TickId, Vec2, Vec3,
};

/// Datagram envelope - present in every datagram.
///
/// Total size: 14 bytes
///
/// ```text
/// version u8 | kind u8 | actor u32 | sequence u16 | ack u16 | ack_bits u32
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version.
    pub version: u8,
    /// Payload kind.
    pub kind: u8,
    /// Actor the payload is about.
    pub actor: ActorId,
    /// Sequence number of this datagram.
    pub sequence: u16,
    /// Last sequence received from the remote.
    pub ack: u16,
    /// Bit `n` set: `ack - n` was received.
    pub ack_bits: u32,
}

impl PacketHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 14;
}

/// Types of datagram payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Client -> Authority: unacknowledged inputs, full precision.
    InputBatch = 1,
    /// Client -> Authority: unacknowledged inputs, 16-bit axes.
    QuantizedInputBatch = 2,
    /// Authority -> Client: authoritative state of one actor.
    Authority = 3,
    /// Either way: the actor is gone.
    Leave = 4,
}

impl PacketKind {
    /// Converts from the wire byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::InputBatch),
            2 => Some(Self::QuantizedInputBatch),
            3 => Some(Self::Authority),
            4 => Some(Self::Leave),
            _ => None,
        }
    }
}

/// Full-precision input record.
///
/// Size: 13 bytes (`tick u32 | axis_x f32 | axis_y f32 | flags u8`)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InputRecord {
    /// Tick the input advances.
    pub tick: TickId,
    /// Strafe axis.
    pub axis_x: f32,
    /// Forward axis.
    pub axis_y: f32,
    /// Action bits.
    pub flags: u8,
}

impl InputRecord {
    /// Size in bytes.
    pub const SIZE: usize = 13;

    /// Wire form of a command. The timestamp stays local.
    #[must_use]
    pub const fn from_command(command: &InputCommand) -> Self {
        Self {
            tick: command.tick,
            axis_x: command.axes.x,
            axis_y: command.axes.y,
            flags: command.flags.bits(),
        }
    }

    /// Command carried by this record.
    #[must_use]
    pub const fn to_command(&self) -> InputCommand {
        InputCommand::new(
            self.tick,
            Vec2::new(self.axis_x, self.axis_y),
            ActionFlags::from_bits_truncate(self.flags),
        )
    }
}

/// Input record with axes packed as 16-bit fixed point.
///
/// Size: 9 bytes (`tick u32 | axis_x i16 | axis_y i16 | flags u8`)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuantizedInputRecord {
    /// Tick the input advances.
    pub tick: TickId,
    /// Strafe axis, `round(x * 32767)`.
    pub axis_x: i16,
    /// Forward axis, `round(y * 32767)`.
    pub axis_y: i16,
    /// Action bits.
    pub flags: u8,
}

impl QuantizedInputRecord {
    /// Size in bytes.
    pub const SIZE: usize = 9;

    /// Packs a command.
    #[must_use]
    pub fn from_command(command: &InputCommand) -> Self {
        Self {
            tick: command.tick,
            axis_x: quantize_axis(command.axes.x),
            axis_y: quantize_axis(command.axes.y),
            flags: command.flags.bits(),
        }
    }

    /// Unpacks the command.
    #[must_use]
    pub fn to_command(&self) -> InputCommand {
        InputCommand::new(
            self.tick,
            Vec2::new(dequantize_axis(self.axis_x), dequantize_axis(self.axis_y)),
            ActionFlags::from_bits_truncate(self.flags),
        )
    }
}

const AXIS_SCALE: f32 = 32767.0;

/// Packs an axis in `[-1, 1]` into 16 bits. Non-finite values pack to 0.
#[inline]
#[must_use]
pub fn quantize_axis(value: f32) -> i16 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(-1.0, 1.0) * AXIS_SCALE).round() as i16
}

/// Unpacks a 16-bit axis.
#[inline]
#[must_use]
pub fn dequantize_axis(value: i16) -> f32 {
    (f32::from(value) / AXIS_SCALE).clamp(-1.0, 1.0)
}

/// Command as the authority will see it after a quantized round trip.
///
/// The client must predict with exactly this command or every quantized
/// tick mispredicts by the rounding error.
#[must_use]
pub fn quantized_roundtrip(command: &InputCommand) -> InputCommand {
    let mut wire = QuantizedInputRecord::from_command(command).to_command();
    wire.timestamp_ms = command.timestamp_ms;
    wire
}

/// Authoritative state of one actor.
///
/// Size: 45 bytes
/// (`tick u32 | position 3×f32 | velocity 3×f32 | orientation 4×f32 | mode u8`)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AuthorityRecord {
    /// Input tick the state answers.
    pub tick: TickId,
    /// Feet position.
    pub position: Vec3,
    /// Velocity.
    pub velocity: Vec3,
    /// Facing.
    pub orientation: Quaternion,
    /// Locomotion mode.
    pub mode: MovementMode,
}

impl AuthorityRecord {
    /// Size in bytes.
    pub const SIZE: usize = 45;

    /// Wire form of an authoritative state.
    #[must_use]
    pub const fn from_authority(authority: &AuthorityState) -> Self {
        Self {
            tick: authority.input_tick,
            position: authority.state.position,
            velocity: authority.state.velocity,
            orientation: authority.state.orientation,
            mode: authority.state.mode,
        }
    }

    /// Authoritative state carried by this record.
    #[must_use]
    pub const fn to_authority(&self) -> AuthorityState {
        AuthorityState::new(
            self.tick,
            MovementState {
                position: self.position,
                velocity: self.velocity,
                orientation: self.orientation,
                mode: self.mode,
                tick: self.tick,
            },
        )
    }
}

/// Decoded datagram payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Inputs, oldest first.
    Inputs(Vec<InputCommand>),
    /// Authoritative state.
    Authority(AuthorityState),
    /// Actor left.
    Leave,
}

/// A decoded datagram.
#[derive(Clone, Debug, PartialEq)]
pub struct Datagram {
    /// Envelope.
    pub header: PacketHeader,
    /// Payload.
    pub payload: Payload,
}
