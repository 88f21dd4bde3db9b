//! Typed packets for the lobby wire protocol: identifier tables, payload
//! layouts, and the encode/decode implementations that sit on top of
//! [`crate::codec`].
//!
//! `GameState` is a closed sum type (not a base class with subclasses): the
//! tag byte is written explicitly by [`GameState::encode`] and is part of
//! the wire format only, never of the type's Rust identity.
//!
//! Most outbound packets that answer a specific inbound request are
//! `Reply<T>`: a two-armed sum (`Failed { reason }` / `Success(T)`) per
//! response, monomorphized per packet so each one is its own concrete type
//! on the wire while the encode/decode logic is written once.

use crate::codec::{ByteReader, ByteWriter, CodecError, CodecResult};

pub const TOKEN_MAX_LEN: usize = 32;
pub const CHAT_MAX_LEN: usize = 200;
pub const ROOM_ID_MAX_LEN: usize = 20;

/// The only protocol version this server accepts for the handshake byte.
pub const PROTOCOL_VERSION: u8 = 1;

// ── Shared value types ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i32,
    pub name: String,
}

impl UserProfile {
    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_i32_le(self.id);
        w.write_string(&self.name);
    }

    pub fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let id = r.read_i32_le()?;
        let name = r.read_string(TOKEN_MAX_LEN)?;
        Ok(Self { id, name })
    }
}

/// The closed three-case room automaton state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    SelectChart(Option<i32>),
    WaitForReady,
    Playing,
}

impl GameState {
    fn tag(&self) -> u8 {
        match self {
            Self::SelectChart(_) => 0x00,
            Self::WaitForReady => 0x01,
            Self::Playing => 0x02,
        }
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.tag());
        if let Self::SelectChart(chart_id) = self {
            w.write_bool(chart_id.is_some());
            if let Some(id) = chart_id {
                w.write_i32_le(*id);
            }
        }
    }

    pub fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        match r.read_u8()? {
            0x00 => {
                let has_chart = r.read_bool()?;
                let chart_id = if has_chart { Some(r.read_i32_le()?) } else { None };
                Ok(Self::SelectChart(chart_id))
            }
            0x01 => Ok(Self::WaitForReady),
            0x02 => Ok(Self::Playing),
            other => Err(CodecError::UnknownTag(other, "GameState")),
        }
    }
}

/// One room member as seen from `RoomInfo`: a profile plus whether they
/// joined as a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomParticipant {
    pub profile: UserProfile,
    pub monitor: bool,
}

fn write_seq<T>(w: &mut ByteWriter, items: &[T], encode_one: impl Fn(&T, &mut ByteWriter)) {
    // The wire format uses a single-byte count for sequences (distinct from
    // the VarInt length prefix used for strings).
    #[allow(clippy::cast_possible_truncation)]
    w.write_u8(items.len() as u8);
    for item in items {
        encode_one(item, w);
    }
}

fn read_seq<T>(
    r: &mut ByteReader<'_>,
    decode_one: impl Fn(&mut ByteReader<'_>) -> CodecResult<T>,
) -> CodecResult<Vec<T>> {
    let count = r.read_u8()?;
    (0..count).map(|_| decode_one(r)).collect()
}

/// A snapshot of one room, as returned by `JoinRoom.Success` and as part of
/// `Authenticate.Success` when the caller is already in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: String,
    pub state: GameState,
    pub live: bool,
    pub locked: bool,
    pub cycle: bool,
    pub is_host: bool,
    pub is_ready: bool,
    pub participants: Vec<RoomParticipant>,
}

impl RoomInfo {
    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_string(&self.room_id);
        self.state.encode(w);
        w.write_bool(self.live);
        w.write_bool(self.locked);
        w.write_bool(self.cycle);
        w.write_bool(self.is_host);
        w.write_bool(self.is_ready);
        write_seq(w, &self.participants, |p, w| {
            p.profile.encode(w);
            w.write_bool(p.monitor);
        });
    }

    pub fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let room_id = r.read_string(ROOM_ID_MAX_LEN)?;
        let state = GameState::decode(r)?;
        let live = r.read_bool()?;
        let locked = r.read_bool()?;
        let cycle = r.read_bool()?;
        let is_host = r.read_bool()?;
        let is_ready = r.read_bool()?;
        let participants = read_seq(r, |r| {
            let profile = UserProfile::decode(r)?;
            let monitor = r.read_bool()?;
            Ok(RoomParticipant { profile, monitor })
        })?;
        Ok(Self {
            room_id,
            state,
            live,
            locked,
            cycle,
            is_host,
            is_ready,
            participants,
        })
    }
}

/// A two-armed response: the FAILED/SUCCESS discriminant byte is part of
/// the encoding, the variant itself is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Failed { reason: String },
    Success(T),
}

impl<T> Reply<T> {
    pub fn ok(value: T) -> Self {
        Self::Success(value)
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    fn encode_with(&self, w: &mut ByteWriter, encode_ok: impl FnOnce(&T, &mut ByteWriter)) {
        match self {
            Self::Failed { reason } => {
                w.write_u8(0x00);
                w.write_string(reason);
            }
            Self::Success(value) => {
                w.write_u8(0x01);
                encode_ok(value, w);
            }
        }
    }

    fn decode_with(
        r: &mut ByteReader<'_>,
        decode_ok: impl FnOnce(&mut ByteReader<'_>) -> CodecResult<T>,
    ) -> CodecResult<Self> {
        match r.read_u8()? {
            0x00 => Ok(Self::Failed {
                reason: r.read_string(CHAT_MAX_LEN)?,
            }),
            0x01 => Ok(Self::Success(decode_ok(r)?)),
            other => Err(CodecError::UnknownTag(other, "Reply")),
        }
    }
}

impl Reply<()> {
    fn encode_unit(&self, w: &mut ByteWriter) {
        self.encode_with(w, |_, _| {});
    }

    fn decode_unit(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Self::decode_with(r, |_| Ok(()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateSuccess {
    pub profile: UserProfile,
    pub is_monitor: bool,
    pub room: Option<RoomInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRoomSuccess {
    pub state: GameState,
    pub users: Vec<UserProfile>,
    pub monitors: Vec<i32>,
    pub live: bool,
}

/// Inbound `Touches`/`Judges` payloads are opaque to the server; it only
/// needs to tag them with the sender's id when relaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutbound {
    /// Acknowledgement sent back to the sender.
    Ack(Reply<()>),
    /// Relayed verbatim to other room members, tagged with the sender's id.
    Relay { user: i32, data: Vec<u8> },
}

impl StreamOutbound {
    fn encode(&self, w: &mut ByteWriter) {
        match self {
            Self::Ack(reply) => reply.encode_unit(w),
            Self::Relay { user, data } => {
                w.write_i32_le(*user);
                w.write_bytes(data);
            }
        }
    }
}

// ── Message (outbound sub-packet 0x05) ──────────────────────────────

/// One of the generic room-flow notifications carried inside an outbound
/// `Message` packet (wire id `0x05`), distinguished by a sub-id byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Chat { user: i32, content: String },
    CreateRoom { user: i32 },
    JoinRoom { user: i32, name: String },
    LeaveRoom { user: i32, name: String },
    NewHost { user: i32 },
    SelectChart { user: i32, name: String, id: i32 },
    GameStart { user: i32 },
    Ready { user: i32 },
    CancelReady { user: i32 },
    CancelGame { user: i32 },
    StartPlaying,
    Played {
        user: i32,
        score: i32,
        accuracy: f32,
        full_combo: bool,
    },
    GameEnd,
    Abort { user: i32 },
    LockRoom { lock: bool },
    CycleRoom { cycle: bool },
}

impl Message {
    fn sub_id(&self) -> u8 {
        match self {
            Self::Chat { .. } => 0x00,
            Self::CreateRoom { .. } => 0x01,
            Self::JoinRoom { .. } => 0x02,
            Self::LeaveRoom { .. } => 0x03,
            Self::NewHost { .. } => 0x04,
            Self::SelectChart { .. } => 0x05,
            Self::GameStart { .. } => 0x06,
            Self::Ready { .. } => 0x07,
            Self::CancelReady { .. } => 0x08,
            Self::CancelGame { .. } => 0x09,
            Self::StartPlaying => 0x0a,
            Self::Played { .. } => 0x0b,
            Self::GameEnd => 0x0c,
            Self::Abort { .. } => 0x0d,
            Self::LockRoom { .. } => 0x0e,
            Self::CycleRoom { .. } => 0x0f,
        }
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u8(self.sub_id());
        match self {
            Self::Chat { user, content } => {
                w.write_i32_le(*user);
                w.write_string(content);
            }
            Self::CreateRoom { user } | Self::NewHost { user } | Self::GameStart { user } => {
                w.write_i32_le(*user);
            }
            Self::JoinRoom { user, name } | Self::LeaveRoom { user, name } => {
                w.write_i32_le(*user);
                w.write_string(name);
            }
            Self::SelectChart { user, name, id } => {
                w.write_i32_le(*user);
                w.write_string(name);
                w.write_i32_le(*id);
            }
            Self::Ready { user } | Self::CancelReady { user } | Self::CancelGame { user } | Self::Abort { user } => {
                w.write_i32_le(*user);
            }
            Self::StartPlaying | Self::GameEnd => {}
            Self::Played {
                user,
                score,
                accuracy,
                full_combo,
            } => {
                w.write_i32_le(*user);
                w.write_i32_le(*score);
                w.write_f32_le(*accuracy);
                w.write_bool(*full_combo);
            }
            Self::LockRoom { lock } => w.write_bool(*lock),
            Self::CycleRoom { cycle } => w.write_bool(*cycle),
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let sub_id = r.read_u8()?;
        Ok(match sub_id {
            0x00 => Self::Chat {
                user: r.read_i32_le()?,
                content: r.read_string(CHAT_MAX_LEN)?,
            },
            0x01 => Self::CreateRoom {
                user: r.read_i32_le()?,
            },
            0x02 => Self::JoinRoom {
                user: r.read_i32_le()?,
                name: r.read_string(TOKEN_MAX_LEN)?,
            },
            0x03 => Self::LeaveRoom {
                user: r.read_i32_le()?,
                name: r.read_string(TOKEN_MAX_LEN)?,
            },
            0x04 => Self::NewHost {
                user: r.read_i32_le()?,
            },
            0x05 => Self::SelectChart {
                user: r.read_i32_le()?,
                name: r.read_string(TOKEN_MAX_LEN)?,
                id: r.read_i32_le()?,
            },
            0x06 => Self::GameStart {
                user: r.read_i32_le()?,
            },
            0x07 => Self::Ready {
                user: r.read_i32_le()?,
            },
            0x08 => Self::CancelReady {
                user: r.read_i32_le()?,
            },
            0x09 => Self::CancelGame {
                user: r.read_i32_le()?,
            },
            0x0a => Self::StartPlaying,
            0x0b => Self::Played {
                user: r.read_i32_le()?,
                score: r.read_i32_le()?,
                accuracy: r.read_f32_le()?,
                full_combo: r.read_bool()?,
            },
            0x0c => Self::GameEnd,
            0x0d => Self::Abort {
                user: r.read_i32_le()?,
            },
            0x0e => Self::LockRoom {
                lock: r.read_bool()?,
            },
            0x0f => Self::CycleRoom {
                cycle: r.read_bool()?,
            },
            other => return Err(CodecError::UnknownTag(other, "Message")),
        })
    }
}

// ── Inbound packets (client -> server) ───────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPacket {
    Ping,
    Authenticate { token: String },
    Chat { message: String },
    Touches { data: Vec<u8> },
    Judges { data: Vec<u8> },
    CreateRoom { room_id: String },
    JoinRoom { room_id: String, monitor: bool },
    LeaveRoom,
    LockRoom { lock: bool },
    CycleRoom { cycle: bool },
    SelectChart { chart_id: i32 },
    RequestStart,
    Ready,
    CancelReady,
    Played { record_id: i32 },
    Abort,
}

impl InboundPacket {
    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        let mut r = ByteReader::new(buf);
        let id = r.read_u8()?;
        let packet = match id {
            0x00 => Self::Ping,
            0x01 => Self::Authenticate {
                token: r.read_string(TOKEN_MAX_LEN)?,
            },
            0x02 => Self::Chat {
                message: r.read_string(CHAT_MAX_LEN)?,
            },
            0x03 => Self::Touches {
                data: r.read_remaining()?,
            },
            0x04 => Self::Judges {
                data: r.read_remaining()?,
            },
            0x05 => Self::CreateRoom {
                room_id: r.read_string(ROOM_ID_MAX_LEN)?,
            },
            0x06 => Self::JoinRoom {
                room_id: r.read_string(ROOM_ID_MAX_LEN)?,
                monitor: r.read_bool()?,
            },
            0x07 => Self::LeaveRoom,
            0x08 => Self::LockRoom {
                lock: r.read_bool()?,
            },
            0x09 => Self::CycleRoom {
                cycle: r.read_bool()?,
            },
            0x0a => Self::SelectChart {
                chart_id: r.read_i32_le()?,
            },
            0x0b => Self::RequestStart,
            0x0c => Self::Ready,
            0x0d => Self::CancelReady,
            0x0e => Self::Played {
                record_id: r.read_i32_le()?,
            },
            0x0f => Self::Abort,
            other => return Err(CodecError::UnknownPacketId(other)),
        };
        Ok(packet)
    }
}

// ── Outbound packets (server -> client) ──────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPacket {
    Pong,
    Authenticate(Reply<AuthenticateSuccess>),
    Chat(Reply<()>),
    Touches(StreamOutbound),
    Judges(StreamOutbound),
    Message(Message),
    ChangeState(GameState),
    ChangeHost(bool),
    CreateRoom(Reply<()>),
    JoinRoom(Reply<JoinRoomSuccess>),
    OnJoinRoom { profile: UserProfile, monitor: bool },
    LeaveRoom(Reply<()>),
    LockRoom(Reply<()>),
    CycleRoom(Reply<()>),
    SelectChart(Reply<()>),
    RequestStart(Reply<()>),
    Ready(Reply<()>),
    CancelReady(Reply<()>),
    Played(Reply<()>),
    Abort(Reply<()>),
}

impl OutboundPacket {
    fn id(&self) -> u8 {
        match self {
            Self::Pong => 0x00,
            Self::Authenticate(_) => 0x01,
            Self::Chat(_) => 0x02,
            Self::Touches(_) => 0x03,
            Self::Judges(_) => 0x04,
            Self::Message(_) => 0x05,
            Self::ChangeState(_) => 0x06,
            Self::ChangeHost(_) => 0x07,
            Self::CreateRoom(_) => 0x08,
            Self::JoinRoom(_) => 0x09,
            Self::OnJoinRoom { .. } => 0x0a,
            Self::LeaveRoom(_) => 0x0b,
            Self::LockRoom(_) => 0x0c,
            Self::CycleRoom(_) => 0x0d,
            Self::SelectChart(_) => 0x0e,
            Self::RequestStart(_) => 0x0f,
            Self::Ready(_) => 0x10,
            Self::CancelReady(_) => 0x11,
            Self::Played(_) => 0x12,
            Self::Abort(_) => 0x13,
        }
    }

    /// Encodes this packet into one complete frame (length prefix + id + payload).
    pub fn encode_frame(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(self.id());
        match self {
            Self::Pong => {}
            Self::Authenticate(reply) => reply.encode_with(&mut w, |ok, w| {
                ok.profile.encode(w);
                w.write_bool(ok.is_monitor);
                w.write_bool(ok.room.is_some());
                if let Some(room) = &ok.room {
                    room.encode(w);
                }
            }),
            Self::Chat(reply) => reply.encode_unit(&mut w),
            Self::Touches(stream) | Self::Judges(stream) => stream.encode(&mut w),
            Self::Message(message) => message.encode(&mut w),
            Self::ChangeState(state) => state.encode(&mut w),
            Self::ChangeHost(is_host) => w.write_bool(*is_host),
            Self::CreateRoom(reply) => reply.encode_unit(&mut w),
            Self::JoinRoom(reply) => reply.encode_with(&mut w, |ok, w| {
                ok.state.encode(w);
                write_seq(w, &ok.users, |u, w| u.encode(w));
                write_seq(w, &ok.monitors, |id, w| w.write_i32_le(*id));
                w.write_bool(ok.live);
            }),
            Self::OnJoinRoom { profile, monitor } => {
                profile.encode(&mut w);
                w.write_bool(*monitor);
            }
            Self::LeaveRoom(reply)
            | Self::LockRoom(reply)
            | Self::CycleRoom(reply)
            | Self::SelectChart(reply)
            | Self::RequestStart(reply)
            | Self::Ready(reply)
            | Self::CancelReady(reply)
            | Self::Played(reply)
            | Self::Abort(reply) => reply.encode_unit(&mut w),
        }
        crate::codec::frame(&w.into_bytes())
    }

    /// Decodes one payload (as produced by [`Self::encode_frame`], minus the
    /// length prefix) back into a packet. Exercised by round-trip tests; a
    /// real deployment is a write-only peer for most of these, but a few
    /// (`OnJoinRoom`, `Message`, `ChangeState`, `ChangeHost`) are consumed by
    /// client-facing test doubles that assert on decoded values.
    pub fn decode(payload: &[u8]) -> CodecResult<Self> {
        let mut r = ByteReader::new(payload);
        let id = r.read_u8()?;
        Ok(match id {
            0x00 => Self::Pong,
            0x01 => Self::Authenticate(Reply::decode_with(&mut r, |r| {
                let profile = UserProfile::decode(r)?;
                let is_monitor = r.read_bool()?;
                let room = if r.read_bool()? {
                    Some(RoomInfo::decode(r)?)
                } else {
                    None
                };
                Ok(AuthenticateSuccess {
                    profile,
                    is_monitor,
                    room,
                })
            })?),
            0x02 => Self::Chat(Reply::decode_unit(&mut r)?),
            0x03 | 0x04 => {
                // Ambiguous on the wire with the Ack shape (both start with
                // bytes that could be either a discriminant or an i32); a
                // given connection only ever receives one shape for a given
                // packet (the sender gets Ack, other members get Relay), so
                // callers that know which one to expect should use
                // `decode_stream_ack` instead of this generic decoder.
                let stream = StreamOutbound::Relay {
                    user: r.read_i32_le()?,
                    data: r.read_remaining()?,
                };
                if id == 0x03 {
                    Self::Touches(stream)
                } else {
                    Self::Judges(stream)
                }
            }
            0x05 => Self::Message(Message::decode(&mut r)?),
            0x06 => Self::ChangeState(GameState::decode(&mut r)?),
            0x07 => Self::ChangeHost(r.read_bool()?),
            0x08 => Self::CreateRoom(Reply::decode_unit(&mut r)?),
            0x09 => Self::JoinRoom(Reply::decode_with(&mut r, |r| {
                let state = GameState::decode(r)?;
                let users = read_seq(r, UserProfile::decode)?;
                let monitors = read_seq(r, ByteReader::read_i32_le)?;
                let live = r.read_bool()?;
                Ok(JoinRoomSuccess {
                    state,
                    users,
                    monitors,
                    live,
                })
            })?),
            0x0a => Self::OnJoinRoom {
                profile: UserProfile::decode(&mut r)?,
                monitor: r.read_bool()?,
            },
            0x0b => Self::LeaveRoom(Reply::decode_unit(&mut r)?),
            0x0c => Self::LockRoom(Reply::decode_unit(&mut r)?),
            0x0d => Self::CycleRoom(Reply::decode_unit(&mut r)?),
            0x0e => Self::SelectChart(Reply::decode_unit(&mut r)?),
            0x0f => Self::RequestStart(Reply::decode_unit(&mut r)?),
            0x10 => Self::Ready(Reply::decode_unit(&mut r)?),
            0x11 => Self::CancelReady(Reply::decode_unit(&mut r)?),
            0x12 => Self::Played(Reply::decode_unit(&mut r)?),
            0x13 => Self::Abort(Reply::decode_unit(&mut r)?),
            other => return Err(CodecError::UnknownPacketId(other)),
        })
    }
}

/// Decodes a `Touches`/`Judges` acknowledgement payload explicitly (as
/// opposed to the relay shape), for callers that know which one they expect.
pub fn decode_stream_ack(payload: &[u8]) -> CodecResult<Reply<()>> {
    let mut r = ByteReader::new(payload);
    let _id = r.read_u8()?;
    Reply::decode_unit(&mut r)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn roundtrip(packet: OutboundPacket) -> OutboundPacket {
        let frame = packet.encode_frame();
        let (consumed, payload) =
            crate::codec::try_extract_frame(&frame).expect("ok").expect("complete");
        assert_eq!(consumed, frame.len());
        OutboundPacket::decode(&payload).expect("decode")
    }

    #[test]
    fn pong_roundtrip() {
        assert_eq!(roundtrip(OutboundPacket::Pong), OutboundPacket::Pong);
    }

    #[test]
    fn game_state_select_chart_none_roundtrip() {
        let state = GameState::SelectChart(None);
        let packet = OutboundPacket::ChangeState(state);
        assert_eq!(roundtrip(packet.clone()), packet);
    }

    #[test]
    fn game_state_select_chart_some_roundtrip() {
        let packet = OutboundPacket::ChangeState(GameState::SelectChart(Some(42)));
        assert_eq!(roundtrip(packet.clone()), packet);
    }

    #[test]
    fn game_state_waiting_and_playing_roundtrip() {
        assert_eq!(
            roundtrip(OutboundPacket::ChangeState(GameState::WaitForReady)),
            OutboundPacket::ChangeState(GameState::WaitForReady)
        );
        assert_eq!(
            roundtrip(OutboundPacket::ChangeState(GameState::Playing)),
            OutboundPacket::ChangeState(GameState::Playing)
        );
    }

    #[test]
    fn authenticate_failed_roundtrip() {
        let packet = OutboundPacket::Authenticate(Reply::failed("user_duplicate_join"));
        assert_eq!(roundtrip(packet.clone()), packet);
    }

    #[test]
    fn authenticate_success_with_room_roundtrip() {
        let packet = OutboundPacket::Authenticate(Reply::ok(AuthenticateSuccess {
            profile: UserProfile {
                id: 5,
                name: "Alice".into(),
            },
            is_monitor: false,
            room: Some(RoomInfo {
                room_id: "R".into(),
                state: GameState::SelectChart(Some(1)),
                live: true,
                locked: false,
                cycle: true,
                is_host: true,
                is_ready: false,
                participants: vec![RoomParticipant {
                    profile: UserProfile {
                        id: 5,
                        name: "Alice".into(),
                    },
                    monitor: false,
                }],
            }),
        }));
        assert_eq!(roundtrip(packet.clone()), packet);
    }

    #[test]
    fn join_room_success_roundtrip() {
        let packet = OutboundPacket::JoinRoom(Reply::ok(JoinRoomSuccess {
            state: GameState::SelectChart(None),
            users: vec![UserProfile {
                id: 1,
                name: "Host".into(),
            }],
            monitors: vec![9, 10],
            live: false,
        }));
        assert_eq!(roundtrip(packet.clone()), packet);
    }

    #[test]
    fn message_variants_roundtrip() {
        let messages = vec![
            Message::Chat {
                user: -1,
                content: "hi".into(),
            },
            Message::NewHost { user: 7 },
            Message::SelectChart {
                user: 1,
                name: "Song".into(),
                id: 99,
            },
            Message::StartPlaying,
            Message::Played {
                user: 2,
                score: 1_000_000,
                accuracy: 99.5,
                full_combo: true,
            },
            Message::GameEnd,
            Message::LockRoom { lock: true },
            Message::CycleRoom { cycle: false },
        ];
        for message in messages {
            let packet = OutboundPacket::Message(message);
            assert_eq!(roundtrip(packet.clone()), packet);
        }
    }

    #[test]
    fn change_host_roundtrip() {
        assert_eq!(
            roundtrip(OutboundPacket::ChangeHost(true)),
            OutboundPacket::ChangeHost(true)
        );
    }

    #[test]
    fn inbound_ping_and_authenticate_decode() {
        let mut w = ByteWriter::new();
        w.write_u8(0x00);
        assert_eq!(
            InboundPacket::decode(&w.into_bytes()).expect("decode"),
            InboundPacket::Ping
        );

        let mut w = ByteWriter::new();
        w.write_u8(0x01);
        w.write_string("tok");
        assert_eq!(
            InboundPacket::decode(&w.into_bytes()).expect("decode"),
            InboundPacket::Authenticate { token: "tok".into() }
        );
    }

    #[test]
    fn inbound_unknown_id_is_rejected() {
        let bytes = [0xff];
        assert!(matches!(
            InboundPacket::decode(&bytes),
            Err(CodecError::UnknownPacketId(0xff))
        ));
    }

    #[test]
    fn inbound_select_chart_and_played_decode_i32() {
        let mut w = ByteWriter::new();
        w.write_u8(0x0a);
        w.write_i32_le(-7);
        assert_eq!(
            InboundPacket::decode(&w.into_bytes()).expect("decode"),
            InboundPacket::SelectChart { chart_id: -7 }
        );
    }
}
