//! Room state machine and the cross-room registry.
//!
//! Each [`Room`] is wrapped in its own `tokio::sync::Mutex`; the registry's
//! forward map (room-id → room) and inverse map (user-id → room-id) each
//! live behind their own `std::sync::Mutex`, held only for the O(1) map
//! operation itself, never across an `.await`. See the module-level design
//! note in `crate::config` docs for the rest of the concurrency contract.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::error::RoomError;
use crate::monitors::MonitorRoster;
use crate::protocol::{
    GameState, JoinRoomSuccess, Message, OutboundPacket, Reply, RoomInfo, RoomParticipant,
    StreamOutbound, UserProfile,
};

/// One authenticated user's association with the connection they joined
/// through. A user is a member of at most one room.
pub struct Member {
    pub profile: UserProfile,
    pub connection: ConnectionHandle,
}

/// A single room: state machine plus membership bookkeeping.
pub struct Room {
    pub id: String,
    pub host: Option<i32>,
    pub state: GameState,
    pub live: bool,
    pub locked: bool,
    pub cycle: bool,
    users_order: Vec<i32>,
    users: HashMap<i32, Member>,
    pub monitors: Vec<i32>,
    pub chart: Option<i32>,
    pub ready: HashSet<i32>,
    pub finished: HashSet<i32>,
}

impl Room {
    fn new(id: String) -> Self {
        Self {
            id,
            host: None,
            state: GameState::SelectChart(None),
            live: false,
            locked: false,
            cycle: false,
            users_order: Vec::new(),
            users: HashMap::new(),
            monitors: Vec::new(),
            chart: None,
            ready: HashSet::new(),
            finished: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.users_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users_order.is_empty()
    }

    pub fn contains(&self, user_id: i32) -> bool {
        self.users.contains_key(&user_id)
    }

    fn insert_member(&mut self, member: Member) {
        let id = member.profile.id;
        self.users_order.push(id);
        self.users.insert(id, member);
    }

    fn remove_member(&mut self, user_id: i32) -> Option<Member> {
        self.users_order.retain(|id| *id != user_id);
        self.ready.remove(&user_id);
        self.finished.remove(&user_id);
        self.users.remove(&user_id)
    }

    fn other_member_ids(&self, exclude: i32) -> Vec<i32> {
        self.users_order.iter().copied().filter(|id| *id != exclude).collect()
    }

    fn user_profiles(&self) -> Vec<UserProfile> {
        self.users_order
            .iter()
            .filter_map(|id| self.users.get(id).map(|m| m.profile.clone()))
            .collect()
    }

    fn participants(&self) -> Vec<RoomParticipant> {
        self.users_order
            .iter()
            .filter_map(|id| {
                self.users.get(id).map(|m| RoomParticipant {
                    profile: m.profile.clone(),
                    monitor: false,
                })
            })
            .chain(self.monitors.iter().filter_map(|id| {
                self.users.get(id).map(|m| RoomParticipant {
                    profile: m.profile.clone(),
                    monitor: true,
                })
            }))
            .collect()
    }

    pub fn info_for(&self, viewer: i32) -> RoomInfo {
        RoomInfo {
            room_id: self.id.clone(),
            state: self.state,
            live: self.live,
            locked: self.locked,
            cycle: self.cycle,
            is_host: self.host == Some(viewer),
            is_ready: self.ready.contains(&viewer),
            participants: self.participants(),
        }
    }

    fn send_to(&self, user_id: i32, packet: &OutboundPacket) {
        if let Some(member) = self.users.get(&user_id) {
            if !member.connection.try_send(packet.encode_frame()) {
                debug!(user_id, "dropped outbound packet, queue full or closed");
            }
        }
    }

    /// Broadcasts to every member, the sender included (room-wide broadcasts
    /// are mirrored back to their origin throughout this protocol).
    fn broadcast(&self, packet: &OutboundPacket) {
        let frame = packet.encode_frame();
        for id in &self.users_order {
            if let Some(member) = self.users.get(id) {
                if !member.connection.try_send(frame.clone()) {
                    warn!(user_id = id, "dropped broadcast packet, queue full or closed");
                }
            }
        }
    }

    fn broadcast_message(&self, message: Message) {
        self.broadcast(&OutboundPacket::Message(message));
    }

    /// Runs after any mutation to `ready`: transitions to `Playing` when
    /// every member is ready.
    fn check_ready_quorum(&mut self) {
        if self.state != GameState::WaitForReady {
            return;
        }
        if !self.users_order.is_empty() && self.ready.len() == self.users_order.len() {
            self.ready.clear();
            self.broadcast_message(Message::StartPlaying);
            self.state = GameState::Playing;
            self.broadcast(&OutboundPacket::ChangeState(self.state));
        }
    }

    /// Runs after any mutation to `finished`: ends the game and advances
    /// (or keeps) the host when every member has finished.
    fn check_finish_quorum(&mut self) {
        if !self.users_order.is_empty() && self.finished.len() == self.users_order.len() {
            self.broadcast_message(Message::GameEnd);
            if self.cycle {
                if let Some(old_host) = self.host {
                    let new_host = self.next_host_in_cycle(old_host);
                    if new_host != old_host {
                        self.host = Some(new_host);
                        self.send_to(old_host, &OutboundPacket::ChangeHost(false));
                        self.send_to(new_host, &OutboundPacket::ChangeHost(true));
                    }
                }
            }
            self.chart = None;
            self.state = GameState::SelectChart(None);
            self.broadcast(&OutboundPacket::ChangeState(self.state));
            self.finished.clear();
        }
    }

    /// Insertion-order successor of `old_host`, wrapping around; falls back
    /// to the first user if `old_host` is no longer a member.
    fn next_host_in_cycle(&self, old_host: i32) -> i32 {
        match self.users_order.iter().position(|id| *id == old_host) {
            Some(idx) => {
                let next_idx = (idx + 1) % self.users_order.len();
                self.users_order.get(next_idx).copied().unwrap_or(old_host)
            }
            None => self.users_order.first().copied().unwrap_or(old_host),
        }
    }
}

/// The cross-room registry: room lookup by id, plus the inverse
/// user-id → room-id index used for O(1) membership-uniqueness checks.
pub struct RoomRegistry {
    rooms: StdMutex<HashMap<String, Arc<AsyncMutex<Room>>>>,
    user_rooms: StdMutex<HashMap<i32, String>>,
    monitors: MonitorRoster,
}

impl RoomRegistry {
    pub fn new(monitors: MonitorRoster) -> Self {
        Self {
            rooms: StdMutex::new(HashMap::new()),
            user_rooms: StdMutex::new(HashMap::new()),
            monitors,
        }
    }

    fn room_id_for_user(&self, user_id: i32) -> Option<String> {
        self.user_rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .cloned()
    }

    fn room_by_id(&self, room_id: &str) -> Option<Arc<AsyncMutex<Room>>> {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .cloned()
    }

    pub fn room_for_user(&self, user_id: i32) -> Option<Arc<AsyncMutex<Room>>> {
        let room_id = self.room_id_for_user(user_id)?;
        self.room_by_id(&room_id)
    }

    fn remove_room_if_empty(&self, room_id: &str, is_empty: bool) {
        if is_empty {
            self.rooms.lock().unwrap_or_else(|e| e.into_inner()).remove(room_id);
        }
    }

    pub async fn create_room(
        &self,
        user_id: i32,
        profile: UserProfile,
        connection: ConnectionHandle,
        room_id: String,
    ) -> Result<(), RoomError> {
        {
            let user_rooms = self.user_rooms.lock().unwrap_or_else(|e| e.into_inner());
            if user_rooms.contains_key(&user_id) {
                return Err(RoomError::RoomDuplicateCreate);
            }
        }
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        if rooms.contains_key(&room_id) {
            return Err(RoomError::RoomAlreadyExists);
        }
        let mut room = Room::new(room_id.clone());
        room.host = Some(user_id);
        room.insert_member(Member { profile, connection });
        rooms.insert(room_id.clone(), Arc::new(AsyncMutex::new(room)));
        drop(rooms);
        self.user_rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, room_id);
        Ok(())
    }

    pub async fn join_room(
        &self,
        user_id: i32,
        profile: UserProfile,
        connection: ConnectionHandle,
        room_id: String,
        as_monitor_request: bool,
    ) -> Result<JoinRoomSuccess, RoomError> {
        let is_roster_monitor = self.monitors.is_monitor(user_id);

        let room_arc = self.room_by_id(&room_id).ok_or(RoomError::RoomNotFound)?;

        if is_roster_monitor && as_monitor_request {
            let mut room = room_arc.lock().await;
            room.monitors.push(user_id);
            room.live = true;
            let success = JoinRoomSuccess {
                state: room.state,
                users: room.user_profiles(),
                monitors: room.monitors.clone(),
                live: room.live,
            };
            drop(room);
            connection.try_send(OutboundPacket::JoinRoom(Reply::ok(success.clone())).encode_frame());
            return Ok(success);
        }

        {
            let user_rooms = self.user_rooms.lock().unwrap_or_else(|e| e.into_inner());
            if user_rooms.contains_key(&user_id) {
                return Err(RoomError::RoomDuplicateCreate);
            }
        }

        let mut room = room_arc.lock().await;
        if room.locked {
            return Err(RoomError::RoomAlreadyLocked);
        }
        if room.state == GameState::WaitForReady {
            return Err(RoomError::RoomInReadyState);
        }

        room.insert_member(Member {
            profile: profile.clone(),
            connection: connection.clone(),
        });

        let success = JoinRoomSuccess {
            state: room.state,
            users: room.user_profiles(),
            monitors: room.monitors.clone(),
            live: room.live,
        };

        room.send_to(user_id, &OutboundPacket::JoinRoom(Reply::ok(success.clone())));
        for other in room.other_member_ids(user_id) {
            room.send_to(
                other,
                &OutboundPacket::OnJoinRoom {
                    profile: profile.clone(),
                    monitor: false,
                },
            );
        }
        room.broadcast_message(Message::JoinRoom {
            user: user_id,
            name: profile.name.clone(),
        });
        drop(room);

        self.user_rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, room_id);

        Ok(success)
    }

    /// Shared by the explicit `LeaveRoom` packet handler and disconnect
    /// cleanup.
    pub async fn leave_room(&self, user_id: i32) -> Result<(), RoomError> {
        let room_id = self.room_id_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let room_arc = self.room_by_id(&room_id).ok_or(RoomError::NotInRoom)?;

        let is_empty_after;
        {
            let mut room = room_arc.lock().await;
            let is_host = room.host == Some(user_id);
            let remaining = room.other_member_ids(user_id);

            let new_host = if is_host && remaining.is_empty() {
                None
            } else if is_host {
                let idx = rand::rng().random_range(0..remaining.len());
                remaining.get(idx).copied()
            } else {
                room.host
            };

            let profile_name = room
                .users
                .get(&user_id)
                .map(|m| m.profile.name.clone())
                .unwrap_or_default();

            room.remove_member(user_id);
            room.send_to(user_id, &OutboundPacket::LeaveRoom(Reply::ok(())));
            room.broadcast_message(Message::LeaveRoom {
                user: user_id,
                name: profile_name,
            });

            if is_host && new_host != Some(user_id) {
                room.host = new_host;
                if let Some(new_host_id) = new_host {
                    room.send_to(new_host_id, &OutboundPacket::ChangeHost(true));
                }
            }

            is_empty_after = room.is_empty();
        }

        self.user_rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&user_id);
        self.remove_room_if_empty(&room_id, is_empty_after);
        Ok(())
    }

    pub async fn select_chart(
        &self,
        user_id: i32,
        chart_id: i32,
        chart_name: String,
    ) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let mut room = room_arc.lock().await;
        if room.host != Some(user_id) {
            return Err(RoomError::NotHost);
        }
        room.chart = Some(chart_id);
        room.state = GameState::SelectChart(Some(chart_id));
        room.broadcast(&OutboundPacket::ChangeState(room.state));
        room.broadcast_message(Message::SelectChart {
            user: user_id,
            name: chart_name,
            id: chart_id,
        });
        room.send_to(user_id, &OutboundPacket::SelectChart(Reply::ok(())));
        Ok(())
    }

    pub async fn lock_room(&self, user_id: i32, lock: bool) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let mut room = room_arc.lock().await;
        if room.host != Some(user_id) {
            return Err(RoomError::NotHost);
        }
        if room.locked == lock {
            return Err(if lock {
                RoomError::RoomAlreadyLocked
            } else {
                RoomError::RoomAlreadyUnlocked
            });
        }
        room.locked = lock;
        room.send_to(user_id, &OutboundPacket::LockRoom(Reply::ok(())));
        room.broadcast_message(Message::LockRoom { lock });
        Ok(())
    }

    pub async fn cycle_room(&self, user_id: i32, cycle: bool) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let mut room = room_arc.lock().await;
        if room.host != Some(user_id) {
            return Err(RoomError::NotHost);
        }
        if room.cycle == cycle {
            return Err(if cycle {
                RoomError::RoomAlreadyCycled
            } else {
                RoomError::RoomAlreadyNotCycled
            });
        }
        room.cycle = cycle;
        room.send_to(user_id, &OutboundPacket::CycleRoom(Reply::ok(())));
        room.broadcast_message(Message::CycleRoom { cycle });
        Ok(())
    }

    pub async fn request_start(&self, user_id: i32) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let mut room = room_arc.lock().await;
        if room.host != Some(user_id) {
            return Err(RoomError::NotHost);
        }
        if !matches!(room.state, GameState::SelectChart(_)) {
            return Err(RoomError::InvalidRoomState);
        }
        if room.chart.is_none() {
            return Err(RoomError::ChartNotSelected);
        }
        room.state = GameState::WaitForReady;
        room.ready.insert(user_id);
        room.broadcast(&OutboundPacket::ChangeState(room.state));
        room.send_to(user_id, &OutboundPacket::RequestStart(Reply::ok(())));
        room.check_ready_quorum();
        Ok(())
    }

    pub async fn ready(&self, user_id: i32) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let mut room = room_arc.lock().await;
        if room.state != GameState::WaitForReady {
            return Err(RoomError::InvalidRoomState);
        }
        room.ready.insert(user_id);
        room.send_to(user_id, &OutboundPacket::Ready(Reply::ok(())));
        room.broadcast_message(Message::Ready { user: user_id });
        room.check_ready_quorum();
        Ok(())
    }

    pub async fn cancel_ready(&self, user_id: i32) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let mut room = room_arc.lock().await;
        if room.state != GameState::WaitForReady {
            return Err(RoomError::InvalidRoomState);
        }
        if room.host == Some(user_id) {
            room.ready.clear();
            room.state = GameState::SelectChart(room.chart);
            room.broadcast(&OutboundPacket::ChangeState(room.state));
            room.send_to(user_id, &OutboundPacket::CancelReady(Reply::ok(())));
        } else {
            room.ready.remove(&user_id);
            room.send_to(user_id, &OutboundPacket::CancelReady(Reply::ok(())));
            room.broadcast_message(Message::CancelReady { user: user_id });
        }
        Ok(())
    }

    pub async fn played(
        &self,
        user_id: i32,
        score: i32,
        accuracy: f32,
        full_combo: bool,
    ) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let mut room = room_arc.lock().await;
        if room.state != GameState::Playing {
            return Err(RoomError::InvalidRoomState);
        }
        room.broadcast_message(Message::Played {
            user: user_id,
            score,
            accuracy,
            full_combo,
        });
        room.finished.insert(user_id);
        room.send_to(user_id, &OutboundPacket::Played(Reply::ok(())));
        room.check_finish_quorum();
        Ok(())
    }

    pub async fn abort(&self, user_id: i32) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let mut room = room_arc.lock().await;
        if room.state != GameState::Playing {
            return Err(RoomError::InvalidRoomState);
        }
        room.broadcast_message(Message::Abort { user: user_id });
        room.finished.insert(user_id);
        room.send_to(user_id, &OutboundPacket::Abort(Reply::ok(())));
        room.check_finish_quorum();
        Ok(())
    }

    /// No-op broadcast when the caller isn't in a room: chat is never an
    /// error, it just has nowhere to go.
    pub async fn chat(&self, user_id: i32, content: String) {
        if let Some(room_arc) = self.room_for_user(user_id) {
            let room = room_arc.lock().await;
            room.broadcast(&OutboundPacket::Chat(Reply::ok(())));
            room.broadcast_message(Message::Chat {
                user: user_id,
                content,
            });
        }
    }

    pub async fn forward_stream(
        &self,
        user_id: i32,
        data: Vec<u8>,
        pick: impl Fn(StreamOutbound) -> OutboundPacket,
    ) -> Result<(), RoomError> {
        let room_arc = self.room_for_user(user_id).ok_or(RoomError::NotInRoom)?;
        let room = room_arc.lock().await;
        if room.state != GameState::Playing {
            return Err(RoomError::InvalidRoomState);
        }
        for other in room.other_member_ids(user_id) {
            room.send_to(
                other,
                &pick(StreamOutbound::Relay {
                    user: user_id,
                    data: data.clone(),
                }),
            );
        }
        room.send_to(user_id, &pick(StreamOutbound::Ack(Reply::ok(()))));
        Ok(())
    }

    pub async fn force_destroy_room(&self, room_id: &str) -> Result<(), RoomError> {
        let room_arc = self.room_by_id(room_id).ok_or(RoomError::RoomNotFound)?;
        let member_ids;
        {
            let room = room_arc.lock().await;
            room.broadcast_message(Message::Abort { user: -1 });
            member_ids = room.users_order.clone();
        }
        {
            let mut user_rooms = self.user_rooms.lock().unwrap_or_else(|e| e.into_inner());
            for id in member_ids {
                user_rooms.remove(&id);
            }
        }
        self.rooms.lock().unwrap_or_else(|e| e.into_inner()).remove(room_id);
        Ok(())
    }

    pub async fn force_kick_player(&self, room_id: &str, user_id: i32) -> Result<(), RoomError> {
        let room_arc = self.room_by_id(room_id).ok_or(RoomError::RoomNotFound)?;
        let is_empty_after;
        {
            let mut room = room_arc.lock().await;
            if !room.contains(user_id) {
                return Err(RoomError::TargetNotInRoom);
            }
            let name = room.users.get(&user_id).map(|m| m.profile.name.clone()).unwrap_or_default();
            room.send_to(user_id, &OutboundPacket::Abort(Reply::failed("kicked_by_admin")));
            let was_host = room.host == Some(user_id);
            room.remove_member(user_id);
            room.broadcast_message(Message::LeaveRoom { user: user_id, name });
            if was_host {
                let remaining = room.users_order.clone();
                room.host = remaining.first().copied();
                if let Some(new_host) = room.host {
                    room.send_to(new_host, &OutboundPacket::ChangeHost(true));
                }
            }
            is_empty_after = room.is_empty();
        }
        self.user_rooms.lock().unwrap_or_else(|e| e.into_inner()).remove(&user_id);
        self.remove_room_if_empty(room_id, is_empty_after);
        Ok(())
    }

    pub async fn force_ready_player(&self, room_id: &str, user_id: i32) -> Result<(), RoomError> {
        let room_arc = self.room_by_id(room_id).ok_or(RoomError::RoomNotFound)?;
        let mut room = room_arc.lock().await;
        if !room.contains(user_id) {
            return Err(RoomError::TargetNotInRoom);
        }
        if room.state != GameState::WaitForReady {
            return Err(RoomError::InvalidRoomState);
        }
        room.ready.insert(user_id);
        room.broadcast_message(Message::Ready { user: user_id });
        room.check_ready_quorum();
        Ok(())
    }
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
    use tokio::sync::mpsc;

    fn test_connection() -> (ConnectionHandle, mpsc::Receiver<Vec<u8>>) {
        crate::connection::test_support::handle_with_capacity(16)
    }

    fn profile(id: i32, name: &str) -> UserProfile {
        UserProfile {
            id,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_create_room_is_rejected() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        let (conn, _rx) = test_connection();
        registry
            .create_room(42, profile(42, "A"), conn.clone(), "R".to_string())
            .await
            .expect("first create succeeds");

        let err = registry
            .create_room(42, profile(42, "A"), conn, "R2".to_string())
            .await
            .expect_err("second create from same user fails");
        assert_eq!(err, RoomError::RoomDuplicateCreate);
    }

    #[tokio::test]
    async fn duplicate_room_id_is_rejected() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        let (conn1, _rx1) = test_connection();
        let (conn2, _rx2) = test_connection();
        registry
            .create_room(1, profile(1, "A"), conn1, "R".to_string())
            .await
            .expect("first create succeeds");
        let err = registry
            .create_room(2, profile(2, "B"), conn2, "R".to_string())
            .await
            .expect_err("duplicate room id fails");
        assert_eq!(err, RoomError::RoomAlreadyExists);
    }

    #[tokio::test]
    async fn host_leaves_with_others_present_transfers_host() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        let (conn1, _rx1) = test_connection();
        let (conn2, mut rx2) = test_connection();
        let (conn3, mut rx3) = test_connection();
        registry
            .create_room(1, profile(1, "A"), conn1, "R".to_string())
            .await
            .expect("create");
        registry
            .join_room(2, profile(2, "B"), conn2, "R".to_string(), false)
            .await
            .expect("join 2");
        registry
            .join_room(3, profile(3, "C"), conn3, "R".to_string(), false)
            .await
            .expect("join 3");

        registry.leave_room(1).await.expect("leave");

        let room = registry.room_for_user(2).expect("room still exists");
        let room = room.lock().await;
        assert!(room.host == Some(2) || room.host == Some(3));
        assert_eq!(room.len(), 2);
        drop(room);

        // Exactly one of 2/3 should have received a ChangeHost(true).
        let mut saw_change_host = 0;
        while let Ok(frame) = rx2.try_recv() {
            if matches!(
                OutboundPacket::decode(&frame[frame_header_len(&frame)..]),
                Ok(OutboundPacket::ChangeHost(true))
            ) {
                saw_change_host += 1;
            }
        }
        while let Ok(frame) = rx3.try_recv() {
            if matches!(
                OutboundPacket::decode(&frame[frame_header_len(&frame)..]),
                Ok(OutboundPacket::ChangeHost(true))
            ) {
                saw_change_host += 1;
            }
        }
        assert_eq!(saw_change_host, 1);
    }

    fn frame_header_len(frame: &[u8]) -> usize {
        // VarInt length prefix: count continuation bytes.
        let mut n = 0;
        while frame[n] & 0x80 != 0 {
            n += 1;
        }
        n + 1
    }

    #[tokio::test]
    async fn last_member_leaving_destroys_room() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        let (conn, _rx) = test_connection();
        registry
            .create_room(1, profile(1, "A"), conn, "R".to_string())
            .await
            .expect("create");
        registry.leave_room(1).await.expect("leave");
        assert!(registry.room_for_user(1).is_none());
        assert!(registry.room_by_id("R").is_none());
    }

    #[tokio::test]
    async fn ready_quorum_transitions_to_playing() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        let (conn1, _rx1) = test_connection();
        let (conn2, _rx2) = test_connection();
        registry
            .create_room(1, profile(1, "Host"), conn1, "R".to_string())
            .await
            .expect("create");
        registry
            .join_room(2, profile(2, "Guest"), conn2, "R".to_string(), false)
            .await
            .expect("join");

        registry.select_chart(1, 99, "Song".to_string()).await.expect("select chart");
        registry.request_start(1).await.expect("request start");
        registry.ready(2).await.expect("ready");

        let room = registry.room_for_user(1).expect("room");
        let room = room.lock().await;
        assert_eq!(room.state, GameState::Playing);
        assert!(room.ready.is_empty());
    }

    #[tokio::test]
    async fn finish_quorum_cycles_host_in_insertion_order() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        let (conn_a, mut rx_a) = test_connection();
        let (conn_b, mut rx_b) = test_connection();
        registry
            .create_room(1, profile(1, "A"), conn_a, "R".to_string())
            .await
            .expect("create");
        registry
            .join_room(2, profile(2, "B"), conn_b, "R".to_string(), false)
            .await
            .expect("join");
        registry.cycle_room(1, true).await.expect("enable cycle");

        {
            let room = registry.room_for_user(1).expect("room");
            let mut room = room.lock().await;
            room.state = GameState::Playing;
            room.chart = Some(5);
        }

        registry.abort(1).await.expect("abort 1");
        registry.abort(2).await.expect("abort 2");

        let room = registry.room_for_user(1).expect("room");
        let room = room.lock().await;
        assert_eq!(room.host, Some(2));
        assert_eq!(room.chart, None);
        assert_eq!(room.state, GameState::SelectChart(None));
        assert!(room.finished.is_empty());
        drop(room);

        let mut a_got_false = false;
        while let Ok(frame) = rx_a.try_recv() {
            if matches!(
                OutboundPacket::decode(&frame[frame_header_len(&frame)..]),
                Ok(OutboundPacket::ChangeHost(false))
            ) {
                a_got_false = true;
            }
        }
        let mut b_got_true = false;
        while let Ok(frame) = rx_b.try_recv() {
            if matches!(
                OutboundPacket::decode(&frame[frame_header_len(&frame)..]),
                Ok(OutboundPacket::ChangeHost(true))
            ) {
                b_got_true = true;
            }
        }
        assert!(a_got_false);
        assert!(b_got_true);
    }

    #[tokio::test]
    async fn join_locked_room_is_rejected_and_caller_not_added() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        let (conn1, _rx1) = test_connection();
        let (conn7, _rx7) = test_connection();
        registry
            .create_room(1, profile(1, "A"), conn1, "R".to_string())
            .await
            .expect("create");
        registry.lock_room(1, true).await.expect("lock");

        let err = registry
            .join_room(7, profile(7, "G"), conn7, "R".to_string(), false)
            .await
            .expect_err("locked room rejects join");
        assert_eq!(err, RoomError::RoomAlreadyLocked);

        let room = registry.room_for_user(1).expect("room");
        let room = room.lock().await;
        assert!(!room.contains(7));
    }

    #[tokio::test]
    async fn idempotent_lock_is_rejected_without_mutation() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        let (conn, _rx) = test_connection();
        registry
            .create_room(1, profile(1, "A"), conn, "R".to_string())
            .await
            .expect("create");
        registry.lock_room(1, true).await.expect("lock");
        let err = registry.lock_room(1, true).await.expect_err("already locked");
        assert_eq!(err, RoomError::RoomAlreadyLocked);
    }

    #[tokio::test]
    async fn chat_outside_room_is_a_silent_no_op() {
        let registry = RoomRegistry::new(MonitorRoster::empty());
        // Never panics or errors even though user 99 is in no room.
        registry.chat(99, "hello".to_string()).await;
    }
}
