//! Per-connection session handler: pre-authentication gating, the
//! authenticate flow (identity lookup, duplicate-login eviction, greeter
//! messages), and dispatch of every inbound packet to the room registry.

use std::sync::Arc;

use tracing::{info, warn};

use crate::connection::ConnectionHandle;
use crate::error::{RoomError, ServerError, ServerResult};
use crate::identity::UserInfo;
use crate::protocol::{AuthenticateSuccess, InboundPacket, Message, OutboundPacket, Reply, UserProfile};
use crate::server::ServerState;

const GREETER_LINES: [&str; 3] = [
    "Welcome to the lobby.",
    "You are connected to phira-lobby-server.",
    "Say /help in the client for a list of commands.",
];

/// Per-connection state carried across packets. `identity` is `None` until
/// a successful `Authenticate`; before that, only `Ping`/`Authenticate` are
/// accepted.
pub struct Session {
    state: Arc<ServerState>,
    connection: ConnectionHandle,
    identity: Option<UserProfile>,
    language: String,
}

impl Session {
    pub fn new(state: Arc<ServerState>, connection: ConnectionHandle) -> Self {
        Self {
            state,
            connection,
            identity: None,
            language: "zh-CN".to_string(),
        }
    }

    fn send(&self, packet: OutboundPacket) {
        if !self.connection.try_send(packet.encode_frame()) {
            warn!("dropped outbound packet, queue full or closed");
        }
    }

    fn user_id(&self) -> Option<i32> {
        self.identity.as_ref().map(|p| p.id)
    }

    /// Decodes and dispatches one inbound frame. Returns an error when the
    /// connection must be closed (codec error, protocol violation, or a
    /// fatal external-service failure during authenticate).
    pub async fn handle_frame(&mut self, payload: &[u8]) -> ServerResult<()> {
        let packet = InboundPacket::decode(payload)?;
        self.connection.touch();

        if self.identity.is_none() {
            return match packet {
                InboundPacket::Ping => {
                    self.send(OutboundPacket::Pong);
                    Ok(())
                }
                InboundPacket::Authenticate { token } => self.handle_authenticate(token).await,
                _ => Err(ServerError::UnauthenticatedPacket),
            };
        }

        self.dispatch_authenticated(packet).await
    }

    async fn handle_authenticate(&mut self, token: String) -> ServerResult<()> {
        let info: UserInfo = self.state.identity.get_user_info(&token).await?;
        let profile = UserProfile {
            id: info.id,
            name: info.name.clone(),
        };

        {
            let mut online = self.state.online.lock().unwrap_or_else(|e| e.into_inner());
            match online.get(&info.id) {
                Some(prior_connection) if !prior_connection.is_closed() => {
                    drop(online);
                    self.send(OutboundPacket::Authenticate(Reply::failed("user_duplicate_join")));
                    self.connection.request_close();
                    return Err(ServerError::UnauthenticatedPacket);
                }
                _ => {
                    online.insert(info.id, self.connection.clone());
                }
            }
        }

        self.identity = Some(profile.clone());
        self.language = info.language;

        self.send(OutboundPacket::Authenticate(Reply::ok(AuthenticateSuccess {
            profile,
            is_monitor: false,
            room: None,
        })));

        for line in GREETER_LINES {
            self.send(OutboundPacket::Message(Message::Chat {
                user: -1,
                content: line.to_string(),
            }));
        }
        self.send(OutboundPacket::Message(Message::Chat {
            user: -1,
            content: format!("server version {}", env!("CARGO_PKG_VERSION")),
        }));

        info!(user_id = info.id, "authenticated");
        Ok(())
    }

    async fn dispatch_authenticated(&mut self, packet: InboundPacket) -> ServerResult<()> {
        let profile = match &self.identity {
            Some(profile) => profile.clone(),
            None => return Err(ServerError::UnauthenticatedPacket),
        };
        let user_id = profile.id;

        match packet {
            InboundPacket::Ping => self.send(OutboundPacket::Pong),
            InboundPacket::Authenticate { .. } => return Err(ServerError::UnauthenticatedPacket),
            InboundPacket::Chat { message } => {
                self.state.rooms.chat(user_id, message).await;
            }
            InboundPacket::Touches { data } => {
                let result = self
                    .state
                    .rooms
                    .forward_stream(user_id, data, OutboundPacket::Touches)
                    .await;
                self.reply_stream(result, OutboundPacket::Touches);
            }
            InboundPacket::Judges { data } => {
                let result = self
                    .state
                    .rooms
                    .forward_stream(user_id, data, OutboundPacket::Judges)
                    .await;
                self.reply_stream(result, OutboundPacket::Judges);
            }
            InboundPacket::CreateRoom { room_id } => {
                let result = self
                    .state
                    .rooms
                    .create_room(user_id, profile, self.connection.clone(), room_id)
                    .await;
                self.reply_unit(result, OutboundPacket::CreateRoom);
            }
            InboundPacket::JoinRoom { room_id, monitor } => {
                // join_room sends the Success reply and the OnJoinRoom/JoinRoomMessage
                // broadcasts itself, since it needs the room lock held throughout.
                if let Err(err) = self
                    .state
                    .rooms
                    .join_room(user_id, profile, self.connection.clone(), room_id, monitor)
                    .await
                {
                    self.send(OutboundPacket::JoinRoom(Reply::failed(err.reason())));
                }
            }
            InboundPacket::LeaveRoom => {
                let result = self.state.rooms.leave_room(user_id).await;
                if let Err(err) = result {
                    self.send(OutboundPacket::LeaveRoom(Reply::failed(err.reason())));
                }
            }
            InboundPacket::LockRoom { lock } => {
                let result = self.state.rooms.lock_room(user_id, lock).await;
                self.reply_unit(result, OutboundPacket::LockRoom);
            }
            InboundPacket::CycleRoom { cycle } => {
                let result = self.state.rooms.cycle_room(user_id, cycle).await;
                self.reply_unit(result, OutboundPacket::CycleRoom);
            }
            InboundPacket::SelectChart { chart_id } => {
                match self.state.identity.get_chart_info(chart_id).await {
                    Ok(chart) => {
                        let result = self
                            .state
                            .rooms
                            .select_chart(user_id, chart_id, chart.name)
                            .await;
                        if let Err(err) = result {
                            self.send(OutboundPacket::SelectChart(Reply::failed(err.reason())));
                        }
                    }
                    Err(_) => {
                        self.send(OutboundPacket::SelectChart(Reply::failed(
                            RoomError::ChartNotFound.reason(),
                        )));
                    }
                }
            }
            InboundPacket::RequestStart => {
                let result = self.state.rooms.request_start(user_id).await;
                self.reply_unit(result, OutboundPacket::RequestStart);
            }
            InboundPacket::Ready => {
                let result = self.state.rooms.ready(user_id).await;
                self.reply_unit(result, OutboundPacket::Ready);
            }
            InboundPacket::CancelReady => {
                let result = self.state.rooms.cancel_ready(user_id).await;
                self.reply_unit(result, OutboundPacket::CancelReady);
            }
            InboundPacket::Played { record_id } => match self.state.identity.get_record_result(record_id).await {
                Ok(record) => {
                    let result = self
                        .state
                        .rooms
                        .played(user_id, record.score, record.accuracy, record.full_combo)
                        .await;
                    if let Err(err) = result {
                        self.send(OutboundPacket::Played(Reply::failed(err.reason())));
                    }
                }
                Err(_) => {
                    self.send(OutboundPacket::Played(Reply::failed(
                        RoomError::RecordNotFound.reason(),
                    )));
                }
            },
            InboundPacket::Abort => {
                let result = self.state.rooms.abort(user_id).await;
                self.reply_unit(result, OutboundPacket::Abort);
            }
        }
        Ok(())
    }

    fn reply_unit(&self, result: Result<(), RoomError>, ok: impl Fn(Reply<()>) -> OutboundPacket) {
        match result {
            Ok(()) => {}
            Err(err) => self.send(ok(Reply::failed(err.reason()))),
        }
    }

    fn reply_stream(
        &self,
        result: Result<(), RoomError>,
        ok: impl Fn(crate::protocol::StreamOutbound) -> OutboundPacket,
    ) {
        if let Err(err) = result {
            self.send(ok(crate::protocol::StreamOutbound::Ack(Reply::failed(err.reason()))));
        }
    }

    /// Cleans up after the connection closes: deregisters from the online
    /// table and leaves any room the user was in, mirroring the explicit
    /// `LeaveRoom` flow.
    pub async fn on_disconnect(&mut self) {
        let Some(user_id) = self.user_id() else {
            return;
        };
        self.state.online.lock().unwrap_or_else(|e| e.into_inner()).remove(&user_id);
        let _ = self.state.rooms.leave_room(user_id).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::error::ServerError as E;
    use crate::identity::{ChartInfo, IdentityClient, RecordResult};
    use crate::monitors::MonitorRoster;
    use crate::room::RoomRegistry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct MockIdentity {
        users: HashMap<String, UserInfo>,
    }

    #[async_trait]
    impl IdentityClient for MockIdentity {
        async fn get_user_info(&self, token: &str) -> Result<UserInfo, E> {
            self.users
                .get(token)
                .cloned()
                .ok_or_else(|| E::IdentityLookupFailed(format!("no such token: {token}")))
        }
        async fn get_chart_info(&self, id: i32) -> Result<ChartInfo, E> {
            Ok(ChartInfo {
                id,
                name: "Song".to_string(),
            })
        }
        async fn get_record_result(&self, _id: i32) -> Result<RecordResult, E> {
            Ok(RecordResult {
                score: 1_000_000,
                accuracy: 100.0,
                full_combo: true,
            })
        }
    }

    fn test_state(users: HashMap<String, UserInfo>) -> Arc<ServerState> {
        Arc::new(ServerState {
            config: ServerConfig::new("http://localhost"),
            identity: Arc::new(MockIdentity { users }),
            rooms: RoomRegistry::new(MonitorRoster::empty()),
            online: StdMutex::new(HashMap::new()),
        })
    }

    fn auth_packet(token: &str) -> Vec<u8> {
        let mut w = crate::codec::ByteWriter::new();
        w.write_u8(0x01);
        w.write_string(token);
        w.into_bytes()
    }

    #[tokio::test]
    async fn ping_before_auth_is_answered() {
        let state = test_state(HashMap::new());
        let (conn, mut rx) = crate::connection::test_support::handle_with_capacity(8);
        let mut session = Session::new(state, conn);
        session.handle_frame(&[0x00]).await.expect("ping ok");
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn non_auth_packet_before_auth_closes_connection() {
        let state = test_state(HashMap::new());
        let (conn, _rx) = crate::connection::test_support::handle_with_capacity(8);
        let mut session = Session::new(state, conn);
        let err = session.handle_frame(&[0x07]).await.expect_err("leave room before auth rejected");
        assert!(matches!(err, ServerError::UnauthenticatedPacket));
    }

    #[tokio::test]
    async fn authenticate_success_emits_greeter_messages() {
        let mut users = HashMap::new();
        users.insert(
            "tok".to_string(),
            UserInfo {
                id: 1,
                name: "Alice".to_string(),
                language: "en".to_string(),
            },
        );
        let state = test_state(users);
        let (conn, mut rx) = crate::connection::test_support::handle_with_capacity(16);
        let mut session = Session::new(state, conn);
        session.handle_frame(&auth_packet("tok")).await.expect("authenticate ok");

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        // Authenticate reply + 3 greeter lines + 1 version line.
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn duplicate_authenticate_rejects_second_connection_and_keeps_first_open() {
        let mut users = HashMap::new();
        users.insert(
            "t1".to_string(),
            UserInfo {
                id: 5,
                name: "Bob".to_string(),
                language: "en".to_string(),
            },
        );
        let state = test_state(users);
        let (conn1, _rx1) = crate::connection::test_support::handle_with_capacity(16);
        let mut session1 = Session::new(state.clone(), conn1.clone());
        session1.handle_frame(&auth_packet("t1")).await.expect("first auth ok");
        assert!(!conn1.is_closed());

        let (conn2, _rx2) = crate::connection::test_support::handle_with_capacity(16);
        let mut session2 = Session::new(state, conn2.clone());
        let err = session2
            .handle_frame(&auth_packet("t1"))
            .await
            .expect_err("duplicate login is rejected");
        assert!(matches!(err, ServerError::UnauthenticatedPacket));
        assert!(!conn1.is_closed());
        assert!(conn2.is_closed());
    }
}
