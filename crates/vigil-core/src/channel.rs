//! Connection lifecycles for the three channel flavors.
//!
//! Every channel follows the same shape: authenticate (and for monitor
//! channels, resolve the session) before touching any registry, admit the
//! connection, then run one loop that interleaves inbound frames with the
//! connection's outbound queue until either side closes. Leaving the loop
//! for any reason unregisters the connection before the serve call returns.

use std::future::{ready, Future};
use tracing::{debug, error, info, warn};
use vigil_protocol::{Envelope, FrameKind, ParticipantId, ProtocolError, Role, ServerFrame};
use vigil_transport::{CloseFrame, Connection, ConnectionId};

use crate::auth::Participant;
use crate::error::Error;
use crate::hub::Hub;
use crate::registry::{ConnectionHandle, ConnectionRegistry, Mailbox};
use crate::relay::Side;
use crate::router::encode;
use crate::session::SessionTable;

/// Display name announced for a supervisor the identity provider has no
/// name for.
const DEFAULT_SUPERVISOR_NAME: &str = "Supervisor";
/// Display name announced for an unnamed monitored participant.
const DEFAULT_MONITORED_NAME: &str = "Monitored participant";

impl Hub {
    /// Serve a chat connection until it closes.
    ///
    /// Both roles may chat. Malformed frames and store failures are logged
    /// and the frame is dropped; the connection stays open.
    ///
    /// # Errors
    ///
    /// Returns the rejection if the credential is refused, in which case the
    /// connection has been closed with a policy-violation status, or the
    /// failure that ended the connection.
    pub async fn serve_chat<C>(&self, conn: &mut C, credential: Option<&str>) -> Result<(), Error>
    where
        C: Connection + ?Sized,
    {
        let participant = match self.gate.authenticate(credential).await {
            Ok(participant) => participant,
            Err(e) => return Err(reject(conn, "chat", e).await),
        };

        let (handle, mailbox) = self.open_handle(conn.id(), &participant);
        let _admission = Admission::register(self.chat(), participant.id.clone(), &handle);
        info!(
            connection = %handle.id(),
            participant = %participant.id,
            role = %participant.role,
            "Chat connected"
        );

        let router = &self.router;
        let sender = &participant;
        pump(conn, mailbox, &handle, "chat", move |text| async move {
            router.handle_inbound(sender, &text).await.map(drop)
        })
        .await
    }

    /// Serve a supervisor's monitor connection for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns the rejection if the credential, the role or the session is
    /// refused, in which case the connection has been closed with a
    /// policy-violation status, or the failure that ended the connection.
    pub async fn serve_monitor<C>(
        &self,
        conn: &mut C,
        session_id: &str,
        credential: Option<&str>,
    ) -> Result<(), Error>
    where
        C: Connection + ?Sized,
    {
        let admitted = async {
            let supervisor = self.gate.authenticate_as(credential, Role::Supervisor).await?;
            let session = self.resolver.resolve(session_id).await?;
            Ok::<_, Error>((supervisor, session))
        }
        .await;
        let (supervisor, session) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => return Err(reject(conn, "monitor", e).await),
        };

        let monitored = session.monitored_id.clone();
        let (handle, mailbox) = self.open_handle(conn.id(), &supervisor);
        queue(
            &handle,
            &ServerFrame::Connected {
                session_id: Some(session.session_id.clone()),
                monitored_id: monitored.clone(),
                monitored_name: session.monitored_name.clone(),
            },
        );

        let sessions = self.relay.sessions();
        let _admission = Admission::register(self.relay.observers(), monitored.clone(), &handle)
            .bound_to(sessions, &session.session_id);
        sessions.bind(&session.session_id, &monitored, handle.id());
        info!(
            connection = %handle.id(),
            participant = %supervisor.id,
            session = %session.session_id,
            monitored = %monitored,
            "Monitor connected"
        );

        let peer_name = supervisor
            .display_name
            .clone()
            .unwrap_or_else(|| DEFAULT_SUPERVISOR_NAME.to_string());
        if let Ok(frame) = encode(&ServerFrame::PeerConnected { peer_name }) {
            self.relay.to_monitored(&monitored, &frame);
        }

        let hub = self;
        let link = Link {
            handle: &handle,
            monitored: &monitored,
        };
        let link = &link;
        pump(conn, mailbox, &handle, "monitor", move |text| {
            ready(hub.on_monitor_frame(link, &text))
        })
        .await
    }

    /// Serve a monitored participant's telemetry connection.
    ///
    /// # Errors
    ///
    /// Returns the rejection if the credential or the role is refused, in
    /// which case the connection has been closed with a policy-violation
    /// status, or the failure that ended the connection.
    pub async fn serve_telemetry<C>(&self, conn: &mut C, credential: Option<&str>) -> Result<(), Error>
    where
        C: Connection + ?Sized,
    {
        let participant = match self.gate.authenticate_as(credential, Role::Monitored).await {
            Ok(participant) => participant,
            Err(e) => return Err(reject(conn, "telemetry", e).await),
        };

        let monitored = participant.id.clone();
        let (handle, mailbox) = self.open_handle(conn.id(), &participant);
        queue(
            &handle,
            &ServerFrame::Connected {
                session_id: None,
                monitored_id: monitored.clone(),
                monitored_name: None,
            },
        );

        let _admission = Admission::register(self.relay.monitored(), monitored.clone(), &handle);
        info!(
            connection = %handle.id(),
            participant = %monitored,
            observers = self.relay.observers().connection_count(&monitored),
            "Telemetry connected"
        );

        let peer_name = participant
            .display_name
            .clone()
            .unwrap_or_else(|| DEFAULT_MONITORED_NAME.to_string());
        if let Ok(frame) = encode(&ServerFrame::PeerConnected { peer_name }) {
            self.relay.to_observers(&monitored, &frame);
        }

        let hub = self;
        let link = Link {
            handle: &handle,
            monitored: &monitored,
        };
        let link = &link;
        pump(conn, mailbox, &handle, "telemetry", move |text| {
            ready(hub.on_telemetry_frame(link, &text))
        })
        .await
    }

    fn open_handle(&self, id: &ConnectionId, owner: &Participant) -> (ConnectionHandle, Mailbox) {
        ConnectionHandle::new(id.clone(), owner.id.clone(), self.config.outbound_capacity)
    }

    fn on_monitor_frame(&self, link: &Link<'_>, text: &str) -> Result<(), Error> {
        let envelope = parse_or_report(link.handle, text)?;

        match envelope.kind() {
            FrameKind::Ping => reply(link.handle, &ServerFrame::Pong),
            FrameKind::Signal => {
                let delivered = self.relay.to_monitored(link.monitored, envelope.raw());
                debug!(monitored = %link.monitored, delivered, "Relayed signal to monitored");
                Ok(())
            }
            FrameKind::RequestUpdate => reply(
                link.handle,
                &ServerFrame::StatusUpdate {
                    monitored_id: link.monitored.clone(),
                    status: "monitoring".to_string(),
                    monitored_online: self.relay.is_monitored_online(link.monitored),
                },
            ),
            FrameKind::SessionEnded => {
                self.relay.end_session(link.monitored, Side::Supervisor);
                Ok(())
            }
            other => {
                debug!(connection = %link.handle.id(), kind = other.as_str(), "Ignoring frame");
                Ok(())
            }
        }
    }

    fn on_telemetry_frame(&self, link: &Link<'_>, text: &str) -> Result<(), Error> {
        let envelope = parse_or_report(link.handle, text)?;

        match envelope.kind() {
            FrameKind::ExerciseData => {
                // A stuck sender must not hold the update back from observers.
                queue(
                    link.handle,
                    &ServerFrame::Acknowledged {
                        timestamp: envelope.get("timestamp").cloned(),
                    },
                );
                let update = envelope.retyped("exercise_update")?;
                self.relay.to_observers(link.monitored, &update);
                Ok(())
            }
            FrameKind::Signal => {
                let delivered = self.relay.to_observers(link.monitored, envelope.raw());
                debug!(monitored = %link.monitored, delivered, "Relayed signal to observers");
                Ok(())
            }
            FrameKind::Ping => reply(link.handle, &ServerFrame::Pong),
            FrameKind::RequestUpdate => {
                let status = if self.relay.is_observed(link.monitored) {
                    "monitoring"
                } else {
                    "idle"
                };
                reply(
                    link.handle,
                    &ServerFrame::StatusUpdate {
                        monitored_id: link.monitored.clone(),
                        status: status.to_string(),
                        monitored_online: true,
                    },
                )
            }
            FrameKind::SessionEnded => {
                self.relay.end_session(link.monitored, Side::Monitored);
                Ok(())
            }
            FrameKind::Other(kind) => {
                debug!(connection = %link.handle.id(), kind = %kind, "Ignoring frame");
                Ok(())
            }
        }
    }
}

/// A monitor or telemetry connection and the pairing it belongs to.
struct Link<'a> {
    handle: &'a ConnectionHandle,
    monitored: &'a ParticipantId,
}

/// Registry membership for the lifetime of one serve call.
struct Admission<'a> {
    registry: &'a ConnectionRegistry,
    key: ParticipantId,
    connection: ConnectionId,
    session: Option<(&'a SessionTable, String)>,
}

impl<'a> Admission<'a> {
    fn register(registry: &'a ConnectionRegistry, key: ParticipantId, handle: &ConnectionHandle) -> Self {
        registry.register(key.clone(), handle.clone());
        Self {
            registry,
            key,
            connection: handle.id().clone(),
            session: None,
        }
    }

    fn bound_to(mut self, sessions: &'a SessionTable, session_id: &str) -> Self {
        self.session = Some((sessions, session_id.to_string()));
        self
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.registry.unregister(&self.key, &self.connection);
        if let Some((sessions, session_id)) = &self.session {
            sessions.release(session_id, &self.connection);
        }
    }
}

/// Close a connection that failed admission.
async fn reject<C>(conn: &mut C, channel: &'static str, err: Error) -> Error
where
    C: Connection + ?Sized,
{
    warn!(
        connection = %conn.id(),
        remote = ?conn.remote_addr(),
        channel,
        kind = err.kind(),
        reason = %err,
        "Connection rejected"
    );
    if let Some(frame) = err.close_frame() {
        if let Err(e) = conn.close(frame).await {
            debug!(connection = %conn.id(), error = %e, "Close after rejection failed");
        }
    }
    err
}

/// Run a connection until it closes.
///
/// Outbound frames are flushed before inbound ones are read, so replies
/// leave in the order their requests arrived. A close request flushes what
/// is already queued, then closes the transport.
async fn pump<C, F, Fut>(
    conn: &mut C,
    mut mailbox: Mailbox,
    handle: &ConnectionHandle,
    channel: &'static str,
    mut on_frame: F,
) -> Result<(), Error>
where
    C: Connection + ?Sized,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    loop {
        tokio::select! {
            biased;

            Some(text) = mailbox.outbox.recv() => {
                if let Err(e) = conn.send(text).await {
                    warn!(connection = %handle.id(), channel, error = %e, "Send failed, closing");
                    if let Err(close_err) = conn.close(CloseFrame::new(CloseFrame::GOING_AWAY, "send failed")).await {
                        debug!(connection = %handle.id(), error = %close_err, "Close failed");
                    }
                    return Err(e.into());
                }
            }

            Ok(()) = mailbox.close.changed() => {
                let requested = mailbox.close.borrow_and_update().clone();
                if let Some(frame) = requested {
                    while let Ok(text) = mailbox.outbox.try_recv() {
                        if conn.send(text).await.is_err() {
                            break;
                        }
                    }
                    info!(
                        connection = %handle.id(),
                        channel,
                        code = frame.code,
                        reason = %frame.reason,
                        "Closing connection"
                    );
                    conn.close(frame).await?;
                    return Ok(());
                }
            }

            inbound = conn.recv() => match inbound {
                Ok(Some(text)) => {
                    handle.touch();
                    if let Err(e) = on_frame(text).await {
                        if e.is_recoverable() {
                            warn!(connection = %handle.id(), channel, kind = e.kind(), error = %e, "Frame dropped");
                        } else {
                            error!(connection = %handle.id(), channel, error = %e, "Frame handling failed, closing");
                            let frame = CloseFrame::new(CloseFrame::INTERNAL_ERROR, "internal error");
                            if let Err(close_err) = conn.close(frame).await {
                                debug!(connection = %handle.id(), error = %close_err, "Close failed");
                            }
                            return Err(e);
                        }
                    }
                }
                Ok(None) => {
                    info!(connection = %handle.id(), channel, "Disconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(connection = %handle.id(), channel, error = %e, "Receive failed");
                    return Err(e.into());
                }
            },
        }
    }
}

/// Parse a monitor or telemetry frame, answering the sender with an
/// `error` frame when it cannot be parsed.
fn parse_or_report(handle: &ConnectionHandle, text: &str) -> Result<Envelope, Error> {
    Envelope::parse(text).map_err(|e| {
        let message = match &e {
            ProtocolError::Json(_) => "Invalid JSON format".to_string(),
            other => other.to_string(),
        };
        queue(handle, &ServerFrame::error(message));
        Error::MalformedMessage(e)
    })
}

/// Queue a frame for the connection itself.
fn reply(handle: &ConnectionHandle, frame: &ServerFrame) -> Result<(), Error> {
    let text = encode(frame)?;
    handle.send(text).map_err(|source| Error::DeliveryFailure {
        connection: handle.id().clone(),
        source,
    })
}

/// Queue a frame for the connection itself, logging failures.
fn queue(handle: &ConnectionHandle, frame: &ServerFrame) {
    if let Err(e) = reply(handle, frame) {
        warn!(connection = %handle.id(), frame = frame.kind(), error = %e, "Failed to queue frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticVerifier;
    use crate::relay::{ENDED_BY_MONITORED, ENDED_BY_SUPERVISOR};
    use crate::resolver::StaticSessions;
    use crate::session::SessionState;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::task::JoinHandle;
    use vigil_protocol::codec;
    use vigil_transport::memory::pair;
    use vigil_transport::{MemoryPeer, PeerEvent};

    fn hub() -> Arc<Hub> {
        let verifier = StaticVerifier::new()
            .with_credential(
                "doc",
                Participant::new("d-1", Role::Supervisor).with_display_name("Dr. Ada"),
            )
            .with_credential("doc-2", Participant::new("d-2", Role::Supervisor))
            .with_credential(
                "pat",
                Participant::new("p-1", Role::Monitored).with_display_name("Pat"),
            );
        let sessions = StaticSessions::new().with_session("s-1", "p-1", Some("Pat".into()));

        Arc::new(
            Hub::builder()
                .verifier(Arc::new(verifier))
                .sessions(Arc::new(sessions))
                .build(),
        )
    }

    type Served = JoinHandle<Result<(), Error>>;

    fn monitor(hub: &Arc<Hub>, token: &str) -> (MemoryPeer, Served) {
        let (mut conn, peer) = pair();
        let hub = Arc::clone(hub);
        let token = token.to_string();
        let task = tokio::spawn(async move { hub.serve_monitor(&mut conn, "s-1", Some(token.as_str())).await });
        (peer, task)
    }

    fn telemetry(hub: &Arc<Hub>, token: &str) -> (MemoryPeer, Served) {
        let (mut conn, peer) = pair();
        let hub = Arc::clone(hub);
        let token = token.to_string();
        let task = tokio::spawn(async move { hub.serve_telemetry(&mut conn, Some(token.as_str())).await });
        (peer, task)
    }

    fn chat(hub: &Arc<Hub>, token: &str) -> (MemoryPeer, Served) {
        let (mut conn, peer) = pair();
        let hub = Arc::clone(hub);
        let token = token.to_string();
        let task = tokio::spawn(async move { hub.serve_chat(&mut conn, Some(token.as_str())).await });
        (peer, task)
    }

    async fn next_text(peer: &mut MemoryPeer) -> String {
        match peer.next_event().await {
            Some(PeerEvent::Text(text)) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn next_frame(peer: &mut MemoryPeer) -> ServerFrame {
        codec::decode(&next_text(peer).await).unwrap()
    }

    async fn next_close(peer: &mut MemoryPeer) -> CloseFrame {
        match peer.next_event().await {
            Some(PeerEvent::Closed(frame)) => frame,
            other => panic!("expected a close, got {other:?}"),
        }
    }

    async fn connected_monitor(hub: &Arc<Hub>, token: &str) -> (MemoryPeer, Served) {
        let (mut peer, task) = monitor(hub, token);
        assert!(matches!(next_frame(&mut peer).await, ServerFrame::Connected { .. }));
        (peer, task)
    }

    async fn connected_telemetry(hub: &Arc<Hub>) -> (MemoryPeer, Served) {
        let (mut peer, task) = telemetry(hub, "pat");
        assert!(matches!(next_frame(&mut peer).await, ServerFrame::Connected { .. }));
        (peer, task)
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected_before_admission() {
        let hub = hub();
        let (mut conn, mut peer) = pair();

        let err = hub
            .serve_monitor(&mut conn, "s-404", Some("doc"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SessionNotFound(_)));
        assert_eq!(
            next_close(&mut peer).await,
            CloseFrame::policy_violation("Session not found")
        );
        assert_eq!(hub.stats(), Default::default());
    }

    #[tokio::test]
    async fn test_role_and_credential_rejections() {
        let hub = hub();

        let (mut conn, mut peer) = pair();
        let err = hub.serve_monitor(&mut conn, "s-1", Some("pat")).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert_eq!(
            next_close(&mut peer).await,
            CloseFrame::policy_violation("Unauthorized: supervisor access only")
        );

        let (mut conn, mut peer) = pair();
        hub.serve_telemetry(&mut conn, Some("doc")).await.unwrap_err();
        assert_eq!(
            next_close(&mut peer).await,
            CloseFrame::policy_violation("Unauthorized: monitored participant access only")
        );

        let (mut conn, mut peer) = pair();
        hub.serve_chat(&mut conn, None).await.unwrap_err();
        assert_eq!(
            next_close(&mut peer).await,
            CloseFrame::policy_violation("Authentication required")
        );

        assert_eq!(hub.stats(), Default::default());
    }

    #[tokio::test]
    async fn test_monitor_connected_frame() {
        let hub = hub();
        let (mut peer, _task) = monitor(&hub, "doc");

        assert_eq!(
            next_frame(&mut peer).await,
            ServerFrame::Connected {
                session_id: Some("s-1".into()),
                monitored_id: "p-1".into(),
                monitored_name: Some("Pat".into()),
            }
        );
        assert_eq!(hub.relay().sessions().state("s-1"), SessionState::Monitoring);
    }

    #[tokio::test]
    async fn test_signal_is_relayed_verbatim() {
        let hub = hub();
        let (mut doctor, _d) = connected_monitor(&hub, "doc").await;
        let (mut patient, _p) = connected_telemetry(&hub).await;
        assert_eq!(
            next_frame(&mut doctor).await,
            ServerFrame::PeerConnected {
                peer_name: "Pat".into()
            }
        );

        let offer = r#"{"type":"signal","sdp":"offer-1"}"#;
        doctor.send(offer).unwrap();
        assert_eq!(next_text(&mut patient).await, offer);

        let answer = r#"{"type": "signal", "sdp": "answer-1", "extra": [1, 2]}"#;
        patient.send(answer).unwrap();
        assert_eq!(next_text(&mut doctor).await, answer);
    }

    #[tokio::test]
    async fn test_supervisor_joining_is_announced_to_monitored() {
        let hub = hub();
        let (mut patient, _p) = connected_telemetry(&hub).await;
        let (_doctor, _d) = connected_monitor(&hub, "doc").await;
        let (_second, _d2) = connected_monitor(&hub, "doc-2").await;

        assert_eq!(
            next_frame(&mut patient).await,
            ServerFrame::PeerConnected {
                peer_name: "Dr. Ada".into()
            }
        );
        assert_eq!(
            next_frame(&mut patient).await,
            ServerFrame::PeerConnected {
                peer_name: DEFAULT_SUPERVISOR_NAME.into()
            }
        );
    }

    #[tokio::test]
    async fn test_ping_request_update_and_malformed_frames() {
        let hub = hub();
        let (mut doctor, _d) = connected_monitor(&hub, "doc").await;

        doctor.send("{oops").unwrap();
        assert_eq!(next_frame(&mut doctor).await, ServerFrame::error("Invalid JSON format"));

        doctor.send(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(next_frame(&mut doctor).await, ServerFrame::Pong);

        doctor.send(r#"{"type":"request_update"}"#).unwrap();
        assert_eq!(
            next_frame(&mut doctor).await,
            ServerFrame::StatusUpdate {
                monitored_id: "p-1".into(),
                status: "monitoring".into(),
                monitored_online: false,
            }
        );

        // Unknown kinds are ignored; the connection keeps serving.
        doctor.send(r#"{"type":"dance"}"#).unwrap();
        doctor.send(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(next_frame(&mut doctor).await, ServerFrame::Pong);
    }

    #[tokio::test]
    async fn test_exercise_data_is_acknowledged_and_relayed() {
        let hub = hub();
        let (mut doctor, _d) = connected_monitor(&hub, "doc").await;
        let (mut patient, _p) = connected_telemetry(&hub).await;
        next_frame(&mut doctor).await;

        patient
            .send(r#"{"type":"exercise_data","timestamp":"2024-05-01T10:00:00Z","reps":5}"#)
            .unwrap();

        assert_eq!(
            next_frame(&mut patient).await,
            ServerFrame::Acknowledged {
                timestamp: Some(json!("2024-05-01T10:00:00Z"))
            }
        );
        let update: Value = serde_json::from_str(&next_text(&mut doctor).await).unwrap();
        assert_eq!(
            update,
            json!({"type": "exercise_update", "timestamp": "2024-05-01T10:00:00Z", "reps": 5})
        );
    }

    #[tokio::test]
    async fn test_supervisor_ends_session() {
        let hub = hub();
        let (mut doctor, d_task) = connected_monitor(&hub, "doc").await;
        let (mut patient, p_task) = connected_telemetry(&hub).await;
        next_frame(&mut doctor).await;

        doctor.send(r#"{"type":"session_ended"}"#).unwrap();

        assert_eq!(
            next_frame(&mut patient).await,
            ServerFrame::session_ended(ENDED_BY_SUPERVISOR)
        );
        assert_eq!(next_close(&mut patient).await, CloseFrame::normal("session ended"));
        assert_eq!(next_close(&mut doctor).await, CloseFrame::normal("session ended"));

        d_task.await.unwrap().unwrap();
        p_task.await.unwrap().unwrap();
        assert_eq!(hub.relay().sessions().state("s-1"), SessionState::Idle);
        assert_eq!(hub.stats(), Default::default());
    }

    #[tokio::test]
    async fn test_monitored_ends_session_for_every_supervisor() {
        let hub = hub();
        let (mut first, _d1) = connected_monitor(&hub, "doc").await;
        let (mut second, _d2) = connected_monitor(&hub, "doc-2").await;
        let (mut patient, _p) = connected_telemetry(&hub).await;
        next_frame(&mut first).await;
        next_frame(&mut second).await;

        patient.send(r#"{"type":"session_ended"}"#).unwrap();

        for doctor in [&mut first, &mut second] {
            assert_eq!(
                next_frame(doctor).await,
                ServerFrame::session_ended(ENDED_BY_MONITORED)
            );
            assert_eq!(next_close(doctor).await, CloseFrame::normal("session ended"));
        }
        assert_eq!(next_close(&mut patient).await, CloseFrame::normal("session ended"));
    }

    #[tokio::test]
    async fn test_sibling_survives_disconnect_and_last_leaving_ends_session() {
        let hub = hub();
        let (mut first, first_task) = connected_monitor(&hub, "doc").await;
        let (mut second, second_task) = connected_monitor(&hub, "doc-2").await;
        let (mut patient, _p) = connected_telemetry(&hub).await;
        next_frame(&mut first).await;
        next_frame(&mut second).await;

        first.hang_up();
        first_task.await.unwrap().unwrap();
        assert_eq!(hub.relay().observers().connection_count(&"p-1".into()), 1);
        assert_eq!(hub.relay().sessions().state("s-1"), SessionState::Monitoring);

        patient.send(r#"{"type":"signal","candidate":"c-1"}"#).unwrap();
        assert_eq!(
            next_text(&mut second).await,
            r#"{"type":"signal","candidate":"c-1"}"#
        );

        second.hang_up();
        second_task.await.unwrap().unwrap();
        assert!(!hub.relay().is_observed(&"p-1".into()));
        assert!(hub.relay().sessions().is_empty());
    }

    #[tokio::test]
    async fn test_chat_between_channels() {
        let hub = hub();
        let (mut doctor, _d) = chat(&hub, "doc");
        let (mut patient, p_task) = chat(&hub, "pat");

        // Wait for both admissions.
        while hub.chat().stats().participants < 2 {
            tokio::task::yield_now().await;
        }

        doctor
            .send(r#"{"recipient_id":"p-1","content":"How is the knee?","type":"text"}"#)
            .unwrap();

        let ServerFrame::NewMessage { message } = next_frame(&mut patient).await else {
            panic!("expected new_message");
        };
        assert_eq!(message.content, "How is the knee?");
        assert_eq!(message.sender_id.as_str(), "d-1");
        assert_eq!(
            next_frame(&mut doctor).await,
            ServerFrame::MessageSent { message }
        );

        // Malformed chat frames are dropped without a reply.
        doctor.send("not json").unwrap();
        patient.hang_up();
        p_task.await.unwrap().unwrap();
        assert!(!hub.chat().is_connected(&"p-1".into()));
        assert!(doctor.try_next_event().is_none());

        let history = hub
            .router()
            .get_history(&"p-1".into(), &"d-1".into())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_full_sender_queue_does_not_hold_back_exercise_update() {
        let hub = hub();
        let (patient, _patient_mailbox) =
            ConnectionHandle::new(ConnectionId::new("t-1"), "p-1".into(), 1);
        patient.send("backlog").unwrap();
        let (doctor, mut doctor_mailbox) =
            ConnectionHandle::new(ConnectionId::new("m-1"), "d-1".into(), 8);
        hub.relay().observers().register("p-1".into(), doctor);

        let monitored: ParticipantId = "p-1".into();
        let link = Link {
            handle: &patient,
            monitored: &monitored,
        };
        hub.on_telemetry_frame(&link, r#"{"type":"exercise_data","reps":5}"#)
            .unwrap();

        let update: Value = serde_json::from_str(&doctor_mailbox.outbox.try_recv().unwrap()).unwrap();
        assert_eq!(update, json!({"type": "exercise_update", "reps": 5}));
    }

    /// A connection whose outbound side is broken.
    struct BrokenConnection {
        id: ConnectionId,
    }

    #[async_trait::async_trait]
    impl Connection for BrokenConnection {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        async fn recv(&mut self) -> Result<Option<String>, vigil_transport::TransportError> {
            std::future::pending().await
        }

        async fn send(&mut self, _text: String) -> Result<(), vigil_transport::TransportError> {
            Err(vigil_transport::TransportError::SendFailed("broken pipe".into()))
        }

        async fn close(&mut self, _frame: CloseFrame) -> Result<(), vigil_transport::TransportError> {
            Err(vigil_transport::TransportError::ConnectionClosed)
        }
    }

    #[tokio::test]
    async fn test_send_failure_unregisters_only_that_connection() {
        let hub = hub();
        let (mut patient, _p) = connected_telemetry(&hub).await;

        let mut broken = BrokenConnection {
            id: ConnectionId::new("broken"),
        };
        let err = hub.serve_telemetry(&mut broken, Some("pat")).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(hub.relay().monitored().connection_count(&"p-1".into()), 1);

        let (mut doctor, _d) = connected_monitor(&hub, "doc").await;
        assert_eq!(
            next_frame(&mut patient).await,
            ServerFrame::PeerConnected {
                peer_name: "Dr. Ada".into()
            }
        );
        doctor.send(r#"{"type":"signal","sdp":"offer"}"#).unwrap();
        assert_eq!(
            next_text(&mut patient).await,
            r#"{"type":"signal","sdp":"offer"}"#
        );
    }
}
