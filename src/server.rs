use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use chrono::{Local, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::ws::{Message as WsMessage, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::bulk_clear;
use crate::error::{ChatError, ChatResult};
use crate::messages::{ClientMessage, ServerMessage};
use crate::model::{Message, TempId, UserId};
use crate::probe::TransportProbe;
use crate::session::ChatSession;
use crate::store::MessageStore;

/// Fan-out between connections. Each connection folds these into its own
/// session view.
#[derive(Debug, Clone)]
enum HubEvent {
    Upsert(Message),
    Cleared { peer: UserId },
}

struct Connection {
    user: UserId,
    tx: mpsc::UnboundedSender<HubEvent>,
}

type Connections = Arc<RwLock<HashMap<String, Connection>>>;
type WsSink = SplitSink<WebSocket, WsMessage>;
type Session = ChatSession<dyn MessageStore>;
/// A store write started by `send_message`, finished back on the connection.
type SendOutcome = (TempId, ChatResult<Message>);

/// The channels a connection's commands report back through.
struct Link {
    id: String,
    hub: mpsc::UnboundedSender<HubEvent>,
    sends: mpsc::UnboundedSender<SendOutcome>,
}

#[derive(Clone)]
pub struct Server {
    store: Arc<dyn MessageStore>,
    connections: Connections,
    probe: TransportProbe,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearRequest {
    user_id: Option<String>,
    target_user_id: Option<String>,
}

impl Server {
    pub fn new(store: Arc<dyn MessageStore>, probe: TransportProbe) -> Self {
        Server {
            store,
            connections: Arc::new(RwLock::new(HashMap::new())),
            probe,
        }
    }

    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
        let server = self.clone();
        let with_server = warp::any().map(move || server.clone());

        let ws_route = warp::path("ws")
            .and(warp::ws())
            .and(with_server.clone())
            .map(|ws: warp::ws::Ws, server: Server| {
                ws.on_upgrade(move |socket| async move {
                    server.handle_connection(socket).await;
                })
            });

        let socket_status = warp::path!("api" / "socket-status")
            .and(warp::get())
            .and(with_server.clone())
            .and_then(Self::socket_status);

        let transport_status = warp::path!("api" / "transport-status")
            .and(warp::get())
            .and(with_server.clone())
            .and_then(Self::transport_status);

        let clear = warp::path!("api" / "messages" / "clear")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_server)
            .and_then(Self::clear_chat);

        ws_route
            .or(socket_status)
            .or(transport_status)
            .or(clear)
            .with(warp::cors().allow_any_origin())
    }

    async fn socket_status(server: Server) -> Result<impl Reply, Infallible> {
        let connections = server.connections.read().await.len();
        Ok(warp::reply::json(&json!({
            "status": "ok",
            "connections": connections,
            "timestamp": Utc::now(),
        })))
    }

    async fn transport_status(server: Server) -> Result<impl Reply, Infallible> {
        let report = server.probe.check().await;
        let status = if report.is_connected() {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Ok(warp::reply::with_status(warp::reply::json(&report), status))
    }

    async fn clear_chat(body: ClearRequest, server: Server) -> Result<impl Reply, Infallible> {
        let result = bulk_clear::clear_conversation(
            server.store.as_ref(),
            body.user_id.as_deref(),
            body.target_user_id.as_deref(),
        )
        .await;

        let reply = match result {
            Ok(outcome) => {
                if let (Some(user), Some(peer)) = (
                    body.user_id.as_deref().and_then(UserId::parse),
                    body.target_user_id.as_deref().and_then(UserId::parse),
                ) {
                    server.notify(&[&user], HubEvent::Cleared { peer }, None).await;
                }
                warp::reply::with_status(
                    warp::reply::json(&json!({
                        "message": "Chat cleared successfully",
                        "matchedCount": outcome.matched,
                        "modifiedCount": outcome.modified,
                    })),
                    StatusCode::OK,
                )
            }
            Err(ChatError::MissingParticipant) => warp::reply::with_status(
                warp::reply::json(&json!({ "error": "userId and targetUserId are required" })),
                StatusCode::BAD_REQUEST,
            ),
            Err(e) => {
                error!("Error clearing chat: {}", e);
                warp::reply::with_status(
                    warp::reply::json(&json!({ "error": "Failed to clear chat. Please try again." })),
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        };
        Ok(reply)
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (hub, mut rx) = mpsc::unbounded_channel();
        let (sends, mut sends_rx) = mpsc::unbounded_channel();
        let link = Link {
            id: Uuid::new_v4().to_string(),
            hub,
            sends,
        };
        let mut session: Option<Session> = None;
        debug!("connection {} opened", link.id);

        loop {
            tokio::select! {
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(msg)) => {
                        if msg.is_close() {
                            break;
                        }
                        let Ok(text) = msg.to_str() else { continue };
                        let replies = match serde_json::from_str::<ClientMessage>(text) {
                            Ok(command) => self.handle_client_message(command, &link, &mut session).await,
                            Err(e) => {
                                warn!("unparseable command on {}: {}", link.id, e);
                                vec![ServerMessage::Error {
                                    code: "bad_request",
                                    message: e.to_string(),
                                    retryable: false,
                                }]
                            }
                        };
                        if !Self::send_all(&mut ws_tx, &replies).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                },
                Some((temp_id, result)) = sends_rx.recv() => {
                    let reply = self.complete_send(&mut session, &link, temp_id, result).await;
                    if !Self::send_all(&mut ws_tx, &[reply]).await {
                        break;
                    }
                }
                Some(event) = rx.recv() => {
                    if let Some(reply) = Self::apply_hub_event(&mut session, event) {
                        if !Self::send_all(&mut ws_tx, &[reply]).await {
                            break;
                        }
                    }
                }
            }
        }

        self.handle_disconnect(&link.id).await;
    }

    async fn handle_client_message(
        &self,
        command: ClientMessage,
        link: &Link,
        session: &mut Option<Session>,
    ) -> Vec<ServerMessage> {
        let mut replies = Vec::new();
        if let Err(e) = self.dispatch(command, link, session, &mut replies).await {
            debug!("command on {} rejected: {}", link.id, e);
            replies.push(ServerMessage::from(&e));
        }
        replies
    }

    async fn dispatch(
        &self,
        command: ClientMessage,
        link: &Link,
        session: &mut Option<Session>,
        replies: &mut Vec<ServerMessage>,
    ) -> ChatResult<()> {
        if let ClientMessage::Join { user_id, peer_id } = command {
            let user = UserId::parse(&user_id).ok_or(ChatError::MissingParticipant)?;
            let peer = UserId::parse(&peer_id).ok_or(ChatError::MissingParticipant)?;
            let joined = ChatSession::open(Arc::clone(&self.store), user.clone(), peer).await?;
            replies.push(ServerMessage::Joined {
                timeline: joined.timeline("", &Local::now()),
            });
            *session = Some(joined);

            self.connections.write().await.insert(
                link.id.clone(),
                Connection {
                    user: user.clone(),
                    tx: link.hub.clone(),
                },
            );
            info!("{} joined on {}", user, link.id);
            return Ok(());
        }

        let session = session.as_mut().ok_or(ChatError::MissingParticipant)?;
        let participants = [session.viewer().clone(), session.peer().clone()];
        let everyone: Vec<&UserId> = participants.iter().collect();

        match command {
            ClientMessage::Join { .. } => {}
            ClientMessage::SendMessage { text } => {
                let draft = session.begin_send(&text)?;
                let temp_id = draft.temp_id.clone();
                replies.push(ServerMessage::MessagePending {
                    temp_id: temp_id.clone(),
                });

                let store = Arc::clone(&self.store);
                let sends = link.sends.clone();
                tokio::spawn(async move {
                    let result = store.insert(draft).await;
                    let _ = sends.send((temp_id, result));
                });
            }
            ClientMessage::ToggleReaction { message_id, symbol } => {
                let message = session.toggle_reaction(&message_id, &symbol).await?;
                self.notify(&everyone, HubEvent::Upsert(message.clone()), Some(&link.id))
                    .await;
                replies.push(ServerMessage::MessageUpdated { message });
            }
            ClientMessage::DeleteMessage { message_id, scope } => {
                let message = session.delete_message(&message_id, scope).await?;
                self.notify(&everyone, HubEvent::Upsert(message.clone()), Some(&link.id))
                    .await;
                replies.push(ServerMessage::MessageUpdated { message });
            }
            ClientMessage::ClearChat => {
                let outcome = session.clear_chat().await?;
                let viewer = session.viewer().clone();
                self.notify(
                    &[&viewer],
                    HubEvent::Cleared {
                        peer: session.peer().clone(),
                    },
                    Some(&link.id),
                )
                .await;
                replies.push(ServerMessage::ChatCleared {
                    matched: outcome.matched,
                    modified: outcome.modified,
                });
            }
            ClientMessage::Timeline { query } => {
                replies.push(ServerMessage::Timeline {
                    timeline: session.timeline(&query, &Local::now()),
                });
            }
        }
        Ok(())
    }

    async fn complete_send(
        &self,
        session: &mut Option<Session>,
        link: &Link,
        temp_id: TempId,
        result: ChatResult<Message>,
    ) -> ServerMessage {
        let Some(session) = session.as_mut() else {
            return ServerMessage::from(&ChatError::MissingParticipant);
        };
        match session.finish_send(&temp_id, result) {
            Ok(message) => {
                let participants = [session.viewer().clone(), session.peer().clone()];
                let everyone: Vec<&UserId> = participants.iter().collect();
                self.notify(&everyone, HubEvent::Upsert(message.clone()), Some(&link.id))
                    .await;
                ServerMessage::MessageSent { temp_id, message }
            }
            Err(e) => {
                debug!("send on {} failed: {}", link.id, e);
                ServerMessage::from(&e)
            }
        }
    }

    fn apply_hub_event(
        session: &mut Option<Session>,
        event: HubEvent,
    ) -> Option<ServerMessage> {
        let session = session.as_mut()?;
        match event {
            HubEvent::Upsert(message) => {
                if !message.belongs_to(session.viewer(), session.peer()) {
                    return None;
                }
                session.apply_remote(message.clone());
                Some(ServerMessage::MessageUpdated { message })
            }
            HubEvent::Cleared { peer } => {
                if &peer != session.peer() {
                    return None;
                }
                session.apply_clear();
                Some(ServerMessage::Timeline {
                    timeline: session.timeline("", &Local::now()),
                })
            }
        }
    }

    /// Delivers `event` to every connection of `users`, except the one it
    /// came from.
    async fn notify(&self, users: &[&UserId], event: HubEvent, except: Option<&str>) {
        let connections = self.connections.read().await;
        for (id, connection) in connections.iter() {
            if Some(id.as_str()) == except || !users.contains(&&connection.user) {
                continue;
            }
            let _ = connection.tx.send(event.clone());
        }
    }

    async fn send_all(ws_tx: &mut WsSink, replies: &[ServerMessage]) -> bool {
        for reply in replies {
            let text = match serde_json::to_string(reply) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize reply: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(WsMessage::text(text)).await {
                error!("Failed to send WebSocket message: {}", e);
                return false;
            }
        }
        true
    }

    async fn handle_disconnect(&self, connection_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.remove(connection_id) {
            info!("{} left ({})", connection.user, connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Notify;

    use super::*;
    use crate::model::{Draft, MessageId, ReactionMap};
    use crate::store::{BulkUpdate, ClearFilter, MemoryStore};

    /// Holds every insert until `gate` is opened.
    struct GatedStore {
        inner: MemoryStore,
        gate: Notify,
    }

    #[async_trait]
    impl MessageStore for GatedStore {
        async fn insert(&self, draft: Draft) -> ChatResult<Message> {
            self.gate.notified().await;
            self.inner.insert(draft).await
        }

        async fn conversation(&self, a: &UserId, b: &UserId) -> ChatResult<Vec<Message>> {
            self.inner.conversation(a, b).await
        }

        async fn set_reaction(
            &self,
            id: &MessageId,
            user: &UserId,
            symbol: Option<&str>,
        ) -> ChatResult<Message> {
            self.inner.set_reaction(id, user, symbol).await
        }

        async fn add_deleted_for(&self, id: &MessageId, user: &UserId) -> ChatResult<Message> {
            self.inner.add_deleted_for(id, user).await
        }

        async fn mark_deleted_for_everyone(&self, id: &MessageId) -> ChatResult<Message> {
            self.inner.mark_deleted_for_everyone(id).await
        }

        async fn clear_for(&self, filter: &ClearFilter, user: &UserId) -> ChatResult<BulkUpdate> {
            self.inner.clear_for(filter, user).await
        }
    }

    fn server(store: Arc<dyn MessageStore>) -> Server {
        Server::new(
            store,
            TransportProbe::new("http://127.0.0.1:9", Duration::from_millis(200)),
        )
    }

    fn doc(id: &str, from: &str, to: &str) -> Message {
        Message {
            id: MessageId::parse(id),
            temp_id: None,
            sender_id: UserId::parse(from).unwrap(),
            receiver_id: UserId::parse(to).unwrap(),
            text: "hello".into(),
            timestamp: Utc::now(),
            reactions: ReactionMap::new(),
            deleted_for: Default::default(),
            deleted_for_everyone: false,
        }
    }

    async fn recv_json(client: &mut warp::test::WsClient) -> Value {
        let msg = client.recv().await.unwrap();
        serde_json::from_str(msg.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn clear_route_reports_counts() {
        let store = Arc::new(MemoryStore::with_messages(vec![doc("m1", "a", "b"), doc("m2", "b", "a")]));
        let routes = server(store).routes();

        let response = warp::test::request()
            .method("POST")
            .path("/api/messages/clear")
            .json(&json!({ "userId": "a", "targetUserId": "b" }))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["matchedCount"], 2);
        assert_eq!(body["modifiedCount"], 2);

        let again = warp::test::request()
            .method("POST")
            .path("/api/messages/clear")
            .json(&json!({ "userId": "a", "targetUserId": "b" }))
            .reply(&routes)
            .await;
        let body: Value = serde_json::from_slice(again.body()).unwrap();
        assert_eq!(body["modifiedCount"], 0);
    }

    #[tokio::test]
    async fn clear_route_maps_errors_to_status() {
        let store = Arc::new(MemoryStore::new());
        let routes = server(store.clone()).routes();

        let missing = warp::test::request()
            .method("POST")
            .path("/api/messages/clear")
            .json(&json!({ "userId": "a" }))
            .reply(&routes)
            .await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        store.set_available(false);
        let offline = warp::test::request()
            .method("POST")
            .path("/api/messages/clear")
            .json(&json!({ "userId": "a", "targetUserId": "b" }))
            .reply(&routes)
            .await;
        assert_eq!(offline.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unreachable_transport_is_reported_as_error() {
        let routes = server(Arc::new(MemoryStore::new())).routes();
        let response = warp::test::request()
            .path("/api/transport-status")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn websocket_send_flow() {
        let routes = server(Arc::new(MemoryStore::new())).routes();
        let mut client = warp::test::ws().path("/ws").handshake(routes).await.unwrap();

        client.send_text(json!({ "type": "send_message", "text": "hi" }).to_string()).await;
        let rejected = recv_json(&mut client).await;
        assert_eq!(rejected["code"], "missing_participant");

        client
            .send_text(json!({ "type": "join", "userId": "alice", "peerId": "bob" }).to_string())
            .await;
        let joined = recv_json(&mut client).await;
        assert_eq!(joined["type"], "joined");

        client.send_text(json!({ "type": "send_message", "text": "hi" }).to_string()).await;
        let pending = recv_json(&mut client).await;
        assert_eq!(pending["type"], "message_pending");
        let sent = recv_json(&mut client).await;
        assert_eq!(sent["type"], "message_sent");
        assert_eq!(sent["tempId"], pending["tempId"]);
        assert_eq!(sent["message"]["text"], "hi");

        let id = sent["message"]["id"].as_str().unwrap().to_owned();
        client
            .send_text(
                json!({ "type": "delete_message", "messageId": id, "scope": "for-everyone" })
                    .to_string(),
            )
            .await;
        let deleted = recv_json(&mut client).await;
        assert_eq!(deleted["message"]["deletedForEveryone"], true);

        client
            .send_text(json!({ "type": "toggle_reaction", "messageId": "", "symbol": "👍" }).to_string())
            .await;
        let invalid = recv_json(&mut client).await;
        assert_eq!(invalid["code"], "invalid_target");
    }

    #[tokio::test]
    async fn pending_reply_does_not_wait_for_the_store() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate: Notify::new(),
        });
        let routes = server(store.clone()).routes();
        let mut client = warp::test::ws().path("/ws").handshake(routes).await.unwrap();

        client
            .send_text(json!({ "type": "join", "userId": "alice", "peerId": "bob" }).to_string())
            .await;
        assert_eq!(recv_json(&mut client).await["type"], "joined");

        client.send_text(json!({ "type": "send_message", "text": "hi" }).to_string()).await;
        let pending = tokio::time::timeout(Duration::from_secs(2), recv_json(&mut client))
            .await
            .unwrap();
        assert_eq!(pending["type"], "message_pending");
        assert!(store.inner.snapshot().await.is_empty());

        // The connection keeps serving commands while the insert is held.
        client.send_text(json!({ "type": "timeline", "query": "" }).to_string()).await;
        let timeline = tokio::time::timeout(Duration::from_secs(2), recv_json(&mut client))
            .await
            .unwrap();
        assert_eq!(timeline["type"], "timeline");
        assert!(store.inner.snapshot().await.is_empty());

        store.gate.notify_one();
        let sent = recv_json(&mut client).await;
        assert_eq!(sent["type"], "message_sent");
        assert_eq!(sent["tempId"], pending["tempId"]);
        assert_eq!(store.inner.snapshot().await.len(), 1);
    }
}
