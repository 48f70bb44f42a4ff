//! Client for the hosted backend's realtime socket (Phoenix channel protocol).
//!
//! One websocket joins `realtime:public:{table}` with a `postgres_changes`
//! filter on every event of the comments table. Row changes are pushed by
//! the server as frames; the only periodic traffic is the channel heartbeat.

use std::time::Duration;

use domains::{ChangeEvent, ChangeHandler, ChangeKind, CommentId, StoreError};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_REF: &str = "1";
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// Websocket endpoint derived from the project's REST base URL.
pub(crate) fn socket_url(base_url: &str, api_key: &str) -> String {
    let ws_base = if let Some(host) = base_url.strip_prefix("https://") {
        format!("wss://{host}")
    } else if let Some(host) = base_url.strip_prefix("http://") {
        format!("ws://{host}")
    } else {
        base_url.to_string()
    };
    format!("{ws_base}/realtime/v1/websocket?apikey={api_key}&vsn=1.0.0")
}

#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<RowKey>,
    #[serde(default)]
    old_record: Option<RowKey>,
}

#[derive(Debug, Deserialize)]
struct RowKey {
    #[serde(default)]
    id: Option<CommentId>,
}

/// What an inbound text frame means for the subscription.
#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    Change(ChangeEvent),
    Joined,
    JoinRefused(String),
    Closed(String),
    Ignored,
}

pub(crate) fn parse_frame(text: &str, topic: &str) -> Inbound {
    let frame = match serde_json::from_str::<Frame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "unreadable realtime frame");
            return Inbound::Change(ChangeEvent::resync());
        }
    };
    if frame.topic != topic {
        return Inbound::Ignored;
    }

    match frame.event.as_str() {
        "postgres_changes" => Inbound::Change(change_event(frame.payload)),
        "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
            if frame.payload.get("status").and_then(Value::as_str) == Some("ok") {
                Inbound::Joined
            } else {
                Inbound::JoinRefused(reason(&frame.payload))
            }
        }
        "phx_error" | "phx_close" => Inbound::Closed(frame.event.clone()),
        "system" if frame.payload.get("status").and_then(Value::as_str) == Some("error") => {
            Inbound::Closed(reason(&frame.payload))
        }
        _ => Inbound::Ignored,
    }
}

fn reason(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

fn change_event(payload: Value) -> ChangeEvent {
    let data = match serde_json::from_value::<ChangePayload>(payload) {
        Ok(ChangePayload { data }) => data,
        Err(e) => {
            warn!(error = %e, "unreadable postgres_changes payload");
            return ChangeEvent::resync();
        }
    };
    let kind = match data.kind.as_str() {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        other => {
            warn!(kind = other, "unknown realtime change type");
            return ChangeEvent::resync();
        }
    };
    let comment_id = data
        .record
        .and_then(|row| row.id)
        .or_else(|| data.old_record.and_then(|row| row.id));
    ChangeEvent { kind, comment_id }
}

fn unavailable(err: tungstenite::Error) -> StoreError {
    StoreError::Unavailable(format!("realtime socket: {err}"))
}

pub(crate) struct RealtimeChannel {
    url: String,
    topic: String,
    join: String,
    heartbeat: Duration,
    reconnect_delay: Duration,
}

impl RealtimeChannel {
    pub(crate) fn new(
        base_url: &str,
        api_key: &str,
        table: &str,
        heartbeat: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        let topic = format!("realtime:public:{table}");
        let join = json!({
            "topic": topic,
            "event": "phx_join",
            "payload": {
                "config": {
                    "postgres_changes": [{ "event": "*", "schema": "public", "table": table }],
                },
                "access_token": api_key,
            },
            "ref": JOIN_REF,
        })
        .to_string();
        Self {
            url: socket_url(base_url, api_key),
            topic,
            join,
            heartbeat,
            reconnect_delay,
        }
    }

    /// Opens the socket and waits for the server to accept the channel join.
    pub(crate) async fn join(&self) -> Result<Socket, StoreError> {
        let (mut socket, _) = connect_async(self.url.as_str()).await.map_err(unavailable)?;
        socket
            .send(Message::Text(self.join.clone().into()))
            .await
            .map_err(unavailable)?;

        while let Some(message) = socket.next().await {
            if let Message::Text(text) = message.map_err(unavailable)? {
                match parse_frame(text.as_str(), &self.topic) {
                    Inbound::Joined => {
                        debug!(topic = %self.topic, "realtime channel joined");
                        return Ok(socket);
                    }
                    Inbound::JoinRefused(reason) => return Err(StoreError::Rejected(reason)),
                    Inbound::Closed(reason) => return Err(StoreError::Unavailable(reason)),
                    Inbound::Change(_) | Inbound::Ignored => {}
                }
            }
        }
        Err(StoreError::Unavailable("realtime socket closed during join".to_string()))
    }

    /// Forwards pushed changes until the connection ends.
    async fn pump(&self, socket: &mut Socket, on_change: &ChangeHandler) -> Result<(), StoreError> {
        let mut heartbeat = tokio::time::interval(self.heartbeat.max(MIN_HEARTBEAT));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        heartbeat.tick().await;
        let mut next_ref: u64 = 2;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let frame = json!({
                        "topic": "phoenix",
                        "event": "heartbeat",
                        "payload": {},
                        "ref": next_ref.to_string(),
                    });
                    next_ref += 1;
                    socket
                        .send(Message::Text(frame.to_string().into()))
                        .await
                        .map_err(unavailable)?;
                }
                message = socket.next() => match message {
                    None | Some(Ok(Message::Close(_))) => return Ok(()),
                    Some(Err(e)) => return Err(unavailable(e)),
                    Some(Ok(Message::Text(text))) => match parse_frame(text.as_str(), &self.topic) {
                        Inbound::Change(event) => on_change(event),
                        Inbound::Closed(reason) => return Err(StoreError::Unavailable(reason)),
                        Inbound::Joined | Inbound::JoinRefused(_) | Inbound::Ignored => {}
                    },
                    // tungstenite answers pings on its own
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Runs forever: forwards changes, rejoins after a drop and then asks
    /// observers to resync, since frames pushed in between are lost.
    pub(crate) async fn run(self, mut socket: Socket, on_change: ChangeHandler) {
        loop {
            match self.pump(&mut socket, &on_change).await {
                Ok(()) => warn!(topic = %self.topic, "realtime socket closed by server"),
                Err(e) => warn!(error = %e, topic = %self.topic, "realtime socket failed"),
            }
            socket = loop {
                tokio::time::sleep(self.reconnect_delay).await;
                match self.join().await {
                    Ok(socket) => break socket,
                    Err(e) => warn!(error = %e, "realtime rejoin failed"),
                }
            };
            on_change(ChangeEvent::resync());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "realtime:public:portfolio_comments";

    fn change(kind: &str, record: Value, old_record: Value) -> String {
        json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": kind,
                    "schema": "public",
                    "table": "portfolio_comments",
                    "record": record,
                    "old_record": old_record,
                },
                "ids": [41],
            },
            "ref": null,
        })
        .to_string()
    }

    #[test]
    fn urls_follow_the_rest_scheme() {
        assert_eq!(
            socket_url("https://abc.supabase.co", "k"),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
        assert_eq!(
            socket_url("http://127.0.0.1:5000", "k"),
            "ws://127.0.0.1:5000/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn row_changes_map_to_events() {
        let insert = change("INSERT", json!({ "id": 7, "user_name": "Sam" }), json!({}));
        assert_eq!(parse_frame(&insert, TOPIC), Inbound::Change(ChangeEvent::inserted(7)));

        let update = change("UPDATE", json!({ "id": 1 }), json!({ "id": 1 }));
        assert_eq!(parse_frame(&update, TOPIC), Inbound::Change(ChangeEvent::updated(1)));

        // deletes only carry the old row's key
        let delete = change("DELETE", json!({}), json!({ "id": 3 }));
        assert_eq!(parse_frame(&delete, TOPIC), Inbound::Change(ChangeEvent::deleted(3)));
    }

    #[test]
    fn unknown_or_broken_frames_request_resync() {
        let truncate = change("TRUNCATE", json!({}), json!({}));
        assert_eq!(parse_frame(&truncate, TOPIC), Inbound::Change(ChangeEvent::resync()));
        assert_eq!(parse_frame("not json", TOPIC), Inbound::Change(ChangeEvent::resync()));
    }

    #[test]
    fn join_replies_are_recognised() {
        let ok = json!({
            "topic": TOPIC, "event": "phx_reply", "ref": "1",
            "payload": { "status": "ok", "response": { "postgres_changes": [] } },
        });
        assert_eq!(parse_frame(&ok.to_string(), TOPIC), Inbound::Joined);

        let refused = json!({
            "topic": TOPIC, "event": "phx_reply", "ref": "1",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } },
        });
        assert_eq!(
            parse_frame(&refused.to_string(), TOPIC),
            Inbound::JoinRefused("unauthorized".to_string())
        );
    }

    #[test]
    fn heartbeat_replies_and_other_topics_are_ignored() {
        let heartbeat = json!({
            "topic": "phoenix", "event": "phx_reply", "ref": "2",
            "payload": { "status": "ok", "response": {} },
        });
        assert_eq!(parse_frame(&heartbeat.to_string(), TOPIC), Inbound::Ignored);

        let other = change("INSERT", json!({ "id": 9 }), json!({})).replace(TOPIC, "realtime:public:other");
        assert_eq!(parse_frame(&other, TOPIC), Inbound::Ignored);
    }

    #[test]
    fn channel_errors_close_the_connection() {
        let error = json!({ "topic": TOPIC, "event": "phx_error", "payload": {}, "ref": null });
        assert_eq!(
            parse_frame(&error.to_string(), TOPIC),
            Inbound::Closed("phx_error".to_string())
        );
    }
}
