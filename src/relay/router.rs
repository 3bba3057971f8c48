//! Message router
//!
//! Classifies inbound frames and applies them to the relay state. Callers
//! hold the relay lock for the whole call, so lookups, renames and the
//! fan-out they trigger observe a single consistent registry.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::broadcast;
use super::identity::IdentityAssigner;
use super::registry::Registry;
use super::ConnectionId;
use crate::server::{ClientMessage, ServerMessage};

/// Why an inbound frame was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The sender is no longer registered
    UnknownSender,
    /// Not JSON, missing fields, unknown `type`, or failed validation
    Malformed,
    /// Chat text from a connection that has not picked a name yet
    Unnamed,
}

/// What routing a frame did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Chat text was fanned out, followed by the roster
    Chat,
    /// The sender's name was committed and the roster republished
    Named { name: String, changed: bool },
    /// The frame was discarded without telling anyone
    Dropped(DropReason),
}

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]+>").expect("markup pattern is valid"))
}

/// Remove tag-like `<...>` sequences from chat text
pub fn strip_markup(text: &str) -> String {
    markup_pattern().replace_all(text, "").into_owned()
}

/// Route one raw frame from connection `from`
pub fn route(
    registry: &mut Registry,
    identity: &mut IdentityAssigner,
    from: ConnectionId,
    raw: &str,
) -> Routed {
    let Some(sender) = registry.find(from) else {
        debug!("Dropping frame from unregistered connection {}", from);
        return Routed::Dropped(DropReason::UnknownSender);
    };

    let message = match ClientMessage::from_json(raw) {
        Ok(message) => message,
        Err(e) => {
            debug!("Dropping malformed frame from {}: {}", from, e);
            return Routed::Dropped(DropReason::Malformed);
        }
    };

    match message {
        ClientMessage::Message { text, date, .. } => {
            let Some(name) = sender.display_name.clone() else {
                debug!("Dropping chat from unnamed connection {}", from);
                return Routed::Dropped(DropReason::Unnamed);
            };

            let chat = ServerMessage::Message {
                id: from,
                name,
                text: strip_markup(&text),
                date,
            };
            broadcast::broadcast_message(registry, &chat);
            broadcast::broadcast_roster(registry);
            Routed::Chat
        }

        ClientMessage::Username { name, .. } => {
            let resolved = identity.resolve_unique_name(&name, registry);

            if resolved.changed {
                debug!(
                    "Name {:?} taken, connection {} gets {:?}",
                    name, from, resolved.name
                );
                broadcast::send_to(
                    sender,
                    &ServerMessage::reject_username(from, resolved.name.clone()),
                );
            }

            registry.set_name(from, resolved.name.clone());
            broadcast::broadcast_roster(registry);

            Routed::Named {
                name: resolved.name,
                changed: resolved.changed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ClientHandle;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            out.push(ServerMessage::from_json(&text).unwrap());
        }
        out
    }

    fn setup() -> (Registry, IdentityAssigner, mpsc::Receiver<Message>) {
        let mut registry = Registry::new();
        let (handle, rx) = ClientHandle::channel(16);
        registry.register(1, handle);
        (registry, IdentityAssigner::starting_at(2), rx)
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<script>hi</script>"), "hi");
        assert_eq!(strip_markup("<b>bold</b> and <i>it</i>"), "bold and it");
        assert_eq!(strip_markup("1 < 2 and 3 > 2"), "1  2");
        assert_eq!(strip_markup("a <> b"), "a <> b");
        assert_eq!(strip_markup("plain"), "plain");
    }

    #[test]
    fn test_unknown_sender_dropped() {
        let (mut registry, mut identity, mut rx) = setup();
        let routed = route(
            &mut registry,
            &mut identity,
            77,
            r#"{"type":"username","name":"x"}"#,
        );
        assert_eq!(routed, Routed::Dropped(DropReason::UnknownSender));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_malformed_dropped() {
        let (mut registry, mut identity, mut rx) = setup();
        for raw in ["{", r#"{"type":"shout","text":"x"}"#, r#"{"type":"username","name":""}"#] {
            let routed = route(&mut registry, &mut identity, 1, raw);
            assert_eq!(routed, Routed::Dropped(DropReason::Malformed));
        }
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_chat_before_naming_dropped() {
        let (mut registry, mut identity, mut rx) = setup();
        let routed = route(
            &mut registry,
            &mut identity,
            1,
            r#"{"type":"message","text":"too early"}"#,
        );
        assert_eq!(routed, Routed::Dropped(DropReason::Unnamed));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_username_then_chat() {
        let (mut registry, mut identity, mut rx) = setup();

        let routed = route(
            &mut registry,
            &mut identity,
            1,
            r#"{"type":"username","name":"bob","id":1}"#,
        );
        assert_eq!(
            routed,
            Routed::Named {
                name: "bob".to_string(),
                changed: false
            }
        );
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::user_list(vec!["bob".to_string()])]
        );

        let routed = route(
            &mut registry,
            &mut identity,
            1,
            r#"{"type":"message","text":"<em>hello</em>","date":5}"#,
        );
        assert_eq!(routed, Routed::Chat);
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::Message {
                    id: 1,
                    name: "bob".to_string(),
                    text: "hello".to_string(),
                    date: Some(json!(5)),
                },
                ServerMessage::user_list(vec!["bob".to_string()]),
            ]
        );
    }

    #[test]
    fn test_renaming_to_own_name_is_deconflicted() {
        let (mut registry, mut identity, mut rx) = setup();
        route(
            &mut registry,
            &mut identity,
            1,
            r#"{"type":"username","name":"bob"}"#,
        );
        drain(&mut rx);

        let routed = route(
            &mut registry,
            &mut identity,
            1,
            r#"{"type":"username","name":"bob"}"#,
        );
        assert_eq!(
            routed,
            Routed::Named {
                name: "bob1".to_string(),
                changed: true
            }
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::reject_username(1, "bob1"),
                ServerMessage::user_list(vec!["bob1".to_string()]),
            ]
        );
    }

    #[test]
    fn test_non_numeric_date_is_echoed() {
        let (mut registry, mut identity, mut rx) = setup();
        route(
            &mut registry,
            &mut identity,
            1,
            r#"{"type":"username","name":"bob"}"#,
        );
        drain(&mut rx);

        let routed = route(
            &mut registry,
            &mut identity,
            1,
            r#"{"type":"message","text":"hi","date":"2024-01-01T00:00:00Z"}"#,
        );
        assert_eq!(routed, Routed::Chat);
        assert_eq!(
            drain(&mut rx).first(),
            Some(&ServerMessage::Message {
                id: 1,
                name: "bob".to_string(),
                text: "hi".to_string(),
                date: Some(json!("2024-01-01T00:00:00Z")),
            })
        );
    }

    #[test]
    fn test_payload_id_is_ignored() {
        let (mut registry, mut identity, _rx) = setup();
        let (other, _other_rx) = ClientHandle::channel(16);
        registry.register(2, other);

        route(
            &mut registry,
            &mut identity,
            1,
            r#"{"type":"username","name":"mallory","id":2}"#,
        );

        assert_eq!(
            registry.find(1).unwrap().display_name.as_deref(),
            Some("mallory")
        );
        assert!(registry.find(2).unwrap().display_name.is_none());
    }
}
