//! The wire message kinds (spec §6): one JSON body per logical message,
//! discriminated by a `type` field. Carried as the `body` of
//! [`crate::framed::InboundMessage`] / the argument to
//! [`crate::framed::FramedConnection::send_message`].
//!
//! `resourceSpec` is opaque here — its shape is owned by the reactive
//! computation engine that produces/consumes it, which is out of scope
//! (spec §1); this crate only ever passes it through unparsed.

use crate::error::{Result, SyncError};
use crate::ids::{IndexId, TemplateId};
use crate::xdr::memory::{child_type_to_str, parse_child_type, IndexDefJson, TemplateDefJson};
use crate::xdr::DefEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// One element as carried in a `write` message's `list` or a
/// `resourceUpdate`'s `update` map values: an already-marshalled value
/// (template/index IDs translated, see [`crate::xdr::XdrCodec`]) plus the
/// identifier it belongs to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarshalledElement {
    pub ident: String,
    pub value: Json,
}

/// One entry of a `define` message's `list` (spec §4.3): either a
/// template or an index declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefItem {
    Template(TemplateDefJson),
    Index(IndexDefJson),
}

impl From<DefEntry> for DefItem {
    fn from(entry: DefEntry) -> Self {
        match entry {
            DefEntry::Template { id, parent_id, child_type, child_name, referred_id } => {
                DefItem::Template(TemplateDefJson {
                    template_id: id.0,
                    parent_id: parent_id.0,
                    child_type: child_type_to_str(child_type).to_string(),
                    child_name,
                    referred_id: referred_id.map(|r| r.0),
                })
            }
            DefEntry::Index { id, prefix_id, append, compose } => {
                DefItem::Index(IndexDefJson { index_id: id.0, prefix_id: prefix_id.0, append, compose: compose.map(|c| c.0) })
            }
        }
    }
}

impl TryFrom<DefItem> for DefEntry {
    type Error = SyncError;

    fn try_from(item: DefItem) -> Result<Self> {
        Ok(match item {
            DefItem::Template(t) => DefEntry::Template {
                id: TemplateId(t.template_id),
                parent_id: TemplateId(t.parent_id),
                child_type: parse_child_type(&t.child_type)?,
                child_name: t.child_name,
                referred_id: t.referred_id.map(TemplateId),
            },
            DefItem::Index(i) => DefEntry::Index {
                id: IndexId(i.index_id),
                prefix_id: IndexId(i.prefix_id),
                append: i.append,
                compose: i.compose.map(IndexId),
            },
        })
    }
}

/// The body of every message exchanged over a [`crate::framed::FramedConnection`],
/// discriminated by `type`. Replies additionally carry `inReplyTo` — see
/// [`Envelope`], which wraps this enum with that field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    Subscribe {
        #[serde(rename = "resourceId")]
        resource_id: u64,
        #[serde(rename = "resourceSpec")]
        resource_spec: Json,
        #[serde(skip_serializing_if = "Option::is_none")]
        revision: Option<u64>,
    },
    Unsubscribe {
        #[serde(rename = "resourceId")]
        resource_id: u64,
    },
    ReleaseResource {
        #[serde(rename = "resourceId")]
        resource_id: u64,
    },
    Write {
        #[serde(rename = "resourceId")]
        resource_id: u64,
        list: Vec<MarshalledElement>,
        #[serde(rename = "ackId")]
        ack_id: u64,
    },
    /// Reply to a `write` message (matched via `inReplyTo`). Not named in
    /// spec §6's enumeration, but required by the ack protocol of §4.5;
    /// see DESIGN.md.
    WriteAck {
        #[serde(rename = "ackId")]
        ack_id: u64,
        revision: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<Json>,
    },
    Define {
        #[serde(rename = "resourceId")]
        resource_id: u64,
        list: Vec<DefItem>,
    },
    ResourceUpdate {
        #[serde(rename = "resourceId")]
        resource_id: u64,
        revision: u64,
        update: BTreeMap<String, MarshalledElement>,
    },
    Login {
        username: String,
        password: String,
        #[serde(rename = "loginSeqNr")]
        login_seq_nr: u64,
    },
    Logout {},
    CreateAccount {
        username: String,
        password: String,
        email: String,
        #[serde(rename = "loginSeqNr")]
        login_seq_nr: u64,
    },
    LoginStatus {
        username: String,
        authenticated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(rename = "loginSeqNr")]
        login_seq_nr: u64,
    },
    Terminate {
        reason: String,
    },
    ReloadApplication {
        reason: String,
    },
    Error {
        description: String,
    },
}

/// Wraps a [`Message`] with the `inReplyTo` field replies carry (spec §6:
/// "Replies carry `inReplyTo` equal to the original `sequenceNr`").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: Message,
    #[serde(rename = "inReplyTo", default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self { message, in_reply_to: None }
    }

    pub fn reply_to(message: Message, sequence_nr: u64) -> Self {
        Self { message, in_reply_to: Some(sequence_nr) }
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).expect("Envelope always serializes")
    }

    pub fn from_json(json: &Json) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_round_trips() {
        let env = Envelope::new(Message::Subscribe {
            resource_id: 7,
            resource_spec: serde_json::json!({"kind": "appState"}),
            revision: Some(10),
        });
        let json = env.to_json();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["resourceId"], 7);
        let back = Envelope::from_json(&json).unwrap();
        match back.message {
            Message::Subscribe { resource_id, revision, .. } => {
                assert_eq!(resource_id, 7);
                assert_eq!(revision, Some(10));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn write_ack_carries_in_reply_to() {
        let env = Envelope::reply_to(Message::WriteAck { ack_id: 11, revision: 5, info: None }, 42);
        let json = env.to_json();
        assert_eq!(json["inReplyTo"], 42);
        assert_eq!(json["type"], "writeAck");
    }
}
