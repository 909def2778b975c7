//! Wire protocol between host and followers.
//!
//! Every message travels in one JSON envelope:
//!
//! ```text
//! { "v": 1, "roomId": "...", "from": "...", "to": "<id>" | "*",
//!   "type": "...", "ts": 1234.5, "payload": { ... } }
//! ```
//!
//! Payloads are a closed set keyed by `type`. Decoding rejects unknown types
//! and other protocol versions; the state machines drop such frames without
//! surfacing an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

const BROADCAST: &str = "*";

/// Addressee of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    Peer(String),
    Broadcast,
}

impl Recipient {
    pub fn peer(id: impl Into<String>) -> Self {
        Recipient::Peer(id.into())
    }

    /// Whether a client with `client_id` should process the envelope.
    pub fn includes(&self, client_id: &str) -> bool {
        match self {
            Recipient::Broadcast => true,
            Recipient::Peer(id) => id == client_id,
        }
    }
}

impl From<String> for Recipient {
    fn from(s: String) -> Self {
        if s == BROADCAST {
            Recipient::Broadcast
        } else {
            Recipient::Peer(s)
        }
    }
}

impl From<Recipient> for String {
    fn from(r: Recipient) -> Self {
        match r {
            Recipient::Broadcast => BROADCAST.to_string(),
            Recipient::Peer(id) => id,
        }
    }
}

/// Host acknowledgment of a join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderHello {
    /// Random per-room token; changes when the host process restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnnounce {
    pub bpm: u32,
    pub version: u64,
    /// Host-clock time of `anchor_beat_index`.
    pub anchor_time: f64,
    pub anchor_beat_index: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockOffset {
    pub offset_ms: f64,
    pub rtt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePing {
    pub seq: u64,
    pub t1: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePong {
    pub seq: u64,
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
}

/// Every message the protocol knows.
///
/// Adjacently tagged: the variant name lands in the envelope's `type` field
/// and its body in `payload`. Bodiless messages still carry `"payload": {}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Join {},
    PeerBye {},
    LeaderHello(LeaderHello),
    StartAnnounce(StartAnnounce),
    StopAnnounce {},
    ParamUpdate(ParamUpdate),
    ClockOffset(ClockOffset),
    TimePing(TimePing),
    TimePong(TimePong),
    RoomClosed {},
}

impl Message {
    /// Value of the envelope's `type` field, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Join {} => "join",
            Message::PeerBye {} => "peer_bye",
            Message::LeaderHello(_) => "leader_hello",
            Message::StartAnnounce(_) => "start_announce",
            Message::StopAnnounce {} => "stop_announce",
            Message::ParamUpdate(_) => "param_update",
            Message::ClockOffset(_) => "clock_offset",
            Message::TimePing(_) => "time_ping",
            Message::TimePong(_) => "time_pong",
            Message::RoomClosed {} => "room_closed",
        }
    }
}

/// Addressed, timestamped message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub v: u32,
    pub room_id: String,
    pub from: String,
    pub to: Recipient,
    /// Sender's clock at send time, milliseconds.
    pub ts: f64,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(
        room_id: impl Into<String>,
        from: impl Into<String>,
        to: Recipient,
        ts: f64,
        message: Message,
    ) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            room_id: room_id.into(),
            from: from.into(),
            to,
            ts,
            message,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Unknown `type` values and malformed payloads surface as
    /// [`Error::Codec`].
    pub fn from_json(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.v != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion(envelope.v));
        }
        Ok(envelope)
    }

    /// Why a client in `room_id` identified as `self_id` should ignore this
    /// envelope, or `None` if it is meant for it.
    pub fn drop_reason(&self, room_id: &str, self_id: &str) -> Option<&'static str> {
        if self.room_id != room_id {
            Some("room mismatch")
        } else if self.from == self_id {
            Some("own message")
        } else if !self.to.includes(self_id) {
            Some("addressed to another peer")
        } else {
            None
        }
    }
}
