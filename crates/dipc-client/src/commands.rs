//! Command names and payload builders for the peer's RPC command set.
//!
//! These only shape the `{cmd, args, evt}` envelope; what goes inside an
//! activity is up to the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command: update (or clear) the rich presence activity.
pub const CMD_SET_ACTIVITY: &str = "SET_ACTIVITY";
/// Command: start receiving an event.
pub const CMD_SUBSCRIBE: &str = "SUBSCRIBE";
/// Command: stop receiving an event.
pub const CMD_UNSUBSCRIBE: &str = "UNSUBSCRIBE";
/// `cmd` value carried by every event the peer pushes.
pub const CMD_DISPATCH: &str = "DISPATCH";

/// Event: handshake accepted.
pub const EVT_READY: &str = "READY";
/// Event: a command or the handshake failed.
pub const EVT_ERROR: &str = "ERROR";
/// Event: a user joined through an invite.
pub const EVT_ACTIVITY_JOIN: &str = "ACTIVITY_JOIN";
/// Event: a user started spectating.
pub const EVT_ACTIVITY_SPECTATE: &str = "ACTIVITY_SPECTATE";
/// Event: a user asked to join.
pub const EVT_ACTIVITY_JOIN_REQUEST: &str = "ACTIVITY_JOIN_REQUEST";

/// Outbound command envelope. The correlator adds `nonce` on submit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub cmd: String,
    #[serde(default)]
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
}

impl Command {
    /// A command with the given args object.
    pub fn new(cmd: impl Into<String>, args: Value) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            evt: None,
        }
    }

    /// `SET_ACTIVITY` for process `pid`; `None` clears the presence.
    pub fn set_activity(pid: u32, activity: Option<Value>) -> Self {
        let mut args = Map::new();
        args.insert("pid".to_string(), Value::from(pid));
        args.insert("activity".to_string(), activity.unwrap_or(Value::Null));
        Self::new(CMD_SET_ACTIVITY, Value::Object(args))
    }

    /// `SUBSCRIBE` to `evt`.
    pub fn subscribe(evt: impl Into<String>, args: Value) -> Self {
        Self {
            evt: Some(evt.into()),
            ..Self::new(CMD_SUBSCRIBE, args)
        }
    }

    /// `UNSUBSCRIBE` from `evt`.
    pub fn unsubscribe(evt: impl Into<String>, args: Value) -> Self {
        Self {
            evt: Some(evt.into()),
            ..Self::new(CMD_UNSUBSCRIBE, args)
        }
    }

    /// The JSON payload to submit.
    pub fn into_payload(self) -> Value {
        let mut object = Map::new();
        object.insert("cmd".to_string(), Value::String(self.cmd));
        object.insert(
            "args".to_string(),
            if self.args.is_null() {
                Value::Object(Map::new())
            } else {
                self.args
            },
        );
        if let Some(evt) = self.evt {
            object.insert("evt".to_string(), Value::String(evt));
        }
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn set_activity_wraps_opaque_activity() {
        let payload =
            Command::set_activity(4242, Some(json!({"details": "Testing!"}))).into_payload();
        assert_eq!(
            payload,
            json!({"cmd": "SET_ACTIVITY", "args": {"pid": 4242, "activity": {"details": "Testing!"}}})
        );
    }

    #[test]
    fn clearing_activity_sends_null() {
        let payload = Command::set_activity(1, None).into_payload();
        assert_eq!(payload["args"]["activity"], Value::Null);
    }

    #[test]
    fn subscribe_sets_evt() {
        let payload = Command::subscribe(EVT_ACTIVITY_JOIN, Value::Null).into_payload();
        assert_eq!(
            payload,
            json!({"cmd": "SUBSCRIBE", "args": {}, "evt": "ACTIVITY_JOIN"})
        );
    }

    #[test]
    fn unsubscribe_sets_evt() {
        let payload = Command::unsubscribe(EVT_ACTIVITY_SPECTATE, json!({})).into_payload();
        assert_eq!(payload["cmd"], "UNSUBSCRIBE");
        assert_eq!(payload["evt"], "ACTIVITY_SPECTATE");
    }
}
