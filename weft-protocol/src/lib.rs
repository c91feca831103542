//! Control-message data definitions exchanged between weft workers.
//!
//! Workers talk over a bidirectional message channel carrying JSON bodies
//! plus out-of-band shared-buffer handles (the transport packet carries the
//! buffers next to the body, mirroring transferables). A body carrying the
//! literal discriminator field [`MESSAGE_TYPE_FIELD`] is a
//! [`ControlMessage`]; any other body is a user message handed to the
//! router's message hook.
//!
//! Request/response correlation rides on the literal [`ASYNC_MSG_ID_FIELD`]
//! injected into the request body; the matching [`ControlMessage::Response`]
//! echoes the id in its `asyncMsgId` field. Both field names and every
//! variant/field rename below are wire contracts shared with peers built
//! against the same protocol.

#![forbid(unsafe_code)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The field identifying a control message, and its discriminator.
pub const MESSAGE_TYPE_FIELD: &str = "threadXMessageType";

/// The correlation field injected into async request bodies.
pub const ASYNC_MSG_ID_FIELD: &str = "__asyncMsgId";

/// A framed control message between two workers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "threadXMessageType")]
pub enum ControlMessage {
    /// Announces that the sending worker finished its router setup.
    ///
    /// Resolves the sender's ready gate on the receiving side; queued sends
    /// to the sender flush once this arrives.
    #[serde(rename = "ready")]
    Ready,

    /// Shares the buffers travelling with this message.
    ///
    /// Sent as an async request; the receiver runs its shared-object factory
    /// over every buffer and confirms with a response.
    #[serde(rename = "shareObjects")]
    ShareObjects,

    /// Withdraws previously shared objects by id.
    #[serde(rename = "forgetObjects")]
    ForgetObjects {
        /// Unique ids of the objects to forget.
        #[serde(rename = "objectIds")]
        object_ids: Vec<u64>,
    },

    /// An event emitted on a shared object, forwarded to its peer.
    #[serde(rename = "sharedObjectEmit")]
    SharedObjectEmit {
        /// Unique id of the emitting object.
        #[serde(rename = "sharedObjectId")]
        shared_object_id: u64,
        /// Event name.
        #[serde(rename = "eventName")]
        event_name: String,
        /// Event payload.
        #[serde(default)]
        data: Value,
    },

    /// The reply to an async request.
    #[serde(rename = "response")]
    Response {
        /// The correlation id the request carried in [`ASYNC_MSG_ID_FIELD`].
        #[serde(rename = "asyncMsgId")]
        async_msg_id: u64,
        /// Whether the request's handler failed; `data` then holds the error
        /// message.
        #[serde(default, skip_serializing_if = "is_false")]
        error: bool,
        /// The handler's return value, or the error message.
        #[serde(default)]
        data: Value,
    },

    /// Asks the receiving worker to shut down its environment.
    ///
    /// Sent as an async request; the receiver acknowledges with a response
    /// before tearing down.
    #[serde(rename = "close")]
    Close,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ControlMessage {
    /// Builds a successful [`ControlMessage::Response`].
    pub fn response_ok(async_msg_id: u64, data: Value) -> Self {
        ControlMessage::Response {
            async_msg_id,
            error: false,
            data,
        }
    }

    /// Builds a failed [`ControlMessage::Response`] carrying `message`.
    pub fn response_err(async_msg_id: u64, message: impl Into<String>) -> Self {
        ControlMessage::Response {
            async_msg_id,
            error: true,
            data: Value::String(message.into()),
        }
    }

    /// Serializes this message into a JSON body.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("control messages serialize to JSON objects")
    }
}

/// Recognizes a control message in `body`.
///
/// Returns `Ok(None)` when the discriminator field is absent, meaning the
/// body is a user message. Returns an error when the discriminator is present
/// but the message does not parse.
pub fn parse_control(body: &Value) -> Result<Option<ControlMessage>, serde_json::Error> {
    if !body
        .as_object()
        .is_some_and(|map| map.contains_key(MESSAGE_TYPE_FIELD))
    {
        return Ok(None);
    }
    serde_json::from_value(body.clone()).map(Some)
}

/// Extracts the correlation id from a message body, if present.
pub fn async_msg_id(body: &Value) -> Option<u64> {
    body.get(ASYNC_MSG_ID_FIELD)?.as_u64()
}

/// Injects the correlation id into a message body.
///
/// Returns `false` (and leaves the body untouched) when the body is not a
/// JSON object and therefore cannot be correlated.
pub fn tag_async_msg_id(body: &mut Value, id: u64) -> bool {
    match body.as_object_mut() {
        Some(map) => {
            map.insert(ASYNC_MSG_ID_FIELD.to_owned(), id.into());
            true
        }
        None => false,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_field_names_are_stable() {
        assert_eq!(ControlMessage::Ready.to_value(), json!({"threadXMessageType": "ready"}));
        assert_eq!(
            ControlMessage::ForgetObjects {
                object_ids: vec![7, 8]
            }
            .to_value(),
            json!({"threadXMessageType": "forgetObjects", "objectIds": [7, 8]}),
        );
        assert_eq!(
            ControlMessage::SharedObjectEmit {
                shared_object_id: 10_000_000_000_042,
                event_name: "ping".into(),
                data: json!({"n": 1}),
            }
            .to_value(),
            json!({
                "threadXMessageType": "sharedObjectEmit",
                "sharedObjectId": 10_000_000_000_042_u64,
                "eventName": "ping",
                "data": {"n": 1},
            }),
        );
    }

    #[test]
    fn response_omits_error_flag_when_ok() {
        assert_eq!(
            ControlMessage::response_ok(3, json!("pong")).to_value(),
            json!({"threadXMessageType": "response", "asyncMsgId": 3, "data": "pong"}),
        );
        assert_eq!(
            ControlMessage::response_err(4, "nope").to_value(),
            json!({
                "threadXMessageType": "response",
                "asyncMsgId": 4,
                "error": true,
                "data": "nope",
            }),
        );
    }

    #[test]
    fn round_trips_through_json() {
        let messages = [
            ControlMessage::Ready,
            ControlMessage::ShareObjects,
            ControlMessage::ForgetObjects {
                object_ids: vec![1],
            },
            ControlMessage::SharedObjectEmit {
                shared_object_id: 5,
                event_name: "e".into(),
                data: Value::Null,
            },
            ControlMessage::response_ok(1, json!(null)),
            ControlMessage::Close,
        ];
        for message in messages {
            let parsed = parse_control(&message.to_value()).unwrap();
            assert_eq!(parsed, Some(message));
        }
    }

    #[test]
    fn user_messages_are_not_control_messages() {
        assert_eq!(parse_control(&json!({"type": "ping"})).unwrap(), None);
        assert_eq!(parse_control(&json!("plain string")).unwrap(), None);
        assert_eq!(parse_control(&json!(null)).unwrap(), None);
    }

    #[test]
    fn malformed_control_messages_are_errors() {
        assert!(parse_control(&json!({"threadXMessageType": "bogus"})).is_err());
        assert!(
            parse_control(&json!({"threadXMessageType": "forgetObjects"})).is_err(),
            "missing objectIds must not parse",
        );
    }

    #[test]
    fn correlation_id_round_trips() {
        let mut body = json!({"type": "ping"});
        assert!(tag_async_msg_id(&mut body, 42));
        assert_eq!(async_msg_id(&body), Some(42));
        assert_eq!(body["type"], json!("ping"));

        let mut not_an_object = json!(5);
        assert!(!tag_async_msg_id(&mut not_an_object, 1));
        assert_eq!(async_msg_id(&not_an_object), None);
    }

    #[test]
    fn large_ids_survive_json_numbers() {
        // The id space tops out below 2^53, so JSON doubles hold ids exactly.
        let id = 899 * 10_u64.pow(13) + 999_999;
        let value = ControlMessage::response_ok(id, Value::Null).to_value();
        let text = serde_json::to_string(&value).unwrap();
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        match parse_control(&reparsed).unwrap() {
            Some(ControlMessage::Response { async_msg_id, .. }) => assert_eq!(async_msg_id, id),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }
}
