//! Protobuf messages exchanged with plugin handlers.
//!
//! The types are hand-declared with `prost` derives; field tags are part of
//! the guest ABI and must not change.

use std::collections::HashMap;

/// A protobuf message that can cross the boundary under a handle.
///
/// `TYPE` tags the buffer when the host mints the handle, so a handle
/// carrying one message type cannot be decoded as another.
pub trait InteropMessage: prost::Message + Default {
    /// Fully qualified message name.
    const TYPE: &'static str;
}

/// An audit event passed to the guest.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Event {
    /// Event type, e.g. `user.login`.
    #[prost(string, tag = "1")]
    pub r#type: String,
    /// Event code.
    #[prost(string, tag = "2")]
    pub code: String,
    /// Unique event id.
    #[prost(string, tag = "3")]
    pub id: String,
    /// Event time in milliseconds since the Unix epoch.
    #[prost(int64, tag = "4")]
    pub time_unix_ms: i64,
    /// Free-form event fields.
    #[prost(map = "string, string", tag = "5")]
    pub fields: HashMap<String, String>,
}

/// Request passed to the guest `handleEvent` export.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HandleEventRequest {
    /// The event to handle.
    #[prost(message, optional, tag = "1")]
    pub event: Option<Event>,
}

/// Response returned by `handleEvent`: success flag, error message and an
/// optional modified event.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HandleEventResponse {
    /// Whether the handler succeeded.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Error message when `success` is false.
    #[prost(string, tag = "2")]
    pub error: String,
    /// Modified event, if the handler changed it.
    #[prost(message, optional, tag = "3")]
    pub event: Option<Event>,
}

/// Request passed to the guest `rewriteHeaders` export.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RewriteHeadersRequest {
    /// Headers to rewrite.
    #[prost(map = "string, string", tag = "1")]
    pub headers: HashMap<String, String>,
}

/// Response returned by `rewriteHeaders`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RewriteHeadersResponse {
    /// Whether the handler succeeded.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Error message when `success` is false.
    #[prost(string, tag = "2")]
    pub error: String,
    /// Rewritten headers.
    #[prost(map = "string, string", tag = "3")]
    pub headers: HashMap<String, String>,
}

impl InteropMessage for Event {
    const TYPE: &'static str = "events.Event";
}

impl InteropMessage for HandleEventRequest {
    const TYPE: &'static str = "plugin.HandleEventRequest";
}

impl InteropMessage for HandleEventResponse {
    const TYPE: &'static str = "plugin.HandleEventResponse";
}

impl InteropMessage for RewriteHeadersRequest {
    const TYPE: &'static str = "plugin.RewriteHeadersRequest";
}

impl InteropMessage for RewriteHeadersResponse {
    const TYPE: &'static str = "plugin.RewriteHeadersResponse";
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn event_field_tags_match_wire_contract() {
        let event = Event {
            r#type: "a".to_string(),
            ..Default::default()
        };
        // field 1, wire type 2 (length-delimited), length 1, "a"
        assert_eq!(event.encode_to_vec(), vec![0x0a, 0x01, b'a']);
    }

    #[test]
    fn response_success_is_field_one() {
        let response = HandleEventResponse {
            success: true,
            ..Default::default()
        };
        assert_eq!(response.encode_to_vec(), vec![0x08, 0x01]);
    }

    #[test]
    fn headers_map_decodes() {
        let response = RewriteHeadersResponse {
            success: true,
            error: String::new(),
            headers: HashMap::from([
                ("X-A".to_string(), "1".to_string()),
                ("X-B".to_string(), "2".to_string()),
            ]),
        };
        let decoded = RewriteHeadersResponse::decode(response.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.headers.len(), 2);
        assert_eq!(decoded.headers["X-B"], "2");
    }
}
