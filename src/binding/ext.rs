//! Typed extension records exchanged with the two bridged protocols.
//!
//! Requests and responses on the upstream side carry [`RequestBeginEx`]
//! under [`REQUEST_TYPE_ID`]. The event-log downstream uses
//! [`EventsBeginEx`] and [`EventsDataEx`] under [`EVENTS_TYPE_ID`].

use serde::{Deserialize, Serialize};

/// Type id of request/response header extensions.
pub const REQUEST_TYPE_ID: u32 = 0x0000_0101;

/// Type id of event-log extensions.
pub const EVENTS_TYPE_ID: u32 = 0x0000_0201;

/// Conventional payload length header.
pub const CONTENT_LENGTH: &str = "content-length";

/// Response status pseudo-header.
pub const STATUS: &str = ":status";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// First value of a header, matching names case-insensitively.
pub fn find_header<'h>(headers: &'h [HeaderEntry], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Request or response metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBeginEx {
    pub headers: Vec<HeaderEntry>,
}

impl RequestBeginEx {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Opens an event-log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventsBeginEx {
    /// Append messages to a topic.
    Produce { topic: String },
    /// Subscribe to messages on a topic whose headers match all filters.
    Correlate {
        topic: String,
        filters: Vec<HeaderEntry>,
    },
}

/// Per-message metadata on the first or last fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventsDataEx {
    /// Outbound message. `deferred` is the payload length still to come.
    Produce {
        deferred: u32,
        key: Option<String>,
        headers: Vec<HeaderEntry>,
    },
    /// Inbound message.
    Fetch {
        deferred: u32,
        headers: Vec<HeaderEntry>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Extension;

    #[test]
    fn test_find_header_case_insensitive() {
        let headers = vec![
            HeaderEntry::new("Content-Type", "application/json"),
            HeaderEntry::new("content-type", "text/plain"),
        ];
        assert_eq!(find_header(&headers, "content-type"), Some("application/json"));
        assert_eq!(find_header(&headers, "accept"), None);
    }

    #[test]
    fn test_events_records_through_extension() {
        let begin = EventsBeginEx::Correlate {
            topic: "items-responses".into(),
            filters: vec![HeaderEntry::new("correlation-id", "items-00ff")],
        };
        let ext = Extension::encode(EVENTS_TYPE_ID, &begin).unwrap();
        assert_eq!(ext.decode_if::<EventsBeginEx>(EVENTS_TYPE_ID), Some(begin));
        assert_eq!(ext.decode_if::<RequestBeginEx>(REQUEST_TYPE_ID), None);

        let data = EventsDataEx::Produce {
            deferred: 128,
            key: None,
            headers: Vec::new(),
        };
        let ext = Extension::encode(EVENTS_TYPE_ID, &data).unwrap();
        assert_eq!(ext.decode::<EventsDataEx>().unwrap(), data);
    }
}
