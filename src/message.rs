//! Boundary message types.
//!
//! The transport, transaction, and SIP-parsing layers are explicitly out of
//! scope for this crate (see the crate-level docs). [`SipRequest`] and
//! [`SipReply`] stand in for whatever already-parsed request/response
//! structures those layers hand to the subscription core; this module does
//! not parse raw SIP wire text.

use std::collections::HashMap;
use std::fmt;

/// SIP methods this core cares about. Anything else collapses to `Other`,
/// which never matches a subscription and never creates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Subscribe,
    Notify,
    Refer,
    Other,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Subscribe => write!(f, "SUBSCRIBE"),
            Method::Notify => write!(f, "NOTIFY"),
            Method::Refer => write!(f, "REFER"),
            Method::Other => write!(f, "OTHER"),
        }
    }
}

/// Which side of a subscription this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Role {
    /// Issues SUBSCRIBE/REFER and receives NOTIFY.
    Subscriber,
    /// Receives SUBSCRIBE/REFER and sends NOTIFY.
    Notifier,
}

/// Which side of the transaction the local process is on for a given message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// We are the UAC: we sent the request and await (or sent) the reply.
    Uac,
    /// We are the UAS: we received the request and send (or sent) the reply.
    Uas,
}

/// A parsed inbound or outbound SIP request, as delivered by the transport
/// and transaction layers.
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub method: Method,
    pub cseq: u32,
    headers: HashMap<String, String>,
}

impl SipRequest {
    pub fn new(method: Method, cseq: u32) -> Self {
        Self {
            method,
            cseq,
            headers: HashMap::new(),
        }
    }

    /// Attach a header, keyed case-insensitively as SIP requires.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// A final or provisional SIP reply to a previously sent/received request.
#[derive(Debug, Clone)]
pub struct SipReply {
    pub code: u16,
    /// `To` tag carried by the reply, if any (used to adopt the dialog's
    /// remote tag on the first 2xx).
    pub to_tag: Option<String>,
    /// Record-Route set carried by the reply, already in the order the
    /// dialog should install it (the transaction layer's job, not ours).
    pub record_route: Vec<String>,
    headers: HashMap<String, String>,
}

impl SipReply {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            to_tag: None,
            record_route: Vec::new(),
            headers: HashMap::new(),
        }
    }

    pub fn with_to_tag(mut self, tag: impl Into<String>) -> Self {
        self.to_tag = Some(tag.into());
        self
    }

    pub fn with_record_route(mut self, route: Vec<String>) -> Self {
        self.record_route = route;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Whether this is a final reply (RFC 3261 §7.2: 2xx and above).
    pub fn is_final(&self) -> bool {
        self.code >= 200
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = SipRequest::new(Method::Subscribe, 1).with_header("Event", "presence;id=a");
        assert_eq!(req.header("event"), Some("presence;id=a"));
        assert_eq!(req.header("EVENT"), Some("presence;id=a"));
    }

    #[test]
    fn reply_is_final_above_2xx() {
        assert!(!SipReply::new(100).is_final());
        assert!(SipReply::new(200).is_final());
        assert!(SipReply::new(404).is_final());
    }
}
