//! Parsing for the small set of SIP headers this core inspects.
//!
//! Inputs are already-tokenized header *values* (the string after the
//! colon), as handed over by the transport/transaction layer via
//! [`crate::message::SipRequest`]/[`crate::message::SipReply`]. Nothing here
//! parses raw wire text.

/// Split a header value into its leading token and `;name=value` parameters,
/// the shape shared by `Event`, `Expires`, and `Subscription-State`.
fn split_params(value: &str) -> (&str, Vec<(&str, &str)>) {
    let mut parts = value.split(';');
    let token = parts.next().unwrap_or("").trim();
    let params = parts
        .filter_map(|p| {
            let mut kv = p.splitn(2, '=');
            let k = kv.next()?.trim();
            let v = kv.next().unwrap_or("").trim();
            Some((k, v))
        })
        .collect();
    (token, params)
}

/// Parsed `Event` header: event-package name plus optional `id` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub package: String,
    pub id: String,
}

impl EventHeader {
    /// Parse an `Event` header value, e.g. `presence;id=a`.
    pub fn parse(value: &str) -> Option<Self> {
        let (token, params) = split_params(value);
        if token.is_empty() {
            return None;
        }
        let id = params
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("id"))
            .map(|(_, v)| v.to_string())
            .unwrap_or_default();
        Some(Self {
            package: token.to_string(),
            id,
        })
    }
}

/// Parse an `Expires` header value (decimal seconds, parameters stripped).
pub fn parse_expires(value: &str) -> Option<u32> {
    let (token, _) = split_params(value);
    token.parse().ok()
}

/// Parsed `Subscription-State` header carried on a NOTIFY request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStateHeader {
    pub state_token: String,
    pub expires: Option<u32>,
}

impl SubscriptionStateHeader {
    /// Parse a `Subscription-State` header value, e.g. `active;expires=3600`.
    pub fn parse(value: &str) -> Option<Self> {
        let (token, params) = split_params(value);
        if token.is_empty() {
            return None;
        }
        let expires = params
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("expires"))
            .and_then(|(_, v)| v.parse().ok());
        Some(Self {
            state_token: token.to_ascii_lowercase(),
            expires,
        })
    }

    pub fn is_active(&self) -> bool {
        self.state_token == "active"
    }

    pub fn is_pending(&self) -> bool {
        self.state_token == "pending"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_header_with_id() {
        let ev = EventHeader::parse("presence;id=a").unwrap();
        assert_eq!(ev.package, "presence");
        assert_eq!(ev.id, "a");
    }

    #[test]
    fn event_header_without_id_defaults_empty() {
        let ev = EventHeader::parse("refer").unwrap();
        assert_eq!(ev.package, "refer");
        assert_eq!(ev.id, "");
    }

    #[test]
    fn expires_strips_params() {
        assert_eq!(parse_expires("3600;foo=bar"), Some(3600));
        assert_eq!(parse_expires("not-a-number"), None);
    }

    #[test]
    fn subscription_state_active_with_expires() {
        let s = SubscriptionStateHeader::parse("active;expires=3600").unwrap();
        assert!(s.is_active());
        assert_eq!(s.expires, Some(3600));
    }

    #[test]
    fn subscription_state_terminated_has_no_expires() {
        let s = SubscriptionStateHeader::parse("terminated;reason=noresource").unwrap();
        assert!(!s.is_active());
        assert!(!s.is_pending());
        assert_eq!(s.expires, None);
    }
}
