//! Injected interfaces standing in for out-of-scope systems: the enclosing
//! dialog, and (separately, in `timer.rs`/`event_queue.rs`) the timer
//! service and event queue.

use crate::message::SipRequest;

/// Operations this core needs from its enclosing dialog object. The dialog
/// itself — transport, transaction matching, message parsing — is out of
/// scope; only this narrow surface is consumed.
pub trait DialogCollaborator: Send + Sync {
    /// The dialog's local tag, stable for the dialog's lifetime.
    fn local_tag(&self) -> String;

    /// The dialog's remote tag, empty before the first 2xx is processed.
    fn remote_tag(&self) -> String;

    /// Adopt a remote tag learned from a 2xx reply.
    fn update_remote_tag(&self, tag: String);

    /// Install a record-route set learned from a 2xx reply.
    fn update_route_set(&self, route: Vec<String>);

    /// Increment the dialog's usage counter. Called exactly once per SUB
    /// creation.
    fn inc_usages(&self);

    /// Decrement the dialog's usage counter. Called exactly once per SUB
    /// entering Terminated.
    fn dec_usages(&self);

    /// Send a reply to a previously received request through the dialog.
    fn reply(&self, req: &SipRequest, code: u16, reason: &str, headers: &[(String, String)]);
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! A deterministic [`DialogCollaborator`] test double recording every
    //! call for assertion.
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentReply {
        pub cseq: u32,
        pub code: u16,
        pub reason: String,
        pub headers: Vec<(String, String)>,
    }

    impl SentReply {
        /// Look up a header by name, case-insensitively, as sent.
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    #[derive(Default)]
    pub struct MockDialog {
        inner: Mutex<MockDialogState>,
    }

    #[derive(Default)]
    struct MockDialogState {
        local_tag: String,
        remote_tag: String,
        route_set: Vec<String>,
        usages: i64,
        replies: Vec<SentReply>,
    }

    impl MockDialog {
        pub fn new(local_tag: impl Into<String>) -> Self {
            Self {
                inner: Mutex::new(MockDialogState {
                    local_tag: local_tag.into(),
                    ..Default::default()
                }),
            }
        }

        pub fn usages(&self) -> i64 {
            self.inner.lock().usages
        }

        pub fn route_set(&self) -> Vec<String> {
            self.inner.lock().route_set.clone()
        }

        pub fn replies(&self) -> Vec<SentReply> {
            self.inner.lock().replies.clone()
        }
    }

    impl DialogCollaborator for MockDialog {
        fn local_tag(&self) -> String {
            self.inner.lock().local_tag.clone()
        }

        fn remote_tag(&self) -> String {
            self.inner.lock().remote_tag.clone()
        }

        fn update_remote_tag(&self, tag: String) {
            self.inner.lock().remote_tag = tag;
        }

        fn update_route_set(&self, route: Vec<String>) {
            self.inner.lock().route_set = route;
        }

        fn inc_usages(&self) {
            self.inner.lock().usages += 1;
        }

        fn dec_usages(&self) {
            self.inner.lock().usages -= 1;
        }

        fn reply(&self, req: &SipRequest, code: u16, reason: &str, headers: &[(String, String)]) {
            self.inner.lock().replies.push(SentReply {
                cseq: req.cseq,
                code,
                reason: reason.to_string(),
                headers: headers.to_vec(),
            });
        }
    }
}
