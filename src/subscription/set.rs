//! The per-dialog collection of subscriptions and the SIP-layer dispatcher
//! that routes requests/replies to the right one.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use crate::collaborator::DialogCollaborator;
use crate::config::SubscriptionConfig;
use crate::errors::{SubscriptionError, SubscriptionResult};
use crate::event_queue::EventQueue;
use crate::message::{Method, Role, Side, SipReply, SipRequest};
use crate::timer::TimerService;

use super::single::{event_identity_from_header, SingleSubscription};

fn role_for(method: Method, side: Side) -> Option<Role> {
    use Method::*;
    use Side::*;
    match (method, side) {
        (Subscribe, Uac) | (Refer, Uac) => Some(Role::Subscriber),
        (Subscribe, Uas) | (Refer, Uas) => Some(Role::Notifier),
        (Notify, Uac) => Some(Role::Notifier),
        (Notify, Uas) => Some(Role::Subscriber),
        (Other, _) => None,
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        481 => "Subscription Does Not Exist",
        501 => "Not Implemented",
        _ => "Error",
    }
}

enum MatchOutcome {
    Found(Arc<SingleSubscription>),
    Rejected(u16),
}

/// Per-dialog container of [`SingleSubscription`]s, keyed for dispatch by
/// `(role, event, id)` and tracking pending transactions by CSeq.
pub struct SubscriptionSet {
    subs: Vec<Arc<SingleSubscription>>,
    uac_cseq_map: HashMap<u32, Arc<SingleSubscription>>,
    uas_cseq_map: HashMap<u32, Arc<SingleSubscription>>,
    dialog: Arc<dyn DialogCollaborator>,
    timer_service: Arc<dyn TimerService>,
    event_queue: Option<Arc<dyn EventQueue>>,
    config: SubscriptionConfig,
}

impl SubscriptionSet {
    pub fn new(
        dialog: Arc<dyn DialogCollaborator>,
        timer_service: Arc<dyn TimerService>,
        event_queue: Option<Arc<dyn EventQueue>>,
        config: SubscriptionConfig,
    ) -> Self {
        Self {
            subs: Vec::new(),
            uac_cseq_map: HashMap::new(),
            uas_cseq_map: HashMap::new(),
            dialog,
            timer_service,
            event_queue,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn subscriptions(&self) -> &[Arc<SingleSubscription>] {
        &self.subs
    }

    /// UAS side: an inbound request. Replies `481` and returns `false` if
    /// it cannot be matched or created.
    pub fn on_request_in(&mut self, req: &SipRequest) -> bool {
        match self.match_or_create(req, Side::Uas) {
            MatchOutcome::Found(sub) => {
                self.uas_cseq_map.insert(req.cseq, sub.clone());
                sub.on_request_in(req)
            }
            MatchOutcome::Rejected(code) => {
                self.dialog.reply(req, code, reason_phrase(code), &[]);
                false
            }
        }
    }

    /// UAC side: an outbound request has been handed to the transport.
    pub fn on_request_sent(&mut self, req: &SipRequest) {
        match self.match_or_create(req, Side::Uac) {
            MatchOutcome::Found(sub) => {
                self.uac_cseq_map.insert(req.cseq, sub.clone());
                sub.on_request_sent(req);
            }
            MatchOutcome::Rejected(_) => {
                error!(
                    cseq = req.cseq,
                    method = %req.method,
                    "on_request_sent: no subscription to dispatch to, caller bug"
                );
            }
        }
    }

    /// UAC side: a final (or provisional) reply to a previously sent
    /// request. Returns `false` if no pending transaction matches.
    pub fn on_reply_in(&mut self, req: &SipRequest, reply: &SipReply) -> bool {
        let Some(sub) = self.uac_cseq_map.remove(&req.cseq) else {
            return false;
        };
        sub.reply_fsm(req, reply);
        self.reap_if_terminated(&sub);
        true
    }

    /// UAS side: a reply we sent to a previously received request.
    pub fn on_reply_sent(&mut self, req: &SipRequest, reply: &SipReply) -> bool {
        let Some(sub) = self.uas_cseq_map.remove(&req.cseq) else {
            return false;
        };
        sub.reply_fsm(req, reply);
        self.reap_if_terminated(&sub);
        true
    }

    /// Force every subscription in the set to Terminated.
    pub fn terminate(&mut self) {
        for sub in &self.subs {
            sub.terminate();
        }
    }

    fn reap_if_terminated(&mut self, sub: &Arc<SingleSubscription>) {
        if sub.terminated() {
            self.subs.retain(|s| !Arc::ptr_eq(s, sub));
        }
    }

    /// Rule 1 (§4.2): matching is skipped entirely, in favor of a direct
    /// creation attempt, whenever the dialog has no remote tag yet, the
    /// method is REFER, or the set is empty. `match_or_create` must compute
    /// this before it knows whether a rejection should read `481` (ordinary
    /// matching found nothing) or `501` (a forced creation attempt hit a
    /// method that cannot create a subscription).
    fn match_or_create(&mut self, req: &SipRequest, side: Side) -> MatchOutcome {
        let skip_matching =
            self.dialog.remote_tag().is_empty() || matches!(req.method, Method::Refer) || self.subs.is_empty();
        let no_match_code = if skip_matching { 501 } else { 481 };

        let Some(role) = role_for(req.method, side) else {
            return MatchOutcome::Rejected(no_match_code);
        };

        let (event, event_id) = match Self::identity_for(req) {
            Ok(pair) => pair,
            Err(err) => {
                debug!(cseq = req.cseq, error = %err, "could not determine subscription identity");
                return MatchOutcome::Rejected(no_match_code);
            }
        };

        if !skip_matching {
            if let Ok(existing) = self.find_match(role, &event, &event_id) {
                return MatchOutcome::Found(existing);
            }
        }

        match self.try_create(role, event, event_id, req.method) {
            Ok(sub) => MatchOutcome::Found(sub),
            Err(err) => {
                debug!(cseq = req.cseq, error = %err, "no subscription created");
                MatchOutcome::Rejected(no_match_code)
            }
        }
    }

    fn identity_for(req: &SipRequest) -> SubscriptionResult<(String, String)> {
        if matches!(req.method, Method::Refer) {
            Ok(("refer".to_string(), req.cseq.to_string()))
        } else {
            event_identity_from_header(req)
        }
    }

    /// Scan for the first matching SUB, reaping any terminated entries found
    /// along the way before deciding there is no match.
    fn find_match(&mut self, role: Role, event: &str, event_id: &str) -> SubscriptionResult<Arc<SingleSubscription>> {
        loop {
            let idx = self.subs.iter().position(|s| s.identity_matches(role, event, event_id));
            match idx {
                None => return Err(SubscriptionError::no_match(role, event, event_id)),
                Some(i) if self.subs[i].terminated() => {
                    self.subs.remove(i);
                }
                Some(i) => return Ok(self.subs[i].clone()),
            }
        }
    }

    /// Create a subscription, or fail if `method` cannot originate one.
    /// Per §7, this is the genuinely-fallible operation underlying the
    /// `481`/`501` wire-level outcomes `match_or_create` produces — callers
    /// embedding this core who want a `Result` rather than an implicit SIP
    /// reply can call this directly instead of going through dispatch.
    pub fn try_create(
        &mut self,
        role: Role,
        event: impl Into<String>,
        event_id: impl Into<String>,
        method: Method,
    ) -> SubscriptionResult<Arc<SingleSubscription>> {
        if !matches!(method, Method::Subscribe | Method::Refer) {
            return Err(SubscriptionError::non_creating_method(method.to_string()));
        }
        let sub = SingleSubscription::new(
            Uuid::new_v4(),
            role,
            event,
            event_id,
            self.dialog.clone(),
            self.timer_service.clone(),
            self.event_queue.clone(),
            self.config.clone(),
        );
        self.dialog.inc_usages();
        self.subs.push(sub.clone());
        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::testing::MockDialog;
    use crate::timer::testing::ManualTimerService;

    fn new_set() -> (SubscriptionSet, Arc<MockDialog>, Arc<ManualTimerService>) {
        let dialog = Arc::new(MockDialog::new("local-tag"));
        let timers = Arc::new(ManualTimerService::new());
        let set = SubscriptionSet::new(dialog.clone(), timers.clone(), None, SubscriptionConfig::default());
        (set, dialog, timers)
    }

    #[test]
    fn subscribe_with_no_prior_dialog_creates_subscription() {
        let (mut set, dialog, _timers) = new_set();
        let req = SipRequest::new(Method::Subscribe, 1).with_header("Event", "presence;id=a");
        assert!(set.on_request_in(&req));
        assert_eq!(set.len(), 1);
        assert_eq!(dialog.usages(), 1);
    }

    #[test]
    fn refer_always_creates_a_fresh_subscription() {
        let (mut set, dialog, _timers) = new_set();
        dialog.update_remote_tag("remote".into());
        let r1 = SipRequest::new(Method::Refer, 7);
        set.on_request_sent(&r1);
        let r2 = SipRequest::new(Method::Refer, 8);
        set.on_request_sent(&r2);
        assert_eq!(set.len(), 2);
        assert!(set.subscriptions()[0].event_id() == "7");
        assert!(set.subscriptions()[1].event_id() == "8");
    }

    #[test]
    fn notify_with_no_match_gets_481() {
        let (mut set, dialog, _timers) = new_set();
        dialog.update_remote_tag("remote".into());
        // populate the set with one unrelated subscription so matching (not
        // creation) is exercised.
        let sub_req = SipRequest::new(Method::Subscribe, 1).with_header("Event", "dialog;id=z");
        set.on_request_in(&sub_req);

        let req = SipRequest::new(Method::Notify, 2).with_header("Event", "presence;id=x");
        assert!(!set.on_request_in(&req));
        let replies = dialog.replies();
        assert_eq!(replies.last().unwrap().code, 481);
    }

    #[test]
    fn reply_causing_termination_reaps_the_subscription() {
        let (mut set, _dialog, _timers) = new_set();
        let req = SipRequest::new(Method::Subscribe, 1).with_header("Event", "presence;id=a");
        set.on_request_sent(&req);
        assert_eq!(set.len(), 1);
        let reply = SipReply::new(404);
        assert!(set.on_reply_in(&req, &reply));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn overlapping_subscribe_is_refused_with_500_and_retry_after() {
        let (mut set, dialog, _timers) = new_set();
        let req1 = SipRequest::new(Method::Subscribe, 1).with_header("Event", "presence;id=a");
        assert!(set.on_request_in(&req1));
        let req2 = SipRequest::new(Method::Subscribe, 2).with_header("Event", "presence;id=a");
        dialog.update_remote_tag("remote".into());
        assert!(!set.on_request_in(&req2));
        let last = dialog.replies().last().unwrap().clone();
        assert_eq!(last.code, 500);
        let retry_after: u32 = last
            .header("Retry-After")
            .expect("500 must carry Retry-After")
            .parse()
            .expect("Retry-After must be an integer");
        assert!(retry_after <= 9, "Retry-After {retry_after} outside [0,9]");
    }

    #[test]
    fn unrelated_method_on_fresh_dialog_gets_501_not_481() {
        // Rule 1 forces a creation attempt here (empty remote tag, empty
        // set); NOTIFY cannot create, so the outcome must be 501, not the
        // 481 an ordinary failed match would produce.
        let (mut set, dialog, _timers) = new_set();
        let req = SipRequest::new(Method::Notify, 1).with_header("Event", "presence;id=a");
        assert!(!set.on_request_in(&req));
        assert_eq!(set.len(), 0);
        let reply = dialog.replies().last().unwrap().clone();
        assert_eq!(reply.code, 501);
    }

    #[test]
    fn try_create_rejects_non_creating_method() {
        let (mut set, _dialog, _timers) = new_set();
        let err = set
            .try_create(Role::Notifier, "presence", "a", Method::Notify)
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::NonCreatingMethod { .. }));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn terminate_forces_every_subscription_terminated() {
        let (mut set, _dialog, _timers) = new_set();
        let req1 = SipRequest::new(Method::Subscribe, 1).with_header("Event", "presence;id=a");
        set.on_request_sent(&req1);
        let req2 = SipRequest::new(Method::Subscribe, 2).with_header("Event", "dialog;id=b");
        set.on_request_sent(&req2);
        set.terminate();
        for sub in set.subscriptions() {
            assert!(sub.terminated());
        }
    }
}
