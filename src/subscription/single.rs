//! One event-package subscription, identified by `(role, event, id)`, and
//! the state machine that governs it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collaborator::DialogCollaborator;
use crate::config::SubscriptionConfig;
use crate::errors::{SubscriptionError, SubscriptionResult};
use crate::event_queue::EventQueue;
use crate::headers::{parse_expires, EventHeader, SubscriptionStateHeader};
use crate::message::{Method, Role, SipReply, SipRequest};
use crate::timer::{TimerFireHandler, TimerHandle, TimerKind, TimerService};

use super::state::{is_fatal_response, SubscriptionState};

/// One event-package subscription. Owns the state machine, the two
/// lifecycle timers, a pending-subscribe counter, and the state mutex;
/// everything else is reached through injected collaborators.
pub struct SingleSubscription {
    id: Uuid,
    role: Role,
    event: String,
    event_id: String,
    state: Mutex<SubscriptionState>,
    pending_subscribe: Mutex<u32>,
    dialog: Arc<dyn DialogCollaborator>,
    timer_service: Arc<dyn TimerService>,
    event_queue: Option<Arc<dyn EventQueue>>,
    config: SubscriptionConfig,
}

impl SingleSubscription {
    pub fn new(
        id: Uuid,
        role: Role,
        event: impl Into<String>,
        event_id: impl Into<String>,
        dialog: Arc<dyn DialogCollaborator>,
        timer_service: Arc<dyn TimerService>,
        event_queue: Option<Arc<dyn EventQueue>>,
        config: SubscriptionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            role,
            event: event.into(),
            event_id: event_id.into(),
            state: Mutex::new(SubscriptionState::Init),
            pending_subscribe: Mutex::new(0),
            dialog,
            timer_service,
            event_queue,
            config,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    pub fn terminated(&self) -> bool {
        self.state().is_terminated()
    }

    pub fn pending_subscribe(&self) -> u32 {
        *self.pending_subscribe.lock()
    }

    /// Identity match used by the owning set's matcher: same role and event,
    /// and either the same id or (an empty incoming id against a `refer`
    /// subscription).
    pub fn identity_matches(&self, role: Role, event: &str, event_id: &str) -> bool {
        self.role == role
            && self.event == event
            && (self.event_id == event_id || (event_id.is_empty() && self.event == "refer"))
    }

    /// UAS admission of an inbound SUBSCRIBE/REFER. Returns `false` if the
    /// request was refused locally (a reply has already been sent).
    pub fn on_request_in(self: &Arc<Self>, req: &SipRequest) -> bool {
        if !self.admit() {
            let retry = fastrand::u32(0..=self.config.retry_after_max_secs);
            warn!(
                subscription = %self.id,
                event = %self.event,
                "refusing overlapping SUBSCRIBE/REFER, pending transaction in flight"
            );
            self.dialog.reply(
                req,
                500,
                "Server Internal Error",
                &[("Retry-After".to_string(), retry.to_string())],
            );
            return false;
        }
        self.request_fsm();
        true
    }

    /// UAC notification that the outbound SUBSCRIBE/REFER was handed to the
    /// transport. There is no reply to refuse with on this path.
    pub fn on_request_sent(self: &Arc<Self>, _req: &SipRequest) {
        *self.pending_subscribe.lock() += 1;
        self.request_fsm();
    }

    /// `true` iff admission succeeded and incremented `pending_subscribe`.
    fn admit(&self) -> bool {
        let mut pending = self.pending_subscribe.lock();
        if *pending > 0 {
            return false;
        }
        *pending += 1;
        true
    }

    /// Shared SUBSCRIBE/REFER request-FSM: every admitted request (including
    /// refreshes from Pending/Active) re-enters NotifyWait and re-arms Timer N.
    fn request_fsm(self: &Arc<Self>) {
        let transitioned = {
            let mut guard = self.state.lock();
            if guard.is_terminated() {
                false
            } else {
                *guard = SubscriptionState::NotifyWait;
                true
            }
        };
        if transitioned {
            debug!(subscription = %self.id, "admitted SUBSCRIBE/REFER, entering NotifyWait");
            self.arm_timer_n();
        }
    }

    /// Consume a final reply belonging to a prior request. Provisional
    /// replies are ignored.
    pub fn reply_fsm(self: &Arc<Self>, req: &SipRequest, reply: &SipReply) {
        if !reply.is_final() {
            return;
        }
        match req.method {
            Method::Subscribe | Method::Refer => self.reply_fsm_subscribe_refer(req, reply),
            Method::Notify => self.reply_fsm_notify(reply, req),
            Method::Other => {
                warn!(subscription = %self.id, "reply_fsm invoked for a non-creating method");
            }
        }
    }

    fn reply_fsm_subscribe_refer(self: &Arc<Self>, req: &SipRequest, reply: &SipReply) {
        let was_notify_wait = self.state() == SubscriptionState::NotifyWait;
        if reply.code >= 300 {
            if was_notify_wait || is_fatal_response(reply.code) {
                self.do_terminate();
            }
        } else {
            if self.dialog.remote_tag().is_empty() {
                if let Some(tag) = &reply.to_tag {
                    self.dialog.update_remote_tag(tag.clone());
                }
                self.dialog.update_route_set(reply.record_route.clone());
            }
            match reply.header("Expires").and_then(parse_expires) {
                Some(0) => {
                    // Timer N remains the safety net.
                }
                Some(secs) => self.arm_timer_expires(Duration::from_secs(secs as u64)),
                None => {
                    if matches!(req.method, Method::Subscribe) {
                        debug!(subscription = %self.id, "2xx to SUBSCRIBE missing mandatory Expires header");
                        self.do_terminate();
                    }
                }
            }
        }
        let mut pending = self.pending_subscribe.lock();
        *pending = pending.saturating_sub(1);
    }

    fn reply_fsm_notify(self: &Arc<Self>, reply: &SipReply, notify_req: &SipRequest) {
        if reply.code >= 300 {
            if is_fatal_response(reply.code) {
                self.do_terminate();
            }
            return;
        }
        let parsed = notify_req
            .header("Subscription-State")
            .and_then(SubscriptionStateHeader::parse);

        let next = parsed.as_ref().and_then(|s| {
            let expires = s.expires.unwrap_or(0);
            if expires == 0 {
                None
            } else if s.is_active() {
                Some((SubscriptionState::Active, expires))
            } else if s.is_pending() {
                Some((SubscriptionState::Pending, expires))
            } else {
                None
            }
        });

        match next {
            Some((state, expires)) => {
                self.cancel_timer_n();
                self.set_state(state);
                self.arm_timer_expires(Duration::from_secs(expires as u64));
            }
            None => {
                if let Some(s) = &parsed {
                    debug!(
                        subscription = %self.id,
                        state_token = %s.state_token,
                        "NOTIFY carried a terminating or unrecognized Subscription-State"
                    );
                }
                self.do_terminate();
            }
        }
    }

    /// Force transition to Terminated. Idempotent.
    pub fn terminate(self: &Arc<Self>) {
        self.do_terminate();
    }

    /// Cancel both timers and transition to Terminated. Safe to call from a
    /// timer's own fire callback: cancelling a handle that is the one
    /// currently invoking this is just an abort-after-completion no-op, and
    /// the `state_lock` funnel in `set_state` makes a concurrent second
    /// caller a no-op too.
    fn do_terminate(&self) {
        self.cancel_timer_n();
        self.cancel_timer_expires();
        if self.set_state(SubscriptionState::Terminated) {
            debug!(subscription = %self.id, "subscription terminated");
            if let Some(queue) = &self.event_queue {
                queue.post_wake();
            }
        }
    }

    /// The single funnel for state writes. Returns `true` iff this call is
    /// the one that newly entered Terminated (so the usage decrement and
    /// any wake-up happen exactly once).
    fn set_state(&self, new_state: SubscriptionState) -> bool {
        let mut guard = self.state.lock();
        if guard.is_terminated() {
            return false;
        }
        let became_terminated = new_state.is_terminated();
        *guard = new_state;
        if became_terminated {
            self.dialog.dec_usages();
        }
        became_terminated
    }

    fn arm_timer_n(self: &Arc<Self>) {
        self.timer_service.set_timer(
            TimerHandle::new(self.id, TimerKind::N),
            self.config.timer_n_duration(),
            self.clone(),
        );
    }

    fn cancel_timer_n(&self) {
        self.timer_service.remove_timer(TimerHandle::new(self.id, TimerKind::N));
    }

    fn arm_timer_expires(self: &Arc<Self>, duration: Duration) {
        self.timer_service.set_timer(
            TimerHandle::new(self.id, TimerKind::Expires),
            duration,
            self.clone(),
        );
    }

    fn cancel_timer_expires(&self) {
        self.timer_service
            .remove_timer(TimerHandle::new(self.id, TimerKind::Expires));
    }
}

impl TimerFireHandler for SingleSubscription {
    fn fire(&self, handle: TimerHandle) {
        debug!(subscription = %self.id, kind = ?handle.kind, "timer fired");
        self.do_terminate();
    }
}

/// Extract `(event, id)` for a request that is not REFER; REFER's identity
/// is derived from its CSeq rather than an `Event` header.
pub fn event_identity_from_header(req: &SipRequest) -> SubscriptionResult<(String, String)> {
    let value = req
        .header("Event")
        .ok_or_else(|| SubscriptionError::malformed_header("Event", ""))?;
    EventHeader::parse(value)
        .map(|ev| (ev.package, ev.id))
        .ok_or_else(|| SubscriptionError::malformed_header("Event", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::testing::MockDialog;
    use crate::timer::testing::ManualTimerService;

    fn new_sub(role: Role, event: &str, id: &str) -> (Arc<SingleSubscription>, Arc<MockDialog>, Arc<ManualTimerService>) {
        let dialog = Arc::new(MockDialog::new("local-tag"));
        let timers = Arc::new(ManualTimerService::new());
        let sub = SingleSubscription::new(
            Uuid::new_v4(),
            role,
            event,
            id,
            dialog.clone(),
            timers.clone(),
            None,
            SubscriptionConfig::default(),
        );
        (sub, dialog, timers)
    }

    #[test]
    fn request_fsm_enters_notify_wait_and_arms_timer_n() {
        let (sub, _dialog, timers) = new_sub(Role::Subscriber, "presence", "a");
        let req = SipRequest::new(Method::Subscribe, 1);
        assert!(sub.on_request_in(&req));
        assert_eq!(sub.state(), SubscriptionState::NotifyWait);
        assert!(timers.is_armed(TimerHandle::new(sub_id(&sub), TimerKind::N)));
    }

    #[test]
    fn overlapping_admission_is_refused_with_500() {
        let (sub, dialog, _timers) = new_sub(Role::Notifier, "presence", "a");
        let req1 = SipRequest::new(Method::Subscribe, 1);
        assert!(sub.on_request_in(&req1));
        let req2 = SipRequest::new(Method::Subscribe, 2);
        assert!(!sub.on_request_in(&req2));
        let replies = dialog.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, 500);
        let retry_after: u32 = replies[0]
            .header("Retry-After")
            .expect("500 must carry Retry-After")
            .parse()
            .expect("Retry-After must be an integer");
        assert!(retry_after <= 9, "Retry-After {retry_after} outside [0,9]");
    }

    #[test]
    fn initial_failure_terminates() {
        let (sub, dialog, _timers) = new_sub(Role::Subscriber, "presence", "a");
        dialog.inc_usages(); // mirrors the increment the owning set performs on creation
        let req = SipRequest::new(Method::Subscribe, 1);
        sub.on_request_sent(&req);
        assert_eq!(sub.state(), SubscriptionState::NotifyWait);
        let reply = SipReply::new(404);
        sub.reply_fsm(&req, &reply);
        assert!(sub.terminated());
        assert_eq!(dialog.usages(), 0);
    }

    #[test]
    fn successful_subscribe_adopts_tag_and_arms_expires() {
        let (sub, dialog, timers) = new_sub(Role::Subscriber, "presence", "a");
        let req = SipRequest::new(Method::Subscribe, 1);
        sub.on_request_sent(&req);
        let reply = SipReply::new(200)
            .with_to_tag("remote-tag")
            .with_header("Expires", "3600");
        sub.reply_fsm(&req, &reply);
        assert_eq!(dialog.remote_tag(), "remote-tag");
        assert!(timers.is_armed(TimerHandle::new(sub_id(&sub), TimerKind::Expires)));
        assert_eq!(sub.pending_subscribe(), 0);
    }

    #[test]
    fn subscribe_2xx_without_expires_terminates() {
        let (sub, _dialog, _timers) = new_sub(Role::Subscriber, "presence", "a");
        let req = SipRequest::new(Method::Subscribe, 1);
        sub.on_request_sent(&req);
        let reply = SipReply::new(200).with_to_tag("remote-tag");
        sub.reply_fsm(&req, &reply);
        assert!(sub.terminated());
    }

    #[test]
    fn refresh_489_terminates_per_rfc5057() {
        let (sub, _dialog, timers) = new_sub(Role::Subscriber, "presence", "a");
        let req1 = SipRequest::new(Method::Subscribe, 1);
        sub.on_request_sent(&req1);
        sub.reply_fsm(&req1, &SipReply::new(200).with_to_tag("t").with_header("Expires", "3600"));
        let notify = SipRequest::new(Method::Notify, 2).with_header("Subscription-State", "active;expires=3600");
        sub.on_request_in(&notify);
        sub.reply_fsm(&notify, &SipReply::new(200));
        assert_eq!(sub.state(), SubscriptionState::Active);

        let refresh = SipRequest::new(Method::Subscribe, 3);
        sub.on_request_sent(&refresh);
        assert_eq!(sub.state(), SubscriptionState::NotifyWait);
        sub.reply_fsm(&refresh, &SipReply::new(489));
        assert!(sub.terminated());
        let _ = timers;
    }

    #[test]
    fn refresh_408_leaves_state_active() {
        let (sub, _dialog, _timers) = new_sub(Role::Subscriber, "presence", "a");
        let req1 = SipRequest::new(Method::Subscribe, 1);
        sub.on_request_sent(&req1);
        sub.reply_fsm(&req1, &SipReply::new(200).with_to_tag("t").with_header("Expires", "3600"));
        let notify = SipRequest::new(Method::Notify, 2).with_header("Subscription-State", "active;expires=3600");
        sub.on_request_in(&notify);
        sub.reply_fsm(&notify, &SipReply::new(200));

        let refresh = SipRequest::new(Method::Subscribe, 3);
        sub.on_request_sent(&refresh);
        sub.reply_fsm(&refresh, &SipReply::new(408));
        assert_eq!(sub.state(), SubscriptionState::Active);
        assert_eq!(sub.pending_subscribe(), 0);
    }

    #[test]
    fn timer_n_fire_terminates_and_wakes_queue() {
        use crate::event_queue::ChannelEventQueue;
        let dialog = Arc::new(MockDialog::new("local-tag"));
        let timers = Arc::new(ManualTimerService::new());
        let (queue, mut rx) = ChannelEventQueue::new();
        let sub = SingleSubscription::new(
            Uuid::new_v4(),
            Role::Subscriber,
            "presence",
            "a",
            dialog,
            timers.clone(),
            Some(Arc::new(queue)),
            SubscriptionConfig::default(),
        );
        let req = SipRequest::new(Method::Subscribe, 1);
        sub.on_request_sent(&req);
        timers.fire(TimerHandle::new(sub_id(&sub), TimerKind::N));
        assert!(sub.terminated());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn terminate_is_idempotent() {
        let (sub, dialog, _timers) = new_sub(Role::Subscriber, "presence", "a");
        dialog.inc_usages();
        sub.terminate();
        sub.terminate();
        assert_eq!(dialog.usages(), 0);
    }

    fn sub_id(sub: &Arc<SingleSubscription>) -> Uuid {
        sub.id
    }
}
