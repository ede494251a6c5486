//! # SIP Subscription Core
//!
//! RFC 6665 (SIP-Specific Event Notification) and RFC 3515/4488 (REFER)
//! subscription-dialog layer: the per-dialog collection of event
//! subscriptions and the per-subscription state machine that governs
//! SUBSCRIBE/NOTIFY/REFER exchanges.
//!
//! ## Architecture position
//!
//! ```text
//! session layer (policy: accept/reject, event-package semantics)
//!      ↓
//! sip-subscription-core (this crate: SS + SUB state machines)
//!      ↓
//! dialog / transaction / transport layers  ← external collaborators
//! ```
//!
//! The dialog object, transport, transaction layer, and message parsing are
//! out of scope here and are consumed through the [`collaborator`],
//! [`timer`], and [`event_queue`] traits instead of a concrete dependency.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sip_subscription_core::collaborator::DialogCollaborator;
//! use sip_subscription_core::config::SubscriptionConfig;
//! use sip_subscription_core::message::{Method, SipRequest};
//! use sip_subscription_core::subscription::SubscriptionSet;
//! use sip_subscription_core::timer::TokioTimerService;
//! use std::sync::Arc;
//!
//! # struct MyDialog;
//! # impl DialogCollaborator for MyDialog {
//! #     fn local_tag(&self) -> String { String::new() }
//! #     fn remote_tag(&self) -> String { String::new() }
//! #     fn update_remote_tag(&self, _tag: String) {}
//! #     fn update_route_set(&self, _route: Vec<String>) {}
//! #     fn inc_usages(&self) {}
//! #     fn dec_usages(&self) {}
//! #     fn reply(&self, _req: &SipRequest, _code: u16, _reason: &str, _headers: &[(String, String)]) {}
//! # }
//! let dialog: Arc<dyn DialogCollaborator> = Arc::new(MyDialog);
//! let timers = Arc::new(TokioTimerService::new());
//! let mut set = SubscriptionSet::new(dialog, timers, None, SubscriptionConfig::default());
//!
//! let req = SipRequest::new(Method::Subscribe, 1).with_header("Event", "presence;id=a");
//! set.on_request_in(&req);
//! ```

pub mod collaborator;
pub mod config;
pub mod errors;
pub mod event_queue;
pub mod headers;
pub mod message;
pub mod subscription;
pub mod timer;

pub use config::SubscriptionConfig;
pub use errors::{SubscriptionError, SubscriptionResult};
pub use subscription::{SingleSubscription, SubscriptionSet, SubscriptionState};
