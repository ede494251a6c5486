//! The optional event queue used only to wake the owning session after a
//! timer-induced termination.

use tokio::sync::mpsc;

/// Wakes the owning session when a terminal transition occurs off the
/// protocol-event path (i.e. from a timer callback).
pub trait EventQueue: Send + Sync {
    /// Post a wake-up. The payload carries no data; the session is expected
    /// to re-poll subscription state on receipt.
    fn post_wake(&self);
}

/// Channel-backed default [`EventQueue`], grounded on the teacher test
/// suite's use of `tokio::sync::mpsc` to observe dialog-core events.
pub struct ChannelEventQueue {
    sender: mpsc::UnboundedSender<()>,
}

impl ChannelEventQueue {
    /// Create a queue paired with the receiver the owning session polls.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventQueue for ChannelEventQueue {
    fn post_wake(&self) {
        // The receiver may have been dropped if the session already shut
        // down; a dropped wake is not an error condition for the timer path.
        let _ = self.sender.send(());
    }
}
