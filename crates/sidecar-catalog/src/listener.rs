//! Listener contract for catalog subscribers

use tokio::sync::mpsc;

use crate::event::ChangeEvent;

/// Capacity of every listener's event queue
pub const LISTENER_QUEUE_CAPACITY: usize = 20;

/// A consumer of catalog change events.
///
/// The catalog pushes into `sender()` with `try_send` while holding its write
/// lock, so a slow consumer loses events instead of stalling merges.
pub trait Listener: Send + Sync {
    /// Unique name used for subscribe/unsubscribe
    fn name(&self) -> &str;

    /// Sending half of the listener's bounded queue
    fn sender(&self) -> mpsc::Sender<ChangeEvent>;

    /// Managed listeners are stopped by the catalog on unsubscribe
    fn is_managed(&self) -> bool;

    /// Request the listener's task to stop at its next suspension point
    fn stop(&self);
}

/// Create a queue sized for catalog delivery
pub fn event_channel() -> (mpsc::Sender<ChangeEvent>, mpsc::Receiver<ChangeEvent>) {
    mpsc::channel(LISTENER_QUEUE_CAPACITY)
}
