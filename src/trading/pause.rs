//! Pause gate shared by both loops of an instance.

use tokio::sync::watch;

/// Binary gate with broadcast wake-up.
///
/// Uses its own `watch` channel so pausing never touches the execution
/// mutex.
#[derive(Debug)]
pub struct PauseGate {
    paused: watch::Sender<bool>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self { paused }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Clear the gate and wake every waiter.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Return immediately when open, otherwise block until `resume`.
    pub async fn wait_until_open(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}
