use tokio::sync::watch;
use tracing::info;

/// One-way latch: unbootstrapped until marked, then bootstrapped forever
pub struct BootstrapFlag {
    sender: watch::Sender<bool>,
}

impl Default for BootstrapFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapFlag {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn is_set(&self) -> bool {
        *self.sender.borrow()
    }

    /// Set the flag. Returns true only for the call that flipped it.
    pub fn mark(&self) -> bool {
        let flipped = self.sender.send_if_modified(|bootstrapped| {
            if *bootstrapped {
                return false;
            }
            *bootstrapped = true;
            true
        });
        if flipped {
            info!("Node bootstrapped");
        }
        flipped
    }

    /// Resolves once the flag is set; returns immediately if it already is.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as self, so the channel cannot close here
        let _ = receiver.wait_for(|bootstrapped| *bootstrapped).await;
    }
}
