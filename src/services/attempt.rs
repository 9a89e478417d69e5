//! Generation guard for async work tied to one controller.
//!
//! Every checkout attempt, poll cycle or order fetch takes an
//! [`AttemptToken`] from its owner's [`Generation`]. Starting a new cycle or
//! tearing the owner down bumps the generation, after which older tokens
//! report `is_current() == false` and their `cancelled()` future resolves.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Generation {
    tx: Arc<watch::Sender<u64>>,
}

impl Generation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Generation { tx: Arc::new(tx) }
    }

    /// Starts a new cycle, invalidating every token handed out before.
    pub fn begin(&self) -> AttemptToken {
        let mut id = 0;
        self.tx.send_modify(|current| {
            *current += 1;
            id = *current;
        });
        AttemptToken {
            id,
            rx: self.tx.subscribe(),
        }
    }

    /// Invalidates the current cycle without starting another one.
    pub fn invalidate(&self) {
        self.tx.send_modify(|current| *current += 1);
    }

    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AttemptToken {
    id: u64,
    rx: watch::Receiver<u64>,
}

impl AttemptToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        *self.rx.borrow() == self.id
    }

    /// Resolves once this token is no longer current. A dropped owner counts
    /// as cancellation.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() != self.id {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
