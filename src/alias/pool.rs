use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

/// Fixed array of task slots filled round-robin.
///
/// Submitting into an occupied slot first waits for its previous task, so at
/// most `width` tasks run at once and each slot runs its tasks in order.
pub struct SlotPool {
    slots: Vec<Option<JoinHandle<()>>>,
    next: usize,
}

impl SlotPool {
    pub fn new(width: usize) -> Self {
        let mut slots = Vec::with_capacity(width.max(1));
        slots.resize_with(width.max(1), || None);
        Self { slots, next: 0 }
    }

    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Run the task built by `make` in the next slot. `make` receives the slot index.
    pub async fn submit<M, F>(&mut self, make: M)
    where
        M: FnOnce(usize) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.next;
        self.next = (self.next + 1) % self.slots.len();

        if let Some(previous) = self.slots[slot].take() {
            join(previous, slot).await;
        }
        self.slots[slot] = Some(tokio::spawn(make(slot)));
    }

    /// Wait for every running task; the pool can be reused afterwards
    pub async fn drain(&mut self) {
        for (slot, handle) in self.slots.iter_mut().enumerate() {
            if let Some(handle) = handle.take() {
                join(handle, slot).await;
            }
        }
        self.next = 0;
    }
}

async fn join(handle: JoinHandle<()>, slot: usize) {
    if let Err(e) = handle.await {
        warn!("Probe task in slot {} failed: {}", slot, e);
    }
}
