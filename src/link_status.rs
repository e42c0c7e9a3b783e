//! Packet counters of the two bridge endpoints.

use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub packets_received: u32,
    pub packets_sent: u32,
    pub packets_lost: u32,
    /// Radio status messages forwarded (ground station side)
    pub radio_status_sent: u32,
    /// Queue depth towards the peer (vehicle side)
    pub queue_status: u32,
}

/// Read side of a bridge endpoint's counters.
pub trait LinkStatusProvider: Send + Sync {
    fn status(&self) -> LinkStatus;
    fn reset(&self);
}

/// Counters shared between a bridge endpoint and the web interface.
#[derive(Clone, Default)]
pub struct SharedLinkStatus {
    inner: Arc<Mutex<LinkStatus>>,
}

impl SharedLinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate the counters, as the bridge endpoint does for every packet
    pub fn record(&self, update: impl FnOnce(&mut LinkStatus)) {
        update(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl LinkStatusProvider for SharedLinkStatus {
    fn status(&self) -> LinkStatus {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self) {
        self.record(|status| *status = LinkStatus::default());
    }
}
