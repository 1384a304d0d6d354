//! Composite wait primitive.
//!
//! An `EventGate` aggregates independent named signals into one waitable
//! unit: `wait` blocks until at least one constituent signal is active, and
//! the waiter tests the individual signals to see which fired. The aggregate
//! state is a bitmask behind a watch channel, so setting or clearing a
//! signal is atomic with respect to waiters and a signal set before `wait`
//! is never missed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

struct GateInner {
    bits: watch::Sender<u32>,
}

/// Aggregate of up to 32 signals
pub struct EventGate {
    inner: Arc<GateInner>,
    allocated: u32,
}

/// One constituent signal of an [`EventGate`]
#[derive(Clone)]
pub struct Signal {
    inner: Arc<GateInner>,
    mask: u32,
}

impl EventGate {
    pub fn new() -> Self {
        let (bits, _) = watch::channel(0u32);
        Self {
            inner: Arc::new(GateInner { bits }),
            allocated: 0,
        }
    }

    /// Allocate the next constituent signal
    pub fn signal(&mut self) -> Signal {
        assert!(self.allocated < 32, "gate supports at most 32 signals");
        let mask = 1 << self.allocated;
        self.allocated += 1;
        Signal {
            inner: self.inner.clone(),
            mask,
        }
    }

    /// Block until at least one signal is active; returns the active bitmask
    pub async fn wait(&self) -> u32 {
        let mut rx = self.inner.bits.subscribe();
        let active = match rx.wait_for(|bits| *bits != 0).await {
            Ok(bits) => *bits,
            // Unreachable while the gate holds the sender
            Err(_) => 0,
        };
        active
    }

    /// Like [`wait`](Self::wait) with a deadline; returns 0 on timeout
    pub async fn wait_timeout(&self, dur: Duration) -> u32 {
        tokio::time::timeout(dur, self.wait()).await.unwrap_or(0)
    }
}

impl Default for EventGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Activate this signal, waking gate waiters
    pub fn set(&self) {
        self.inner.bits.send_modify(|bits| *bits |= self.mask);
    }

    /// Deactivate this signal
    pub fn clear(&self) {
        self.inner.bits.send_modify(|bits| *bits &= !self.mask);
    }

    pub fn is_set(&self) -> bool {
        *self.inner.bits.borrow() & self.mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_for_either_signal() {
        let mut gate = EventGate::new();
        let stop = gate.signal();
        let collect = gate.signal();

        collect.set();
        let fired = gate.wait().await;
        assert_ne!(fired, 0);
        assert!(collect.is_set());
        assert!(!stop.is_set());

        collect.clear();
        stop.set();
        gate.wait().await;
        assert!(stop.is_set());
    }

    #[tokio::test]
    async fn test_signal_set_before_wait_is_not_missed() {
        let mut gate = EventGate::new();
        let signal = gate.signal();

        signal.set();
        // Must return immediately even though set preceded the wait
        let fired = gate.wait_timeout(Duration::from_millis(50)).await;
        assert_ne!(fired, 0);
    }

    #[tokio::test]
    async fn test_wait_timeout_elapses_when_inactive() {
        let mut gate = EventGate::new();
        let _signal = gate.signal();

        let fired = gate.wait_timeout(Duration::from_millis(20)).await;
        assert_eq!(fired, 0);
    }

    #[tokio::test]
    async fn test_wait_blocks_until_set_from_another_task() {
        let mut gate = EventGate::new();
        let signal = gate.signal();

        let setter = tokio::spawn({
            let signal = signal.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                signal.set();
            }
        });

        let fired = gate.wait().await;
        assert_ne!(fired, 0);
        setter.await.unwrap();
    }

    #[tokio::test]
    async fn test_clearing_one_signal_keeps_gate_active_for_other() {
        let mut gate = EventGate::new();
        let a = gate.signal();
        let b = gate.signal();

        a.set();
        b.set();
        a.clear();

        let fired = gate.wait_timeout(Duration::from_millis(50)).await;
        assert_ne!(fired, 0);
        assert!(b.is_set());
    }
}
