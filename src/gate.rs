use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-flight admission control for the inference path. A frame that
/// arrives while another is in flight is dropped, never queued, so backlog
/// can never build behind a slow model.
#[derive(Debug, Default)]
pub struct InferenceGate {
    busy: AtomicBool,
}

impl InferenceGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Try to claim the gate. Returns a permit that releases it on drop, or
    /// None when an earlier admission is still in flight.
    pub fn try_enter(self: &Arc<Self>) -> Option<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit {
                gate: Arc::clone(self),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Scoped admission token. Dropping it reopens the gate, so release happens
/// exactly once on every exit path of the guarded work.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<InferenceGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn second_entry_denied_while_held() {
        let gate = InferenceGate::new();
        let permit = gate.try_enter().expect("first entry admitted");
        assert!(gate.try_enter().is_none());
        assert!(gate.is_busy());
        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_enter().is_some());
    }

    #[test]
    fn permit_releases_on_early_exit() {
        let gate = InferenceGate::new();
        let attempt = || -> Result<(), ()> {
            let _permit = gate.try_enter().ok_or(())?;
            Err(())
        };
        assert!(attempt().is_err());
        assert!(!gate.is_busy());
    }

    #[test]
    fn at_most_one_holder_under_contention() {
        let gate = InferenceGate::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(_permit) = gate.try_enter() {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            active.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
