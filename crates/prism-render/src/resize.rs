// SPDX-License-Identifier: CEPL-1.0
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-producer/single-consumer "framebuffer changed" flag.
///
/// The window callback raises it; the frame driver reads and clears it once per
/// frame after presenting.
#[derive(Clone, Debug, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns whether the flag was set, clearing it.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears() {
        let flag = ResizeFlag::new();
        assert!(!flag.take());
        flag.raise();
        assert!(flag.is_raised());
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn clones_share_state() {
        let producer = ResizeFlag::new();
        let consumer = producer.clone();
        producer.raise();
        producer.raise();
        assert!(consumer.take());
        assert!(!producer.is_raised());
    }

    #[test]
    fn raised_from_another_thread() {
        let flag = ResizeFlag::new();
        let remote = flag.clone();
        std::thread::spawn(move || remote.raise()).join().unwrap();
        assert!(flag.take());
    }
}
