/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Result, SelectorWaker};

/// A cross-thread boolean that wakes the owning selector when it is raised.
#[derive(Debug)]
pub(crate) struct Flag {
    waker: SelectorWaker,
    flag: AtomicBool,
}

impl Flag {
    pub fn new(waker: SelectorWaker) -> Self {
        Self {
            waker,
            flag: AtomicBool::new(false),
        }
    }

    pub fn raise(&self) -> Result<bool> {
        match self.flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => self.waker.wakeup().map(always),
            Err(_) => Ok(false)
        }
    }

    pub fn clear(&self) -> bool {
        self.flag.compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }

    pub fn check(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

fn always<T>(_: T) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Selector;

    #[test]
    fn test_raise_once() {
        let selector = Selector::<()>::new().unwrap();
        let flag = Flag::new(selector.waker());
        assert!(!flag.check());
        assert!(flag.raise().unwrap());
        assert!(!flag.raise().unwrap());
        assert!(flag.check());
        assert!(flag.clear());
        assert!(!flag.clear());
    }
}
