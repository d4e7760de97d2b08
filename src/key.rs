/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crossbeam_channel::Sender;
use mio::{Registry, Token};
use mio::event::Source;

use log::{debug, warn};

use crate::Interest;
use crate::error::Result;

/// Identifies one registration of a channel with a
/// [`Selector`](crate::Selector)
///
/// Keys are cheap handles; the interest set and the attachment live in the
/// selector and are looked up through it. A key stays meaningful until it is
/// cancelled, either through [`Selector::cancel()`](crate::Selector::cancel),
/// [`SelectableChannel::cancel()`](crate::SelectableChannel::cancel) or by
/// closing the channel. Tokens are never reused by a selector, so a stale key
/// can not alias a newer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectionKey {
    pub(crate) selector: usize,
    pub(crate) token: Token,
}

impl SelectionKey {
    pub fn token(&self) -> usize {
        self.token.0
    }
}

/// A key taken out of the ready set, together with the operations that were
/// ready when the selector was polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedKey {
    pub key: SelectionKey,
    pub ready: Interest,
}

impl SelectedKey {
    pub fn is_acceptable(&self) -> bool {
        self.ready.is_acceptable()
    }

    pub fn is_readable(&self) -> bool {
        self.ready.is_readable()
    }

    pub fn is_writable(&self) -> bool {
        self.ready.is_writable()
    }

    pub fn is_connectable(&self) -> bool {
        self.ready.is_connectable()
    }
}

/// State shared between a selector entry and the registered channel.
///
/// `readiness` caches what the OS reported; the selector sets bits from
/// events, the channel clears them when an operation would block. This is
/// what turns mio's edge-triggered notifications into level-triggered keys.
#[derive(Debug)]
pub(crate) struct KeyState {
    pub(crate) key: SelectionKey,
    interest: AtomicU8,
    readiness: AtomicU8,
    cancelled: AtomicBool,
}

impl KeyState {
    pub fn new(key: SelectionKey) -> Self {
        Self {
            key,
            interest: AtomicU8::new(0),
            readiness: AtomicU8::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn interest(&self) -> Interest {
        Interest::from_bits(self.interest.load(Ordering::Acquire))
    }

    pub fn set_interest(&self, interest: Interest) {
        self.interest.store(interest.bits(), Ordering::Release);
    }

    pub fn mark_ready(&self, ready: Interest) {
        self.readiness.fetch_or(ready.bits(), Ordering::AcqRel);
    }

    pub fn clear_ready(&self, ready: Interest) {
        self.readiness.fetch_and(!ready.bits(), Ordering::AcqRel);
    }

    /// Ready operations the owner is currently interested in.
    pub fn ready(&self) -> Interest {
        if self.is_cancelled() {
            return Interest::NONE;
        }
        Interest::from_bits(self.readiness.load(Ordering::Acquire)) & self.interest()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The channel-side half of a registration.
///
/// Holds what a channel needs to change its OS registration without going
/// through the selector: a clone of the selector's registry and a queue on
/// which cancelled tokens are handed back.
#[derive(Debug)]
pub struct Registration {
    state: Arc<KeyState>,
    registry: Arc<Registry>,
    cancelled: Sender<Token>,
    armed: bool,
}

impl Registration {
    pub(crate) fn new(state: Arc<KeyState>, registry: Arc<Registry>, cancelled: Sender<Token>) -> Self {
        Self {
            state,
            registry,
            cancelled,
            armed: false,
        }
    }

    pub(crate) fn key(&self) -> SelectionKey {
        self.state.key
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.state.is_cancelled()
    }

    /// Applies a new interest set. An empty set parks the OS registration
    /// while keeping the key.
    pub(crate) fn update<S>(&mut self, source: &mut S, interest: Interest) -> Result<()>
    where
        S: Source + ?Sized,
    {
        let token = self.state.key.token;
        match (self.armed, interest.to_mio()) {
            (false, Some(mio_interest)) => {
                self.registry.register(source, token, mio_interest)?;
                self.armed = true;
            },
            (true, Some(mio_interest)) => self.registry.reregister(source, token, mio_interest)?,
            (true, None) => {
                self.registry.deregister(source)?;
                self.armed = false;
            },
            (false, None) => (),
        }
        self.state.set_interest(interest);
        Ok(())
    }

    /// Forgets cached readiness after an operation reported "would block".
    pub(crate) fn would_block(&self, ready: Interest) {
        self.state.clear_ready(ready);
    }

    /// Deregisters from the OS and hands the token back to the selector.
    pub(crate) fn release<S>(mut self, source: &mut S)
    where
        S: Source + ?Sized,
    {
        if self.armed {
            if let Err(error) = self.registry.deregister(source) {
                warn!("Failed to de-register: {:?}", error);
            }
            self.armed = false;
        }
        if !self.state.is_cancelled() {
            self.state.cancel();
            debug!("Cancelled {:?}", self.state.key.token);
            let _ = self.cancelled.send(self.state.key.token);
        }
    }
}
