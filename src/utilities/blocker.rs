/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::io::ErrorKind;

use mio::{Poll, Events, Token, Interest};
use mio::event::Source;

use log::warn;

use crate::error::{NioError, Result};
use crate::utilities::Timeout;

const CHANNEL: Token = Token(0);

/// Private poll context that lets a channel in blocking mode wait for its own
/// readiness. The channel's source is registered lazily and must be released
/// before the channel may join a [`Selector`](crate::Selector).
#[derive(Debug)]
pub(crate) struct Blocker {
    poll: Poll,
    events: Events,
    armed: bool,
}

impl Blocker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
            armed: false,
        })
    }

    pub fn wait<S>(&mut self, source: &mut S, interest: Interest, timeout: &Timeout) -> Result<()>
    where
        S: Source + ?Sized,
    {
        match self.armed {
            true => self.poll.registry().reregister(source, CHANNEL, interest)?,
            false => self.poll.registry().register(source, CHANNEL, interest)?,
        }
        self.armed = true;

        loop {
            match self.poll.poll(&mut self.events, timeout.remaining_time()) {
                Ok(_) => {
                    if self.events.iter().any(|event| event.token() == CHANNEL) {
                        return Ok(());
                    }
                },
                Err(error) if error.kind() == ErrorKind::Interrupted => (),
                Err(error) => return Err(NioError::PollFailure(error)),
            }
            if timeout.expired() {
                return Err(NioError::TimedOut);
            }
        }
    }

    pub fn release<S>(&mut self, source: &mut S)
    where
        S: Source + ?Sized,
    {
        if self.armed {
            if let Err(error) = self.poll.registry().deregister(source) {
                warn!("Failed to de-register: {:?}", error);
            }
            self.armed = false;
        }
    }
}
