/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::net::SocketAddr;
use std::time::Duration;

use mio::event::Source;
use mio::net::TcpListener as MioTcpListener;

use log::debug;

use crate::{Interest, Result, StreamChannel};
use crate::channel::{sealed, SelectableChannel};
use crate::channel::common::ChannelCore;
use crate::key::Registration;

const ACCEPT_READY: Interest = Interest::ACCEPTABLE.add(Interest::READABLE);

/// A listening stream socket that hands out incoming connections as
/// [`StreamChannel`](crate::StreamChannel)s
///
/// The channel starts out in *blocking* mode, where
/// [`accept()`](ListeningChannel::accept) waits for the next connection. After
/// [`configure_blocking(false)`](SelectableChannel::configure_blocking) it
/// returns `Ok(None)` when no connection is pending and may be registered with
/// a [`Selector`](crate::Selector) for [`Interest::ACCEPTABLE`].
#[derive(Debug)]
pub struct ListeningChannel {
    core: ChannelCore<MioTcpListener>,
}

impl ListeningChannel {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = MioTcpListener::bind(addr)?;
        debug!("Listening on {:?}", listener.local_addr());
        Ok(Self {
            core: ChannelCore::new(listener, "listening"),
        })
    }

    /// Takes the next pending connection. Accepted channels start in
    /// blocking mode.
    ///
    /// A failed accept (for example when the process runs out of file
    /// descriptors) also forgets the cached readiness, so the listener is
    /// selected again only after the next incoming connection.
    pub fn accept(&mut self) -> Result<Option<StreamChannel>> {
        let accepted = match self.core.drive(ACCEPT_READY, |listener| listener.accept()) {
            Ok(accepted) => accepted,
            Err(error) => {
                self.core.forget_ready(ACCEPT_READY);
                return Err(error);
            },
        };
        Ok(accepted.map(|(stream, peer)| {
            debug!("Accepted connection from {:?}", peer);
            StreamChannel::accepted(stream)
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.core.io()?.local_addr()?)
    }

    /// Bounds how long blocking-mode operations wait; `None` waits forever.
    pub fn set_blocking_timeout(&mut self, timeout: Option<Duration>) {
        self.core.set_timeout(timeout);
    }
}

impl sealed::Sealed for ListeningChannel {
    fn parts(&mut self) -> Result<(&mut dyn Source, &mut Option<Registration>)> {
        self.core.parts()
    }

    fn registration(&self) -> Option<&Registration> {
        self.core.registration()
    }
}

impl SelectableChannel for ListeningChannel {
    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn close(&mut self) {
        self.core.close()
    }

    fn is_blocking(&self) -> bool {
        self.core.is_blocking()
    }

    fn configure_blocking(&mut self, block: bool) -> Result<()> {
        self.core.configure_blocking(block)
    }

    fn valid_interest(&self) -> Interest {
        Interest::ACCEPTABLE
    }
}
