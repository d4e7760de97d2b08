/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use mio::event::Source;
use mio::net::UdpSocket as MioUdpSocket;

use log::debug;

use crate::{ByteBuffer, Interest, Result};
use crate::channel::{sealed, SelectableChannel, ReadableByteChannel, WritableByteChannel, ReadStatus};
use crate::channel::common::ChannelCore;
use crate::key::Registration;

/// A datagram socket
///
/// Every [`send()`](DatagramChannel::send) names its destination and every
/// [`receive()`](DatagramChannel::receive) reports the sender. Once
/// [`connect()`](DatagramChannel::connect)ed, the channel can also be used
/// through [`ReadableByteChannel`] and [`WritableByteChannel`].
///
/// Datagrams are never split: a send either transfers the whole readable
/// region of the buffer or nothing, and a datagram larger than the free space
/// of the receiving buffer is truncated.
#[derive(Debug)]
pub struct DatagramChannel {
    core: ChannelCore<MioUdpSocket>,
}

impl DatagramChannel {
    /// Opens a datagram socket on an ephemeral local port.
    pub fn open() -> Result<Self> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }

    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = MioUdpSocket::bind(addr)?;
        debug!("Datagram socket bound to {:?}", socket.local_addr());
        Ok(Self {
            core: ChannelCore::new(socket, "datagram"),
        })
    }

    /// Sends the readable region of `src` to `target`. Returns the number of
    /// bytes sent, which is zero if the socket can not take the datagram now.
    pub fn send(&mut self, src: &mut ByteBuffer, target: SocketAddr) -> Result<usize> {
        self.core.io()?;
        let data = src.readable();
        let sent = self.core.drive(Interest::WRITABLE, |socket| socket.send_to(data, target))?.unwrap_or(0);
        src.advance(sent)?;
        Ok(sent)
    }

    /// Receives one datagram into `dst`. Returns the sender, or `None` if no
    /// datagram is waiting.
    pub fn receive(&mut self, dst: &mut ByteBuffer) -> Result<Option<SocketAddr>> {
        self.core.io()?;
        let space = dst.writable()?;
        match self.core.drive(Interest::READABLE, |socket| socket.recv_from(&mut space[..]))? {
            Some((count, peer)) => {
                dst.advance(count)?;
                Ok(Some(peer))
            },
            None => Ok(None),
        }
    }

    /// Restricts the socket to a single peer.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        Ok(self.core.io()?.connect(addr)?)
    }

    pub fn is_connected(&self) -> bool {
        self.peer_addr().is_ok()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.core.io()?.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.core.io()?.peer_addr()?)
    }

    /// Bounds how long blocking-mode operations wait; `None` waits forever.
    pub fn set_blocking_timeout(&mut self, timeout: Option<Duration>) {
        self.core.set_timeout(timeout);
    }
}

impl ReadableByteChannel for DatagramChannel {
    fn read(&mut self, dst: &mut ByteBuffer) -> Result<ReadStatus> {
        self.core.io()?;
        if !dst.has_remaining() {
            return Ok(ReadStatus::Read(0));
        }
        let space = dst.writable()?;
        let count = self.core.drive(Interest::READABLE, |socket| socket.recv(&mut space[..]))?.unwrap_or(0);
        dst.advance(count)?;
        Ok(ReadStatus::Read(count))
    }
}

impl WritableByteChannel for DatagramChannel {
    fn write(&mut self, src: &mut ByteBuffer) -> Result<usize> {
        self.core.io()?;
        let data = src.readable();
        let sent = self.core.drive(Interest::WRITABLE, |socket| socket.send(data))?.unwrap_or(0);
        src.advance(sent)?;
        Ok(sent)
    }
}

impl sealed::Sealed for DatagramChannel {
    fn parts(&mut self) -> Result<(&mut dyn Source, &mut Option<Registration>)> {
        self.core.parts()
    }

    fn registration(&self) -> Option<&Registration> {
        self.core.registration()
    }
}

impl SelectableChannel for DatagramChannel {
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
        Interest::READABLE | Interest::WRITABLE
    }
}
