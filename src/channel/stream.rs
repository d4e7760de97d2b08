/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::{SocketAddr, Shutdown};
use std::time::Duration;

use mio::event::Source;
use mio::net::TcpStream as MioTcpStream;

use log::debug;

use crate::{ByteBuffer, Interest, Result};
use crate::channel::{sealed, SelectableChannel, ReadableByteChannel, WritableByteChannel};
use crate::channel::{ScatteringByteChannel, GatheringByteChannel, ReadStatus};
use crate::channel::common::ChannelCore;
use crate::key::Registration;

/// A connected (or connecting) stream socket
///
/// Obtained either from [`ListeningChannel::accept()`](crate::ListeningChannel::accept)
/// or by connecting to a remote address. Like every channel it starts in
/// *blocking* mode: [`connect()`](StreamChannel::connect) then waits until the
/// connection is established, and reads/writes wait for readiness.
///
/// In non-blocking mode [`read()`](ReadableByteChannel::read) returns
/// `ReadStatus::Read(0)` when no data is available and
/// [`write()`](WritableByteChannel::write) may transfer fewer bytes than
/// requested. After the peer has shut down its side, `read()` reports
/// [`ReadStatus::EndOfStream`] exactly once; later reads fail with
/// [`NioError::ClosedChannel`](crate::NioError::ClosedChannel).
#[derive(Debug)]
pub struct StreamChannel {
    core: ChannelCore<MioTcpStream>,
    connected: bool,
}

impl StreamChannel {
    pub(crate) fn accepted(stream: MioTcpStream) -> Self {
        Self {
            core: ChannelCore::new(stream, "stream"),
            connected: true,
        }
    }

    /// Connects and waits until the connection has been established.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_timeout(addr, None)
    }

    pub fn connect_timeout(addr: SocketAddr, timeout: Option<Duration>) -> Result<Self> {
        let mut channel = Self::pending(addr)?;
        channel.core.set_timeout(timeout);
        channel.finish_connect()?;
        channel.core.set_timeout(None);
        Ok(channel)
    }

    /// Starts connecting and returns at once, in non-blocking mode. Register
    /// for [`Interest::CONNECTABLE`] and call
    /// [`finish_connect()`](StreamChannel::finish_connect) when it fires.
    pub fn connect_nonblocking(addr: SocketAddr) -> Result<Self> {
        let mut channel = Self::pending(addr)?;
        channel.core.configure_blocking(false)?;
        Ok(channel)
    }

    fn pending(addr: SocketAddr) -> Result<Self> {
        let stream = MioTcpStream::connect(addr)?;
        debug!("Connecting to {:?}", addr);
        Ok(Self {
            core: ChannelCore::new(stream, "stream"),
            connected: false,
        })
    }

    /// Completes a pending connection. Returns `Ok(false)` while the
    /// connection is still in progress (non-blocking mode only).
    pub fn finish_connect(&mut self) -> Result<bool> {
        if self.connected {
            return Ok(true);
        }
        match self.core.drive(Interest::CONNECTABLE | Interest::WRITABLE, check_connected)? {
            Some(addr) => {
                debug!("Connected to {:?}", addr);
                self.connected = true;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.core.is_open()
    }

    pub fn is_connection_pending(&self) -> bool {
        !self.connected && self.core.is_open()
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.core.io()?.peer_addr()?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.core.io()?.local_addr()?)
    }

    /// Shuts down the write half; the peer will see end-of-stream.
    pub fn shutdown_output(&self) -> Result<()> {
        Ok(self.core.io()?.shutdown(Shutdown::Write)?)
    }

    pub fn shutdown_input(&self) -> Result<()> {
        Ok(self.core.io()?.shutdown(Shutdown::Read)?)
    }

    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        Ok(self.core.io()?.set_nodelay(nodelay)?)
    }

    /// Bounds how long blocking-mode operations wait; `None` waits forever.
    pub fn set_blocking_timeout(&mut self, timeout: Option<Duration>) {
        self.core.set_timeout(timeout);
    }
}

fn check_connected(stream: &mut MioTcpStream) -> IoResult<SocketAddr> {
    if let Some(error) = stream.take_error()? {
        return Err(error);
    }
    match stream.peer_addr() {
        Ok(addr) => Ok(addr),
        Err(error) => match error.kind() {
            ErrorKind::NotConnected => Err(IoError::from(ErrorKind::WouldBlock)),
            _ => Err(error),
        },
    }
}

impl ReadableByteChannel for StreamChannel {
    fn read(&mut self, dst: &mut ByteBuffer) -> Result<ReadStatus> {
        self.core.read_stream(dst)
    }
}

impl WritableByteChannel for StreamChannel {
    fn write(&mut self, src: &mut ByteBuffer) -> Result<usize> {
        self.core.write_stream(src)
    }
}

impl ScatteringByteChannel for StreamChannel {
    fn read_scattering(&mut self, dsts: &mut [ByteBuffer]) -> Result<ReadStatus> {
        self.core.read_stream_scattering(dsts)
    }
}

impl GatheringByteChannel for StreamChannel {
    fn write_gathering(&mut self, srcs: &mut [ByteBuffer]) -> Result<usize> {
        self.core.write_stream_gathering(srcs)
    }
}

impl sealed::Sealed for StreamChannel {
    fn parts(&mut self) -> Result<(&mut dyn Source, &mut Option<Registration>)> {
        self.core.parts()
    }

    fn registration(&self) -> Option<&Registration> {
        self.core.registration()
    }
}

impl SelectableChannel for StreamChannel {
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
        Interest::READABLE | Interest::WRITABLE | Interest::CONNECTABLE
    }
}
