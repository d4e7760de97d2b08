/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */

//! Channel kinds and the capabilities they share.

mod common;
mod datagram;
mod file;
mod listener;
#[cfg(unix)]
mod pipe;
mod stream;

pub use datagram::DatagramChannel;
pub use file::{FileChannel, MapMode};
pub use listener::ListeningChannel;
#[cfg(unix)]
pub use pipe::{pipe, PipeSink, PipeSource};
pub use stream::StreamChannel;

use std::net::SocketAddr;

use mio::event::Source;

use crate::{ByteBuffer, Interest, NioError, RegistrationError, Result};
use crate::key::{Registration, SelectionKey};

/// Outcome of a read
///
/// `Read(0)` means that nothing could be read *right now* (or that the buffer
/// had no room left), which is not an error. `EndOfStream` means that the
/// peer will never send anything again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Read(usize),
    EndOfStream,
}

impl ReadStatus {
    pub fn count(&self) -> usize {
        match self {
            Self::Read(count) => *count,
            Self::EndOfStream => 0,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// A channel that can be read into a [`ByteBuffer`]
///
/// Bytes are stored starting at the buffer's position, at most up to its
/// limit; the position is advanced by the number of bytes read.
pub trait ReadableByteChannel {
    fn read(&mut self, dst: &mut ByteBuffer) -> Result<ReadStatus>;
}

/// A channel that can be written from a [`ByteBuffer`]
///
/// Bytes are taken from the buffer's readable region; the position is
/// advanced by the number of bytes written, which may be less than what was
/// offered. The caller must keep the rest and retry later.
pub trait WritableByteChannel {
    fn write(&mut self, src: &mut ByteBuffer) -> Result<usize>;
}

/// Scattering read: fills a sequence of buffers, in order, in one operation.
pub trait ScatteringByteChannel: ReadableByteChannel {
    fn read_scattering(&mut self, dsts: &mut [ByteBuffer]) -> Result<ReadStatus>;
}

/// Gathering write: drains a sequence of buffers, in order, in one operation.
pub trait GatheringByteChannel: WritableByteChannel {
    fn write_gathering(&mut self, srcs: &mut [ByteBuffer]) -> Result<usize>;
}

pub(crate) mod sealed {
    use super::*;

    pub trait Sealed {
        fn parts(&mut self) -> Result<(&mut dyn Source, &mut Option<Registration>)>;
        fn registration(&self) -> Option<&Registration>;
    }
}

/// A channel that can take part in readiness selection
///
/// Selectable channels start in blocking mode and have to be switched to
/// non-blocking mode before they can be registered with a
/// [`Selector`](crate::Selector). Closing a registered channel implicitly
/// cancels its key before the selector polls again.
pub trait SelectableChannel: sealed::Sealed {
    fn is_open(&self) -> bool;

    /// Releases the OS handle. Calling it again has no effect.
    fn close(&mut self);

    fn is_blocking(&self) -> bool;

    /// Blocking mode can not be entered while registered.
    fn configure_blocking(&mut self, block: bool) -> Result<()>;

    /// The operations this kind of channel supports.
    fn valid_interest(&self) -> Interest;

    fn is_registered(&self) -> bool {
        self.registration().map_or(false, Registration::is_live)
    }

    fn key(&self) -> Option<SelectionKey> {
        self.registration().filter(|registration| registration.is_live()).map(Registration::key)
    }

    /// Replaces the interest set; takes effect on the next poll.
    fn set_interest(&mut self, interest: Interest) -> Result<()> {
        if !self.valid_interest().contains(interest) {
            return Err(RegistrationError::InvalidInterest.into());
        }
        match self.parts()? {
            (source, Some(registration)) if registration.is_live() => registration.update(source, interest),
            _ => Err(RegistrationError::NotRegistered.into()),
        }
    }

    /// Cancels the registration, if any. Calling it again has no effect.
    fn cancel(&mut self) {
        if let Ok((source, registration)) = self.parts() {
            if let Some(registration) = registration.take() {
                registration.release(source);
            }
        }
    }
}

/// Any selectable channel, as one type
///
/// Lets a [`Selector`](crate::Selector) or an
/// [`EventLoop`](crate::EventLoop) keep heterogeneous channels together and
/// dispatch on the kind of endpoint.
#[derive(Debug)]
pub enum Channel {
    Listening(ListeningChannel),
    Stream(StreamChannel),
    Datagram(DatagramChannel),
    #[cfg(unix)]
    PipeSource(PipeSource),
    #[cfg(unix)]
    PipeSink(PipeSink),
}

macro_rules! each_channel {
    ($channel:expr, $inner:ident => $body:expr) => {
        match $channel {
            Channel::Listening($inner) => $body,
            Channel::Stream($inner) => $body,
            Channel::Datagram($inner) => $body,
            #[cfg(unix)]
            Channel::PipeSource($inner) => $body,
            #[cfg(unix)]
            Channel::PipeSink($inner) => $body,
        }
    };
}

impl Channel {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Listening(channel) => channel.local_addr().ok(),
            Self::Stream(channel) => channel.local_addr().ok(),
            Self::Datagram(channel) => channel.local_addr().ok(),
            #[cfg(unix)]
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Listening(_) => "listening",
            Self::Stream(_) => "stream",
            Self::Datagram(_) => "datagram",
            #[cfg(unix)]
            Self::PipeSource(_) => "pipe source",
            #[cfg(unix)]
            Self::PipeSink(_) => "pipe sink",
        }
    }
}

impl ReadableByteChannel for Channel {
    fn read(&mut self, dst: &mut ByteBuffer) -> Result<ReadStatus> {
        match self {
            Self::Stream(channel) => channel.read(dst),
            Self::Datagram(channel) => channel.read(dst),
            #[cfg(unix)]
            Self::PipeSource(channel) => channel.read(dst),
            _ => Err(NioError::Registration(RegistrationError::InvalidInterest)),
        }
    }
}

impl WritableByteChannel for Channel {
    fn write(&mut self, src: &mut ByteBuffer) -> Result<usize> {
        match self {
            Self::Stream(channel) => channel.write(src),
            Self::Datagram(channel) => channel.write(src),
            #[cfg(unix)]
            Self::PipeSink(channel) => channel.write(src),
            _ => Err(NioError::Registration(RegistrationError::InvalidInterest)),
        }
    }
}

impl sealed::Sealed for Channel {
    fn parts(&mut self) -> Result<(&mut dyn Source, &mut Option<Registration>)> {
        each_channel!(self, channel => channel.parts())
    }

    fn registration(&self) -> Option<&Registration> {
        each_channel!(self, channel => channel.registration())
    }
}

impl SelectableChannel for Channel {
    fn is_open(&self) -> bool {
        each_channel!(self, channel => channel.is_open())
    }

    fn close(&mut self) {
        each_channel!(self, channel => channel.close())
    }

    fn is_blocking(&self) -> bool {
        each_channel!(self, channel => channel.is_blocking())
    }

    fn configure_blocking(&mut self, block: bool) -> Result<()> {
        each_channel!(self, channel => channel.configure_blocking(block))
    }

    fn valid_interest(&self) -> Interest {
        each_channel!(self, channel => channel.valid_interest())
    }
}

impl From<ListeningChannel> for Channel {
    fn from(channel: ListeningChannel) -> Self {
        Self::Listening(channel)
    }
}

impl From<StreamChannel> for Channel {
    fn from(channel: StreamChannel) -> Self {
        Self::Stream(channel)
    }
}

impl From<DatagramChannel> for Channel {
    fn from(channel: DatagramChannel) -> Self {
        Self::Datagram(channel)
    }
}

#[cfg(unix)]
impl From<PipeSource> for Channel {
    fn from(channel: PipeSource) -> Self {
        Self::PipeSource(channel)
    }
}

#[cfg(unix)]
impl From<PipeSink> for Channel {
    fn from(channel: PipeSink) -> Self {
        Self::PipeSink(channel)
    }
}
