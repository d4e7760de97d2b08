/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::time::Duration;

use mio::event::Source;
use mio::unix::pipe::{self, Receiver, Sender};

use log::debug;

use crate::{ByteBuffer, Interest, Result};
use crate::channel::{sealed, SelectableChannel, ReadableByteChannel, WritableByteChannel, ReadStatus};
use crate::channel::common::ChannelCore;
use crate::key::Registration;

/// Opens a unidirectional in-process pipe
///
/// Bytes written to the [`PipeSink`] come out of the [`PipeSource`] in the same
/// order. Both ends start in blocking mode and can be moved to different
/// threads, or switched to non-blocking mode and registered with a
/// [`Selector`](crate::Selector) like any other channel.
pub fn pipe() -> Result<(PipeSink, PipeSource)> {
    let (sender, receiver) = pipe::new()?;
    debug!("Opened pipe");
    Ok((
        PipeSink { core: ChannelCore::new(sender, "pipe sink") },
        PipeSource { core: ChannelCore::new(receiver, "pipe source") },
    ))
}

/// The writing end of a [`pipe()`]
#[derive(Debug)]
pub struct PipeSink {
    core: ChannelCore<Sender>,
}

/// The reading end of a [`pipe()`]
///
/// Reports [`ReadStatus::EndOfStream`] once, after the sink has been closed
/// and everything written to it has been read.
#[derive(Debug)]
pub struct PipeSource {
    core: ChannelCore<Receiver>,
}

impl PipeSink {
    pub fn set_blocking_timeout(&mut self, timeout: Option<Duration>) {
        self.core.set_timeout(timeout);
    }
}

impl PipeSource {
    pub fn set_blocking_timeout(&mut self, timeout: Option<Duration>) {
        self.core.set_timeout(timeout);
    }
}

impl WritableByteChannel for PipeSink {
    fn write(&mut self, src: &mut ByteBuffer) -> Result<usize> {
        self.core.write_stream(src)
    }
}

impl ReadableByteChannel for PipeSource {
    fn read(&mut self, dst: &mut ByteBuffer) -> Result<ReadStatus> {
        self.core.read_stream(dst)
    }
}

impl sealed::Sealed for PipeSink {
    fn parts(&mut self) -> Result<(&mut dyn Source, &mut Option<Registration>)> {
        self.core.parts()
    }

    fn registration(&self) -> Option<&Registration> {
        self.core.registration()
    }
}

impl sealed::Sealed for PipeSource {
    fn parts(&mut self) -> Result<(&mut dyn Source, &mut Option<Registration>)> {
        self.core.parts()
    }

    fn registration(&self) -> Option<&Registration> {
        self.core.registration()
    }
}

impl SelectableChannel for PipeSink {
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
        Interest::WRITABLE
    }
}

impl SelectableChannel for PipeSource {
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
        Interest::READABLE
    }
}
