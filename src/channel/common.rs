/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Read, Write, IoSlice, IoSliceMut, ErrorKind, Result as IoResult};
use std::time::Duration;

use mio::event::Source;

use log::debug;

use crate::{ByteBuffer, Interest, NioError, RegistrationError, Result};
use crate::channel::ReadStatus;
use crate::key::Registration;
use crate::utilities::{Blocker, Timeout};

/// State every selectable channel carries: the OS handle (`None` once
/// closed), the selector registration, and the blocking-mode machinery.
#[derive(Debug)]
pub(crate) struct ChannelCore<S: Source> {
    io: Option<S>,
    registration: Option<Registration>,
    blocking: bool,
    blocker: Option<Blocker>,
    timeout: Option<Duration>,
    input_done: bool,
    kind: &'static str,
}

impl<S: Source> ChannelCore<S> {
    pub fn new(io: S, kind: &'static str) -> Self {
        Self {
            io: Some(io),
            registration: None,
            blocking: true,
            blocker: None,
            timeout: None,
            input_done: false,
            kind,
        }
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    pub fn io(&self) -> Result<&S> {
        self.io.as_ref().ok_or(NioError::ClosedChannel)
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn configure_blocking(&mut self, block: bool) -> Result<()> {
        let io = self.io.as_mut().ok_or(NioError::ClosedChannel)?;
        if block {
            if self.registration.as_ref().map_or(false, Registration::is_live) {
                return Err(RegistrationError::Blocking.into());
            }
            if let Some(stale) = self.registration.take() {
                stale.release(io);
            }
        } else if let Some(mut blocker) = self.blocker.take() {
            blocker.release(io);
        }
        self.blocking = block;
        Ok(())
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    pub fn parts(&mut self) -> Result<(&mut dyn Source, &mut Option<Registration>)> {
        match self.io.as_mut() {
            Some(io) => {
                let source: &mut dyn Source = io;
                Ok((source, &mut self.registration))
            },
            None => Err(NioError::ClosedChannel),
        }
    }

    pub fn close(&mut self) {
        if let Some(mut io) = self.io.take() {
            if let Some(registration) = self.registration.take() {
                registration.release(&mut io);
            }
            if let Some(mut blocker) = self.blocker.take() {
                blocker.release(&mut io);
            }
            debug!("Closed {} channel", self.kind);
        }
    }

    /// Drops cached readiness of a registered channel.
    pub fn forget_ready(&self, ready: Interest) {
        if let Some(registration) = &self.registration {
            registration.would_block(ready);
        }
    }

    /// Runs `op` until it completes. Non-blocking channels give up on
    /// "would block" (returning `None`) and forget the cached `ready` bits;
    /// blocking channels wait on their private poll and retry.
    pub fn drive<T, F>(&mut self, ready: Interest, mut op: F) -> Result<Option<T>>
    where
        F: FnMut(&mut S) -> IoResult<T>,
    {
        let timeout = Timeout::start(self.timeout);

        loop {
            let io = self.io.as_mut().ok_or(NioError::ClosedChannel)?;
            match op(io) {
                Ok(value) => return Ok(Some(value)),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock => {
                        if !self.blocking {
                            self.forget_ready(ready);
                            return Ok(None);
                        }
                        if self.blocker.is_none() {
                            self.blocker = Some(Blocker::new()?);
                        }
                        if let Some(blocker) = self.blocker.as_mut() {
                            let interest = ready.to_mio().unwrap_or(mio::Interest::READABLE);
                            blocker.wait(io, interest, &timeout)?;
                        }
                    },
                    _ => return Err(error.into()),
                },
            }
        }
    }

    /// Latches the input side once end-of-stream has been reported.
    fn check_input(&self) -> Result<()> {
        match self.input_done || self.io.is_none() {
            true => Err(NioError::ClosedChannel),
            false => Ok(()),
        }
    }

    pub fn end_input(&mut self) {
        self.input_done = true;
    }
}

impl<S: Source + Read> ChannelCore<S> {
    pub fn read_stream(&mut self, dst: &mut ByteBuffer) -> Result<ReadStatus> {
        self.check_input()?;
        if !dst.has_remaining() {
            return Ok(ReadStatus::Read(0));
        }

        let space = dst.writable()?;
        let status = match self.drive(Interest::READABLE, |io| io.read(&mut space[..]))? {
            Some(0) => ReadStatus::EndOfStream,
            Some(count) => ReadStatus::Read(count),
            None => ReadStatus::Read(0),
        };
        self.account_read(dst, status)
    }

    pub fn read_stream_scattering(&mut self, dsts: &mut [ByteBuffer]) -> Result<ReadStatus> {
        self.check_input()?;
        if dsts.iter().all(|buffer| !buffer.has_remaining()) {
            return Ok(ReadStatus::Read(0));
        }

        let result = {
            let mut slices = dsts
                .iter_mut()
                .map(|buffer| buffer.writable().map(IoSliceMut::new))
                .collect::<Result<Vec<_>>>()?;
            self.drive(Interest::READABLE, |io| io.read_vectored(&mut slices))?
        };
        let status = match result {
            Some(0) => ReadStatus::EndOfStream,
            Some(count) => ReadStatus::Read(count),
            None => ReadStatus::Read(0),
        };
        if let ReadStatus::Read(count) = status {
            distribute(dsts, count)?;
        }
        self.account_read_status(status)
    }

    fn account_read(&mut self, dst: &mut ByteBuffer, status: ReadStatus) -> Result<ReadStatus> {
        if let ReadStatus::Read(count) = status {
            dst.advance(count)?;
        }
        self.account_read_status(status)
    }

    fn account_read_status(&mut self, status: ReadStatus) -> Result<ReadStatus> {
        if status.is_end_of_stream() {
            debug!("End of stream on {} channel", self.kind);
            self.end_input();
        }
        Ok(status)
    }
}

impl<S: Source + Write> ChannelCore<S> {
    pub fn write_stream(&mut self, src: &mut ByteBuffer) -> Result<usize> {
        self.io()?;
        if !src.has_remaining() {
            return Ok(0);
        }

        let data = src.readable();
        let written = self.drive(Interest::WRITABLE, |io| io.write(data))?.unwrap_or(0);
        src.advance(written)?;
        Ok(written)
    }

    pub fn write_stream_gathering(&mut self, srcs: &mut [ByteBuffer]) -> Result<usize> {
        self.io()?;
        if srcs.iter().all(|buffer| !buffer.has_remaining()) {
            return Ok(0);
        }

        let written = {
            let slices: Vec<IoSlice> = srcs.iter().map(|buffer| IoSlice::new(buffer.readable())).collect();
            self.drive(Interest::WRITABLE, |io| io.write_vectored(&slices))?.unwrap_or(0)
        };
        distribute(srcs, written)?;
        Ok(written)
    }
}

impl<S: Source> Drop for ChannelCore<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Advances a buffer sequence by `count` bytes, filling them front to back.
pub(crate) fn distribute(buffers: &mut [ByteBuffer], mut count: usize) -> Result<()> {
    for buffer in buffers.iter_mut() {
        if count == 0 {
            break;
        }
        let step = count.min(buffer.remaining());
        buffer.advance(step)?;
        count -= step;
    }
    Ok(())
}
