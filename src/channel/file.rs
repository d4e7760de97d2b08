/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom, IoSlice, IoSliceMut, Error as IoError, ErrorKind};
use std::path::Path;

use memmap2::MmapOptions;

use log::debug;

use crate::{ByteBuffer, NioError, Result};
use crate::channel::{ReadableByteChannel, WritableByteChannel, ScatteringByteChannel, GatheringByteChannel, ReadStatus};
use crate::channel::common::distribute;

const TRANSFER_CHUNK: usize = 64 * 1024;

/// How [`FileChannel::map()`] maps a file region into memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Writes to the buffer are rejected.
    ReadOnly,
    /// Writes go through to the file (see [`ByteBuffer::force()`]).
    ReadWrite,
    /// Copy-on-write: changes stay private to the buffer.
    Private,
}

/// A channel over a regular file
///
/// File channels are always blocking and can **not** be registered with a
/// [`Selector`](crate::Selector); they exist so that file content can be moved
/// through the same buffer and channel contracts as sockets and pipes.
/// Relative reads and writes happen at the channel's position; the
/// `transfer_*` functions and [`map()`](FileChannel::map) work with explicit
/// file offsets and leave the position untouched.
#[derive(Debug)]
pub struct FileChannel {
    file: Option<File>,
}

impl FileChannel {
    pub fn open<P: AsRef<Path>>(path: P, options: &OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = options.open(path)?;
        debug!("Opened file channel for '{}'", path.display());
        Ok(Self::from(file))
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(NioError::ClosedChannel)
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed file channel");
        }
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    pub fn position(&self) -> Result<u64> {
        let mut file = self.file()?;
        Ok(file.stream_position()?)
    }

    pub fn set_position(&mut self, position: u64) -> Result<()> {
        let mut file = self.file()?;
        file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Cuts the file down to `size`; the position is clamped to the new end.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        let file = self.file()?;
        if size < file.metadata()?.len() {
            file.set_len(size)?;
        }
        if self.position()? > size {
            self.set_position(size)?;
        }
        Ok(())
    }

    /// Flushes file content (and metadata, if requested) to the device.
    pub fn force(&self, metadata: bool) -> Result<()> {
        let file = self.file()?;
        match metadata {
            true => file.sync_all()?,
            false => file.sync_data()?,
        }
        Ok(())
    }

    /// Moves up to `count` bytes starting at file offset `position` into
    /// `target`. Stops early when the target accepts fewer bytes than offered
    /// (e.g. a non-blocking socket with a full send buffer) and returns the
    /// number of bytes the target actually took.
    pub fn transfer_to<W>(&mut self, position: u64, count: u64, target: &mut W) -> Result<u64>
    where
        W: WritableByteChannel + ?Sized,
    {
        let size = self.size()?;
        if position >= size || count == 0 {
            return Ok(0);
        }
        let count = count.min(size - position);
        let mut buffer = ByteBuffer::allocate(chunk_size(count));
        let mut file = self.file()?;
        let saved = file.stream_position()?;
        file.seek(SeekFrom::Start(position))?;

        let result = (|| -> Result<u64> {
            let mut moved = 0u64;
            while moved < count {
                buffer.clear();
                buffer.set_limit(chunk_size(count - moved))?;
                let read = read_retrying(&mut file, buffer.writable()?)?;
                if read == 0 {
                    break;
                }
                buffer.advance(read)?;
                buffer.flip();
                let written = target.write(&mut buffer)?;
                moved += written as u64;
                if written < read {
                    break;
                }
            }
            Ok(moved)
        })();

        file.seek(SeekFrom::Start(saved))?;
        result
    }

    /// Reads up to `count` bytes from `src` and writes them at file offset
    /// `position`. Stops when the source has nothing more to give right now
    /// or reached its end. Nothing is transferred if `position` lies beyond
    /// the end of the file.
    pub fn transfer_from<R>(&mut self, src: &mut R, position: u64, count: u64) -> Result<u64>
    where
        R: ReadableByteChannel + ?Sized,
    {
        if position > self.size()? || count == 0 {
            return Ok(0);
        }
        let mut buffer = ByteBuffer::allocate(chunk_size(count));
        let mut file = self.file()?;
        let saved = file.stream_position()?;
        file.seek(SeekFrom::Start(position))?;

        let result = (|| -> Result<u64> {
            let mut moved = 0u64;
            while moved < count {
                buffer.clear();
                buffer.set_limit(chunk_size(count - moved))?;
                match src.read(&mut buffer)? {
                    ReadStatus::Read(0) | ReadStatus::EndOfStream => break,
                    ReadStatus::Read(_) => (),
                }
                buffer.flip();
                file.write_all(buffer.readable())?;
                moved += buffer.remaining() as u64;
            }
            Ok(moved)
        })();

        file.seek(SeekFrom::Start(saved))?;
        result
    }

    /// Maps `size` bytes starting at `position` into a direct buffer.
    /// Read-write mappings grow the file if it is too short.
    pub fn map(&self, mode: MapMode, position: u64, size: usize) -> Result<ByteBuffer> {
        let file = self.file()?;
        if size == 0 {
            return Ok(ByteBuffer::allocate(0));
        }
        let end = position.checked_add(size as u64).ok_or_else(|| {
            NioError::Io(IoError::new(ErrorKind::InvalidInput, "mapped region ends past the largest file offset"))
        })?;
        let mut options = MmapOptions::new();
        options.offset(position).len(size);

        // SAFETY: the mapping is backed by a file we hold open. As with any
        // file mapping, concurrent modification of the file by another process
        // is visible through the buffer; that is the documented contract of
        // mapped buffers.
        let buffer = match mode {
            MapMode::ReadOnly => ByteBuffer::from_mmap_read_only(unsafe { options.map(file)? }),
            MapMode::ReadWrite => {
                if file.metadata()?.len() < end {
                    file.set_len(end)?;
                }
                ByteBuffer::from_mmap(unsafe { options.map_mut(file)? })
            },
            MapMode::Private => ByteBuffer::from_mmap(unsafe { options.map_copy(file)? }),
        };
        debug!("Mapped {} bytes at offset {} ({:?})", size, position, mode);
        Ok(buffer)
    }
}

impl From<File> for FileChannel {
    fn from(file: File) -> Self {
        Self {
            file: Some(file),
        }
    }
}

fn chunk_size(count: u64) -> usize {
    usize::try_from(count).map_or(TRANSFER_CHUNK, |count| count.min(TRANSFER_CHUNK))
}

fn read_retrying(file: &mut &File, buffer: &mut [u8]) -> Result<usize> {
    loop {
        match file.read(buffer) {
            Ok(count) => return Ok(count),
            Err(error) if error.kind() == ErrorKind::Interrupted => (),
            Err(error) => return Err(error.into()),
        }
    }
}

impl ReadableByteChannel for FileChannel {
    /// Files report [`ReadStatus::EndOfStream`] every time the position is at
    /// the end of the file, since the file may grow again.
    fn read(&mut self, dst: &mut ByteBuffer) -> Result<ReadStatus> {
        let mut file = self.file()?;
        if !dst.has_remaining() {
            return Ok(ReadStatus::Read(0));
        }
        match read_retrying(&mut file, dst.writable()?)? {
            0 => Ok(ReadStatus::EndOfStream),
            count => {
                dst.advance(count)?;
                Ok(ReadStatus::Read(count))
            },
        }
    }
}

impl WritableByteChannel for FileChannel {
    fn write(&mut self, src: &mut ByteBuffer) -> Result<usize> {
        let mut file = self.file()?;
        let count = src.remaining();
        file.write_all(src.readable())?;
        src.advance(count)?;
        Ok(count)
    }
}

impl ScatteringByteChannel for FileChannel {
    fn read_scattering(&mut self, dsts: &mut [ByteBuffer]) -> Result<ReadStatus> {
        let mut file = self.file()?;
        if dsts.iter().all(|buffer| !buffer.has_remaining()) {
            return Ok(ReadStatus::Read(0));
        }
        let count = {
            let mut slices = dsts
                .iter_mut()
                .map(|buffer| buffer.writable().map(IoSliceMut::new))
                .collect::<Result<Vec<_>>>()?;
            file.read_vectored(&mut slices)?
        };
        match count {
            0 => Ok(ReadStatus::EndOfStream),
            count => {
                distribute(dsts, count)?;
                Ok(ReadStatus::Read(count))
            },
        }
    }
}

impl GatheringByteChannel for FileChannel {
    fn write_gathering(&mut self, srcs: &mut [ByteBuffer]) -> Result<usize> {
        let mut file = self.file()?;
        let mut total = 0;
        while srcs.iter().any(ByteBuffer::has_remaining) {
            let written = {
                let slices: Vec<IoSlice> = srcs.iter().map(|buffer| IoSlice::new(buffer.readable())).collect();
                file.write_vectored(&slices)?
            };
            if written == 0 {
                return Err(NioError::Io(ErrorKind::WriteZero.into()));
            }
            distribute(srcs, written)?;
            total += written;
        }
        Ok(total)
    }
}
