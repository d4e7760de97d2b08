/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */

//! **mnio** provides *non-blocking* channels for stream sockets, datagram
//! sockets and pipes, cursor-based ***byte buffers*** to move data through
//! them, and a single-threaded readiness ***selector*** that multiplexes any
//! number of channels without a thread per connection.
//!
//! The OS-level readiness notifications come from the [**`mio`**](mio)
//! library. On top of them, the [`mnio_rs::Selector`](Selector) offers
//! *level-triggered* readiness: a channel stays selected for as long as the
//! operation it is interested in can make progress, which is what classic
//! select loops expect.
//!
//! # Usage
//!
//! Channels start out in *blocking* mode. A
//! [`mnio_rs::ListeningChannel`](ListeningChannel), for example, waits in
//! [`accept()`](ListeningChannel::accept) until a connection arrives. After
//! [`configure_blocking(false)`](SelectableChannel::configure_blocking) the
//! channel can be registered with a [`mnio_rs::Selector`](Selector) for the
//! operations it supports, see [`mnio_rs::Interest`](Interest). Every call to
//! [`poll()`](Selector::poll) then yields the keys of the channels that are
//! ready, each of them exactly once.
//!
//! Data is moved with [`mnio_rs::ByteBuffer`](ByteBuffer)s: a channel reads
//! into a buffer starting at its position and writes the bytes between
//! position and limit. Non-blocking reads return
//! [`ReadStatus::Read(0)`](ReadStatus) when nothing is available; the end of
//! a stream is reported as [`ReadStatus::EndOfStream`](ReadStatus).
//!
//! For the common case of a server or client that only wants to react to
//! incoming bytes, the [`mnio_rs::EventLoop`](EventLoop) drives a selector,
//! keeps per-connection buffers and calls back into a
//! [`mnio_rs::Handler`](Handler).
//!
//! Regular files are available as [`mnio_rs::FileChannel`](FileChannel),
//! including transfers to and from other channels and memory mapping.

mod buffer;
mod channel;
mod config;
mod error;
mod event_loop;
mod interest;
mod key;
mod selector;
mod utilities;

pub use buffer::ByteBuffer;
pub use channel::{Channel, DatagramChannel, FileChannel, ListeningChannel, MapMode, StreamChannel};
pub use channel::{GatheringByteChannel, ReadableByteChannel, ScatteringByteChannel, WritableByteChannel};
pub use channel::{ReadStatus, SelectableChannel};
#[cfg(unix)]
pub use channel::{pipe, PipeSink, PipeSource};
pub use config::LoopConfig;
pub use error::{NioError, RegistrationError, Result};
pub use event_loop::{Context, Endpoint, EventLoop, EventLoopHandle, Handler};
pub use interest::Interest;
pub use key::{SelectedKey, SelectionKey};
pub use selector::{SelectedKeys, Selector, SelectorWaker};
