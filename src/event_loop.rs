/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use log::{debug, warn};

use crate::{ByteBuffer, Channel, DatagramChannel, Interest, ListeningChannel, LoopConfig, NioError, Result};
use crate::{ReadStatus, ReadableByteChannel, RegistrationError, SelectableChannel, StreamChannel, WritableByteChannel};
use crate::key::{SelectedKey, SelectionKey};
use crate::selector::{Selector, SelectorWaker};
use crate::utilities::Flag;

/// Callbacks of an [`EventLoop`]
///
/// Every callback gets a [`Context`] through which it can queue output,
/// close endpoints, register further channels or stop the loop.
pub trait Handler {
    /// A listener accepted a new connection, now registered for reading.
    fn accepted(&mut self, _ctx: &mut Context<'_>, _key: SelectionKey, _peer: Option<SocketAddr>) {}

    /// An outgoing connection started by [`EventLoop::connect()`] completed.
    fn connected(&mut self, _ctx: &mut Context<'_>, _key: SelectionKey) {}

    /// A channel handed over through [`EventLoopHandle::submit()`] was
    /// registered.
    fn registered(&mut self, _ctx: &mut Context<'_>, _key: SelectionKey) {}

    /// Bytes arrived on a stream or pipe. `data` is in read mode and holds
    /// everything received so far that has not been consumed; whatever the
    /// handler leaves unread is kept and shows up again, in front of newer
    /// bytes, on the next call.
    fn received(&mut self, ctx: &mut Context<'_>, key: SelectionKey, data: &mut ByteBuffer);

    /// A datagram arrived on a datagram endpoint.
    fn datagram(&mut self, _ctx: &mut Context<'_>, _key: SelectionKey, _peer: SocketAddr, _data: &[u8]) {}

    /// The endpoint was closed, either by the peer, because of an error, or
    /// through [`Context::close()`]. The key is no longer valid.
    fn closed(&mut self, _ctx: &mut Context<'_>, _key: SelectionKey) {}

    /// A poll returned without any ready channel.
    fn idle(&mut self, _ctx: &mut Context<'_>) {}
}

/// Output of a datagram endpoint, one entry per datagram.
#[derive(Debug, Default)]
struct DatagramQueue {
    datagrams: VecDeque<Vec<u8>>,
    queued: usize,
    limit: usize,
}

impl DatagramQueue {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<()> {
        let remaining = self.limit - self.queued;
        if data.len() > remaining {
            return Err(NioError::Overflow { requested: data.len(), remaining });
        }
        self.datagrams.push_back(data.to_vec());
        self.queued += data.len();
        Ok(())
    }

    /// Sends queued datagrams until the socket can not take the next one.
    fn flush(&mut self, socket: &mut DatagramChannel) -> Result<bool> {
        while let Some(datagram) = self.datagrams.front() {
            if socket.write(&mut ByteBuffer::from(&datagram[..]))? == 0 {
                return Ok(false);
            }
            self.queued -= datagram.len();
            self.datagrams.pop_front();
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterFlush {
    Nothing,
    ShutdownOutput,
    Close,
}

/// A channel registered with an [`EventLoop`], together with its buffers
#[derive(Debug)]
pub struct Endpoint {
    key: Option<SelectionKey>,
    channel: Channel,
    inbound: ByteBuffer,
    outbound: ByteBuffer,
    datagrams: DatagramQueue,
    interest: Interest,
    after_flush: AfterFlush,
}

struct Fill {
    read: usize,
    end_of_stream: bool,
}

impl Endpoint {
    fn new(channel: Channel, interest: Interest, config: &LoopConfig) -> Result<Self> {
        let (inbound, outbound) = match &channel {
            Channel::Listening(_) => (ByteBuffer::default(), ByteBuffer::default()),
            Channel::Stream(_) => (config.buffer(config.read_buffer_size)?, config.buffer(config.write_buffer_size)?),
            Channel::Datagram(_) => (config.buffer(config.datagram_buffer_size)?, ByteBuffer::default()),
            #[cfg(unix)]
            Channel::PipeSource(_) => (config.buffer(config.read_buffer_size)?, ByteBuffer::default()),
            #[cfg(unix)]
            Channel::PipeSink(_) => (ByteBuffer::default(), config.buffer(config.write_buffer_size)?),
        };
        Ok(Self {
            key: None,
            channel,
            inbound,
            outbound,
            datagrams: DatagramQueue::new(config.write_buffer_size),
            interest,
            after_flush: AfterFlush::Nothing,
        })
    }

    pub fn key(&self) -> Option<SelectionKey> {
        self.key
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Bytes queued for output that have not been written yet.
    pub fn pending_output(&self) -> usize {
        self.outbound.position() + self.datagrams.queued
    }

    /// Bytes received that the handler has not consumed yet.
    pub fn buffered_input(&self) -> usize {
        self.inbound.position()
    }

    fn set_interest(&mut self, interest: Interest) -> Result<()> {
        if interest != self.interest {
            self.channel.set_interest(interest)?;
            self.interest = interest;
        }
        Ok(())
    }

    fn is_connection_pending(&self) -> bool {
        matches!(&self.channel, Channel::Stream(stream) if stream.is_connection_pending())
    }

    fn queue(&mut self, data: &[u8]) -> Result<()> {
        if !self.channel.valid_interest().contains(Interest::WRITABLE) {
            return Err(RegistrationError::InvalidInterest.into());
        }
        if self.after_flush != AfterFlush::Nothing {
            return Err(NioError::ClosedChannel);
        }
        if data.is_empty() {
            return Ok(());
        }
        match &self.channel {
            Channel::Datagram(socket) if !socket.is_connected() => return Err(NioError::Io(ErrorKind::NotConnected.into())),
            Channel::Datagram(_) => self.datagrams.push(data)?,
            _ => {
                self.outbound.put(data)?;
            },
        }
        if !self.is_connection_pending() {
            self.set_interest(self.interest | Interest::WRITABLE)?;
        }
        Ok(())
    }

    /// Reads until the channel would block, the inbound buffer is full, or
    /// the input ended.
    fn fill(&mut self) -> Result<Fill> {
        let mut fill = Fill { read: 0, end_of_stream: false };
        while self.inbound.has_remaining() {
            match self.channel.read(&mut self.inbound)? {
                ReadStatus::Read(0) => break,
                ReadStatus::Read(count) => fill.read += count,
                ReadStatus::EndOfStream => {
                    fill.end_of_stream = true;
                    break;
                },
            }
        }
        Ok(fill)
    }

    /// Writes queued output until the channel would block. Returns whether
    /// the queue is empty.
    fn flush(&mut self) -> Result<bool> {
        if let Channel::Datagram(socket) = &mut self.channel {
            return self.datagrams.flush(socket);
        }
        while self.outbound.position() > 0 {
            self.outbound.flip();
            let written = self.channel.write(&mut self.outbound);
            self.outbound.compact()?;
            if written? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// The handler-side view of an [`EventLoop`]
pub struct Context<'a> {
    selector: &'a mut Selector<Endpoint>,
    config: &'a LoopConfig,
    stop: &'a Flag,
    closed: &'a mut Vec<SelectionKey>,
}

impl<'a> Context<'a> {
    /// Queues `data` for output on the endpoint and asks for write
    /// readiness. Fails with [`NioError::Overflow`] if the outbound buffer can
    /// not take all of `data` (nothing is queued in that case).
    ///
    /// On a connected datagram endpoint every call queues one datagram.
    /// Unconnected datagram endpoints reply through
    /// [`send_to()`](Context::send_to) instead.
    pub fn write(&mut self, key: SelectionKey, data: &[u8]) -> Result<()> {
        self.selector.attachment_mut(key).ok_or(NioError::ClosedChannel)?.queue(data)
    }

    /// Sends one datagram right away. Returns zero if the socket could not
    /// take it.
    pub fn send_to(&mut self, key: SelectionKey, peer: SocketAddr, data: &[u8]) -> Result<usize> {
        let endpoint = self.selector.attachment_mut(key).ok_or(NioError::ClosedChannel)?;
        match &mut endpoint.channel {
            Channel::Datagram(socket) => socket.send(&mut ByteBuffer::from(data), peer),
            _ => Err(RegistrationError::InvalidInterest.into()),
        }
    }

    /// Closes the endpoint at once, dropping output that is still queued.
    /// Returns `false` if the key was not registered (anymore).
    pub fn close(&mut self, key: SelectionKey) -> bool {
        close_endpoint(self.selector, self.closed, key)
    }

    /// Shuts down the output side once queued output has been written. For
    /// a pipe sink this closes the endpoint, so the source sees end-of-stream.
    pub fn shutdown_output(&mut self, key: SelectionKey) -> Result<()> {
        let endpoint = self.selector.attachment_mut(key).ok_or(NioError::ClosedChannel)?;
        let after_flush = match &endpoint.channel {
            Channel::Stream(_) => AfterFlush::ShutdownOutput,
            #[cfg(unix)]
            Channel::PipeSink(_) => AfterFlush::Close,
            _ => return Err(RegistrationError::InvalidInterest.into()),
        };
        endpoint.after_flush = after_flush;
        if endpoint.pending_output() == 0 && !endpoint.is_connection_pending() {
            finish_output(self.selector, self.closed, key)?;
        }
        Ok(())
    }

    /// Makes [`EventLoop::run()`] return after the current cycle.
    pub fn stop(&mut self) {
        if let Err(error) = self.stop.raise() {
            warn!("Failed to wake up the event loop: {:?}", error);
        }
    }

    /// Registers another channel with the loop; it is switched to
    /// non-blocking mode first.
    pub fn register<C: Into<Channel>>(&mut self, channel: C, interest: Interest) -> Result<SelectionKey> {
        register_endpoint(self.selector, self.config, channel.into(), interest)
    }

    pub fn endpoint(&self, key: SelectionKey) -> Option<&Endpoint> {
        self.selector.attachment(key)
    }
}

/// Cross-thread control of an [`EventLoop`]
///
/// A handle taken before [`EventLoop::recover()`] can still stop the loop
/// and submit channels, but it wakes up the failed selector; the recovered
/// loop notices the request within its idle timeout.
#[derive(Debug, Clone)]
pub struct EventLoopHandle {
    stop: Arc<Flag>,
    submissions: Sender<(Channel, Interest)>,
    waker: SelectorWaker,
}

impl EventLoopHandle {
    /// Makes [`EventLoop::run()`] return.
    pub fn stop(&self) -> Result<()> {
        self.stop.raise().map(|_| ())
    }

    /// Hands a channel over to the loop, which registers it on its own thread
    /// and reports it through [`Handler::registered()`].
    pub fn submit<C: Into<Channel>>(&self, channel: C, interest: Interest) -> Result<()> {
        self.submissions.send((channel.into(), interest)).map_err(|_| NioError::ClosedChannel)?;
        self.waker.wakeup()
    }
}

/// A single-threaded event loop on top of a [`Selector`]
///
/// The loop owns its channels as [`Endpoint`]s, reads incoming bytes into
/// per-endpoint buffers, writes queued output when the channel becomes
/// writable and reports everything to a [`Handler`].
pub struct EventLoop<H: Handler> {
    selector: Selector<Endpoint>,
    handler: H,
    config: LoopConfig,
    stop: Arc<Flag>,
    submit_tx: Sender<(Channel, Interest)>,
    submit_rx: Receiver<(Channel, Interest)>,
    closed: Vec<SelectionKey>,
    registered: Vec<SelectionKey>,
}

impl<H: Handler> EventLoop<H> {
    pub fn new(handler: H) -> Result<Self> {
        Self::with_config(LoopConfig::default(), handler)
    }

    pub fn with_config(config: LoopConfig, handler: H) -> Result<Self> {
        let selector = Selector::with_capacity(config.events_capacity)?;
        let stop = Arc::new(Flag::new(selector.waker()));
        let (submit_tx, submit_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            selector,
            handler,
            config,
            stop,
            submit_tx,
            submit_rx,
            closed: Vec::new(),
            registered: Vec::new(),
        })
    }

    /// Starts listening on `addr`; connections are accepted by the loop.
    pub fn listen(&mut self, addr: SocketAddr) -> Result<SelectionKey> {
        let listener = ListeningChannel::bind(addr)?;
        self.register(listener, Interest::ACCEPTABLE)
    }

    /// Starts connecting to `addr`; [`Handler::connected()`] reports success.
    /// Output written before the connection is established stays queued.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<SelectionKey> {
        let stream = StreamChannel::connect_nonblocking(addr)?;
        self.register(stream, Interest::CONNECTABLE)
    }

    pub fn bind_datagram(&mut self, addr: SocketAddr) -> Result<SelectionKey> {
        let socket = DatagramChannel::bind(addr)?;
        self.register(socket, Interest::READABLE)
    }

    /// Registers an existing channel; it is switched to non-blocking mode.
    pub fn register<C: Into<Channel>>(&mut self, channel: C, interest: Interest) -> Result<SelectionKey> {
        register_endpoint(&mut self.selector, &self.config, channel.into(), interest)
    }

    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            stop: self.stop.clone(),
            submissions: self.submit_tx.clone(),
            waker: self.selector.waker(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn local_addr(&self, key: SelectionKey) -> Option<SocketAddr> {
        self.selector.attachment(key).and_then(|endpoint| endpoint.channel.local_addr())
    }

    pub fn endpoint(&self, key: SelectionKey) -> Option<&Endpoint> {
        self.selector.attachment(key)
    }

    /// Polls once and dispatches whatever is ready. Returns the number of
    /// keys that were ready. A [`NioError::PollFailure`] leaves the loop
    /// unusable until [`recover()`](EventLoop::recover) is called.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        self.accept_submissions();
        self.notify();

        let count = self.selector.poll(timeout)?;
        if count == 0 {
            if !self.stop.check() {
                self.with_context(|handler, ctx| handler.idle(ctx));
            }
        } else {
            for selected in self.selector.selected_keys() {
                self.dispatch(selected);
                self.notify();
            }
        }

        self.notify();
        Ok(count)
    }

    /// Runs until stopped through [`Context::stop()`] or an
    /// [`EventLoopHandle`], or until polling fails.
    pub fn run(&mut self) -> Result<()> {
        debug!("Event loop started");
        while !self.stop.check() {
            self.run_once(self.config.idle_timeout)?;
        }
        self.stop.clear();
        debug!("Event loop stopped");
        Ok(())
    }

    /// Moves every endpoint to a new selector after a poll failure. Returns
    /// pairs of old and new keys; endpoints that could not be moved are
    /// closed and reported through [`Handler::closed()`] under their old key.
    pub fn recover(&mut self) -> Result<Vec<(SelectionKey, SelectionKey)>> {
        let fresh = Selector::with_capacity(self.config.events_capacity)?;
        let failed = mem::replace(&mut self.selector, fresh);
        let mut moved = Vec::new();

        for endpoint in failed.into_attachments() {
            let old = endpoint.key;
            let interest = endpoint.interest;
            match self.selector.register_attached(endpoint, interest, |endpoint| &mut endpoint.channel) {
                Ok(key) => {
                    if let Some(endpoint) = self.selector.attachment_mut(key) {
                        endpoint.key = Some(key);
                    }
                    if let Some(old) = old {
                        moved.push((old, key));
                    }
                },
                Err(error) => {
                    warn!("Failed to move endpoint {:?}: {:?}", old, error);
                    self.closed.extend(old);
                },
            }
        }

        debug!("Recovered {} endpoints", moved.len());
        self.notify();
        Ok(moved)
    }

    fn with_context<F>(&mut self, f: F)
    where
        F: FnOnce(&mut H, &mut Context<'_>),
    {
        let Self { selector, handler, config, stop, closed, .. } = self;
        let mut context = Context {
            selector,
            config,
            stop: stop.as_ref(),
            closed,
        };
        f(handler, &mut context);
    }

    fn accept_submissions(&mut self) {
        for (channel, interest) in self.submit_rx.try_iter() {
            match register_endpoint(&mut self.selector, &self.config, channel, interest) {
                Ok(key) => self.registered.push(key),
                Err(error) => warn!("Failed to register submitted channel: {:?}", error),
            }
        }
    }

    fn notify(&mut self) {
        loop {
            let registered = mem::take(&mut self.registered);
            let closed = mem::take(&mut self.closed);
            if registered.is_empty() && closed.is_empty() {
                return;
            }
            for key in registered {
                self.with_context(|handler, ctx| handler.registered(ctx, key));
            }
            for key in closed {
                self.with_context(|handler, ctx| handler.closed(ctx, key));
            }
        }
    }

    fn close(&mut self, key: SelectionKey) {
        close_endpoint(&mut self.selector, &mut self.closed, key);
    }

    fn dispatch(&mut self, selected: SelectedKey) {
        let key = selected.key;
        if selected.is_acceptable() {
            self.on_acceptable(key);
        }
        if selected.is_connectable() {
            let result = self.on_connectable(key);
            self.guard(key, result);
        }
        if selected.is_readable() {
            let result = self.on_readable(key);
            self.guard(key, result);
        }
        if selected.is_writable() {
            let result = self.on_writable(key);
            self.guard(key, result);
        }
    }

    fn guard(&mut self, key: SelectionKey, result: Result<()>) {
        if let Err(error) = result {
            if self.selector.is_valid(key) {
                warn!("Closing endpoint {:?} after error: {}", key.token(), error);
                self.close(key);
            }
        }
    }

    fn on_acceptable(&mut self, key: SelectionKey) {
        let mut accepted = Vec::new();
        if let Some(Channel::Listening(listener)) = self.selector.attachment_mut(key).map(|endpoint| &mut endpoint.channel) {
            while accepted.len() < self.config.accept_batch {
                match listener.accept() {
                    Ok(Some(stream)) => accepted.push(stream),
                    Ok(None) => break,
                    Err(error) => {
                        warn!("Failed to accept connection: {}", error);
                        break;
                    },
                }
            }
        }

        for stream in accepted {
            let peer = stream.peer_addr().ok();
            match register_endpoint(&mut self.selector, &self.config, Channel::Stream(stream), Interest::READABLE) {
                Ok(new_key) => self.with_context(|handler, ctx| handler.accepted(ctx, new_key, peer)),
                Err(error) => warn!("Failed to register accepted connection from {:?}: {}", peer, error),
            }
        }
    }

    fn on_connectable(&mut self, key: SelectionKey) -> Result<()> {
        let endpoint = match self.selector.attachment_mut(key) {
            Some(endpoint) => endpoint,
            None => return Ok(()),
        };
        let connected = match &mut endpoint.channel {
            Channel::Stream(stream) => stream.finish_connect()?,
            _ => return Ok(()),
        };
        if !connected {
            return Ok(());
        }

        let interest = match endpoint.pending_output() > 0 {
            true => Interest::READABLE | Interest::WRITABLE,
            false => Interest::READABLE,
        };
        endpoint.set_interest(interest)?;
        let after_flush = endpoint.after_flush;
        self.with_context(|handler, ctx| handler.connected(ctx, key));

        if after_flush != AfterFlush::Nothing && interest == Interest::READABLE {
            finish_output(&mut self.selector, &mut self.closed, key)?;
        }
        Ok(())
    }

    fn on_readable(&mut self, key: SelectionKey) -> Result<()> {
        let endpoint = match self.selector.attachment_mut(key) {
            Some(endpoint) => endpoint,
            None => return Ok(()),
        };
        match &endpoint.channel {
            Channel::Datagram(_) => return self.on_datagram(key),
            Channel::Listening(_) => return Ok(()),
            _ => (),
        }

        let fill = endpoint.fill()?;
        if fill.read > 0 || (fill.end_of_stream && endpoint.buffered_input() > 0) {
            let mut inbound = mem::take(&mut endpoint.inbound);
            inbound.flip();
            self.with_context(|handler, ctx| handler.received(ctx, key, &mut inbound));

            if let Some(endpoint) = self.selector.attachment_mut(key) {
                inbound.compact()?;
                let full = !inbound.has_remaining();
                endpoint.inbound = inbound;
                if full && !fill.end_of_stream {
                    warn!("Inbound buffer of endpoint {:?} is full, closing", key.token());
                    self.close(key);
                    return Ok(());
                }
            }
        }

        if fill.end_of_stream {
            self.on_end_of_stream(key)?;
        }
        Ok(())
    }

    /// The peer will not send anymore: close now, or once queued output
    /// has been written.
    fn on_end_of_stream(&mut self, key: SelectionKey) -> Result<()> {
        let endpoint = match self.selector.attachment_mut(key) {
            Some(endpoint) => endpoint,
            None => return Ok(()),
        };
        debug!("End of stream on endpoint {:?}", key.token());
        if endpoint.pending_output() == 0 {
            self.close(key);
            return Ok(());
        }
        endpoint.after_flush = AfterFlush::Close;
        endpoint.set_interest(Interest::WRITABLE)
    }

    fn on_datagram(&mut self, key: SelectionKey) -> Result<()> {
        loop {
            let endpoint = match self.selector.attachment_mut(key) {
                Some(endpoint) => endpoint,
                None => return Ok(()),
            };
            let socket = match &mut endpoint.channel {
                Channel::Datagram(socket) => socket,
                _ => return Ok(()),
            };
            endpoint.inbound.clear();
            let peer = match socket.receive(&mut endpoint.inbound)? {
                Some(peer) => peer,
                None => return Ok(()),
            };

            let mut inbound = mem::take(&mut endpoint.inbound);
            inbound.flip();
            self.with_context(|handler, ctx| handler.datagram(ctx, key, peer, inbound.readable()));
            if let Some(endpoint) = self.selector.attachment_mut(key) {
                endpoint.inbound = inbound;
            }
        }
    }

    fn on_writable(&mut self, key: SelectionKey) -> Result<()> {
        let endpoint = match self.selector.attachment_mut(key) {
            Some(endpoint) => endpoint,
            None => return Ok(()),
        };
        if endpoint.flush()? {
            endpoint.set_interest(endpoint.interest.remove(Interest::WRITABLE))?;
            finish_output(&mut self.selector, &mut self.closed, key)?;
        }
        Ok(())
    }
}

fn register_endpoint(selector: &mut Selector<Endpoint>, config: &LoopConfig, mut channel: Channel, interest: Interest) -> Result<SelectionKey> {
    channel.configure_blocking(false)?;
    let endpoint = Endpoint::new(channel, interest, config)?;
    let key = selector.register_attached(endpoint, interest, |endpoint| &mut endpoint.channel)?;
    if let Some(endpoint) = selector.attachment_mut(key) {
        endpoint.key = Some(key);
    }
    Ok(key)
}

fn close_endpoint(selector: &mut Selector<Endpoint>, closed: &mut Vec<SelectionKey>, key: SelectionKey) -> bool {
    match selector.cancel(key) {
        Some(mut endpoint) => {
            endpoint.channel.close();
            debug!("Closed {} endpoint {:?}", endpoint.channel.kind(), key.token());
            closed.push(key);
            true
        },
        None => false,
    }
}

/// Carries out a requested shutdown once the output queue is empty.
fn finish_output(selector: &mut Selector<Endpoint>, closed: &mut Vec<SelectionKey>, key: SelectionKey) -> Result<()> {
    let endpoint = match selector.attachment_mut(key) {
        Some(endpoint) => endpoint,
        None => return Ok(()),
    };
    match mem::replace(&mut endpoint.after_flush, AfterFlush::Nothing) {
        AfterFlush::Nothing => (),
        AfterFlush::ShutdownOutput => {
            if let Channel::Stream(stream) = &endpoint.channel {
                stream.shutdown_output()?;
                debug!("Shut down output of endpoint {:?}", key.token());
            }
        },
        AfterFlush::Close => {
            close_endpoint(selector, closed, key);
        },
    }
    Ok(())
}
