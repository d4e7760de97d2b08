/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use mio::{Events, Poll, Registry, Token, Waker};

use log::{debug, error, trace};

use crate::{Interest, NioError, RegistrationError, Result, SelectableChannel};
use crate::key::{KeyState, Registration, SelectedKey, SelectionKey};

const WAKEUP: Token = Token(usize::MAX);

static SELECTOR_ID: AtomicUsize = AtomicUsize::new(1);

/// A readiness multiplexer over any number of [`SelectableChannel`]s
///
/// Channels are registered together with an *interest* set and an
/// *attachment* of type `A`; the selector hands out a [`SelectionKey`] for
/// each registration. A call to [`poll()`](Selector::poll) blocks until at
/// least one registered channel is ready for an operation it is interested
/// in, the timeout elapses, or the selector is woken up through a
/// [`SelectorWaker`]. The ready keys are then taken out with
/// [`selected_keys()`](Selector::selected_keys).
///
/// Readiness is *level-triggered*: a channel that is still readable after a
/// poll will be selected again on the next poll, until an operation on it
/// reports that it would block.
///
/// The selector does not own the channels. A channel remembers its
/// registration and can change its interest or cancel itself; closing a
/// registered channel cancels its key before the next poll.
#[derive(Debug)]
pub struct Selector<A = ()> {
    id: usize,
    poll: Poll,
    events: Events,
    registry: Arc<Registry>,
    waker: Arc<Waker>,
    entries: HashMap<Token, Entry<A>>,
    next: usize,
    cancel_tx: Sender<Token>,
    cancel_rx: Receiver<Token>,
    selected: Vec<SelectedKey>,
    cycle: u64,
}

#[derive(Debug)]
struct Entry<A> {
    state: Arc<KeyState>,
    attachment: A,
    seen: u64,
}

/// Wakes up a [`Selector`] from another thread
///
/// A wakeup makes a blocked [`poll()`](Selector::poll) return early, or the
/// next one return immediately if the selector is not currently polling.
/// Readiness that was pending is not lost.
#[derive(Debug, Clone)]
pub struct SelectorWaker {
    waker: Arc<Waker>,
}

impl SelectorWaker {
    pub fn wakeup(&self) -> Result<()> {
        Ok(self.waker.wake()?)
    }
}

/// The keys that were selected by the last poll, handed out by value
#[derive(Debug)]
pub struct SelectedKeys {
    inner: std::vec::IntoIter<SelectedKey>,
}

impl Iterator for SelectedKeys {
    type Item = SelectedKey;

    fn next(&mut self) -> Option<SelectedKey> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for SelectedKeys {}

impl<A> Selector<A> {
    pub fn new() -> Result<Self> {
        Self::with_capacity(128)
    }

    /// Creates a selector that receives up to `capacity` OS events per poll.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let poll = Poll::new()?;
        let registry = Arc::new(poll.registry().try_clone()?);
        let waker = Arc::new(Waker::new(poll.registry(), WAKEUP)?);
        let (cancel_tx, cancel_rx) = crossbeam_channel::unbounded();
        let id = SELECTOR_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Created selector #{}", id);
        Ok(Self {
            id,
            poll,
            events: Events::with_capacity(capacity.max(1)),
            registry,
            waker,
            entries: HashMap::new(),
            next: usize::MIN,
            cancel_tx,
            cancel_rx,
            selected: Vec::new(),
            cycle: 0,
        })
    }

    /// Registers a non-blocking, open channel.
    ///
    /// Fails with [`NioError::ClosedChannel`] for closed channels and with a
    /// [`RegistrationError`] if the channel is still in blocking mode, already
    /// registered (here or with any other selector), or if `interest`
    /// contains operations the channel does not support.
    pub fn register<C>(&mut self, channel: &mut C, interest: Interest, attachment: A) -> Result<SelectionKey>
    where
        C: SelectableChannel + ?Sized,
    {
        let state = self.attach(channel, interest)?;
        Ok(self.insert(state, attachment))
    }

    /// Like [`register()`](Selector::register), for attachments that own
    /// their channel: `channel` picks the channel out of the attachment.
    /// The attachment is dropped if registration fails.
    pub fn register_attached<C, F>(&mut self, mut attachment: A, interest: Interest, channel: F) -> Result<SelectionKey>
    where
        C: SelectableChannel + ?Sized,
        F: FnOnce(&mut A) -> &mut C,
    {
        let state = self.attach(channel(&mut attachment), interest)?;
        Ok(self.insert(state, attachment))
    }

    fn attach<C>(&mut self, channel: &mut C, interest: Interest) -> Result<Arc<KeyState>>
    where
        C: SelectableChannel + ?Sized,
    {
        if !channel.is_open() {
            return Err(NioError::ClosedChannel);
        }
        if channel.is_blocking() {
            return Err(RegistrationError::Blocking.into());
        }
        if !channel.valid_interest().contains(interest) {
            return Err(RegistrationError::InvalidInterest.into());
        }

        let (source, slot) = channel.parts()?;
        match slot.take() {
            Some(current) if current.is_live() => {
                *slot = Some(current);
                return Err(RegistrationError::AlreadyRegistered.into());
            },
            Some(stale) => stale.release(source),
            None => (),
        }

        let key = SelectionKey { selector: self.id, token: self.token() };
        let state = Arc::new(KeyState::new(key));
        let mut registration = Registration::new(state.clone(), self.registry.clone(), self.cancel_tx.clone());
        registration.update(source, interest)?;
        *slot = Some(registration);
        Ok(state)
    }

    fn insert(&mut self, state: Arc<KeyState>, attachment: A) -> SelectionKey {
        let key = state.key;
        debug!("Registered {:?} with selector #{} for {:?}", key.token, self.id, state.interest());
        self.entries.insert(key.token, Entry { state, attachment, seen: 0 });
        key
    }

    fn token(&mut self) -> Token {
        loop {
            let token = Token(self.next);
            self.next = self.next.wrapping_add(1);
            if token != WAKEUP {
                return token;
            }
        }
    }

    fn entry(&self, key: SelectionKey) -> Option<&Entry<A>> {
        match key.selector == self.id {
            true => self.entries.get(&key.token).filter(|entry| !entry.state.is_cancelled()),
            false => None,
        }
    }

    fn entry_mut(&mut self, key: SelectionKey) -> Option<&mut Entry<A>> {
        match key.selector == self.id {
            true => self.entries.get_mut(&key.token).filter(|entry| !entry.state.is_cancelled()),
            false => None,
        }
    }

    /// Cancels a key and returns its attachment. Cancelling a key twice (or
    /// a key of another selector) returns `None`.
    ///
    /// The channel stays open. Its OS registration is released the next time
    /// the channel is registered, switched to blocking mode, or closed.
    pub fn cancel(&mut self, key: SelectionKey) -> Option<A> {
        if key.selector != self.id {
            return None;
        }
        let entry = self.entries.remove(&key.token)?;
        let live = !entry.state.is_cancelled();
        entry.state.cancel();
        if live {
            debug!("Cancelled {:?} on selector #{}", key.token, self.id);
        }
        live.then_some(entry.attachment)
    }

    /// Waits for readiness. Returns the number of selected keys, which is
    /// zero after a timeout or a wakeup.
    ///
    /// Keys that were selected by the previous poll but never taken out with
    /// [`selected_keys()`](Selector::selected_keys) are discarded; if they
    /// are still ready they are selected again. The poll returns at once if
    /// any key is known to be ready already.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<usize> {
        self.process_cancelled();
        self.selected.clear();
        self.cycle += 1;

        let timeout = match self.entries.values().any(|entry| !entry.state.ready().is_empty()) {
            true => Some(Duration::ZERO),
            false => timeout,
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(_) => (),
            Err(error) if error.kind() == ErrorKind::Interrupted => self.events.clear(),
            Err(error) => {
                error!("Poll failure on selector #{}: {:?}", self.id, error);
                return Err(NioError::PollFailure(error));
            },
        }

        let id = self.id;
        let Self { events, entries, selected, cycle, .. } = self;
        for event in events.iter() {
            if event.token() == WAKEUP {
                trace!("Selector #{} woken up", id);
                continue;
            }
            if let Some(entry) = entries.get_mut(&event.token()) {
                trace!("Event: {:?}", event);
                entry.state.mark_ready(Interest::from_event(event));
                select(entry, *cycle, selected);
            }
        }
        for entry in entries.values_mut() {
            select(entry, *cycle, selected);
        }

        Ok(self.selected.len())
    }

    /// Non-blocking variant of [`poll()`](Selector::poll).
    pub fn poll_now(&mut self) -> Result<usize> {
        self.poll(Some(Duration::ZERO))
    }

    /// Takes the keys selected by the last poll. Each key is handed out once.
    pub fn selected_keys(&mut self) -> SelectedKeys {
        SelectedKeys {
            inner: std::mem::take(&mut self.selected).into_iter(),
        }
    }

    fn process_cancelled(&mut self) {
        for token in self.cancel_rx.try_iter() {
            if self.entries.remove(&token).is_some() {
                trace!("Dropped cancelled {:?} from selector #{}", token, self.id);
            }
        }
    }

    pub fn attachment(&self, key: SelectionKey) -> Option<&A> {
        self.entry(key).map(|entry| &entry.attachment)
    }

    pub fn attachment_mut(&mut self, key: SelectionKey) -> Option<&mut A> {
        self.entry_mut(key).map(|entry| &mut entry.attachment)
    }

    pub fn interest(&self, key: SelectionKey) -> Option<Interest> {
        self.entry(key).map(|entry| entry.state.interest())
    }

    /// Whether the key is still registered.
    pub fn is_valid(&self, key: SelectionKey) -> bool {
        self.entry(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = SelectionKey> + '_ {
        self.entries.values().filter(|entry| !entry.state.is_cancelled()).map(|entry| entry.state.key)
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn waker(&self) -> SelectorWaker {
        SelectorWaker {
            waker: self.waker.clone(),
        }
    }

    /// Dismantles the selector and returns the attachments of all keys that
    /// were still registered. Their channels may be registered elsewhere.
    pub fn into_attachments(mut self) -> Vec<A> {
        self.process_cancelled();
        std::mem::take(&mut self.entries)
            .into_values()
            .filter(|entry| !entry.state.is_cancelled())
            .map(|entry| {
                entry.state.cancel();
                entry.attachment
            })
            .collect()
    }
}

fn select<A>(entry: &mut Entry<A>, cycle: u64, selected: &mut Vec<SelectedKey>) {
    if entry.seen == cycle {
        return;
    }
    let ready = entry.state.ready();
    if !ready.is_empty() {
        entry.seen = cycle;
        selected.push(SelectedKey { key: entry.state.key, ready });
    }
}

impl<A> Drop for Selector<A> {
    fn drop(&mut self) {
        for entry in self.entries.values() {
            entry.state.cancel();
        }
        debug!("Closed selector #{}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Instant;

    use super::*;
    use crate::{ByteBuffer, ListeningChannel, ReadableByteChannel, StreamChannel, WritableByteChannel};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn listener() -> ListeningChannel {
        let mut listener = ListeningChannel::bind(loopback()).unwrap();
        listener.configure_blocking(false).unwrap();
        listener
    }

    #[test]
    fn test_register_requires_non_blocking_mode() {
        let mut selector = Selector::<()>::new().unwrap();
        let mut listener = ListeningChannel::bind(loopback()).unwrap();
        let error = selector.register(&mut listener, Interest::ACCEPTABLE, ()).unwrap_err();
        assert!(matches!(error, NioError::Registration(RegistrationError::Blocking)));
        assert!(!listener.is_registered());
    }

    #[test]
    fn test_register_rejects_invalid_interest() {
        let mut selector = Selector::<()>::new().unwrap();
        let mut listener = listener();
        let error = selector.register(&mut listener, Interest::READABLE, ()).unwrap_err();
        assert!(matches!(error, NioError::Registration(RegistrationError::InvalidInterest)));
    }

    #[test]
    fn test_register_twice() {
        let mut first = Selector::<()>::new().unwrap();
        let mut second = Selector::<()>::new().unwrap();
        let mut listener = listener();
        first.register(&mut listener, Interest::ACCEPTABLE, ()).unwrap();
        for selector in [&mut first, &mut second] {
            let error = selector.register(&mut listener, Interest::ACCEPTABLE, ()).unwrap_err();
            assert!(matches!(error, NioError::Registration(RegistrationError::AlreadyRegistered)));
        }
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_cancel_returns_attachment_once() {
        let mut selector = Selector::new().unwrap();
        let mut listener = listener();
        let key = selector.register(&mut listener, Interest::ACCEPTABLE, "listener").unwrap();
        assert_eq!(selector.attachment(key), Some(&"listener"));
        assert_eq!(selector.cancel(key), Some("listener"));
        assert_eq!(selector.cancel(key), None);
        assert!(!selector.is_valid(key));
        assert!(!listener.is_registered());

        let again = selector.register(&mut listener, Interest::ACCEPTABLE, "again").unwrap();
        assert_ne!(key, again);
    }

    #[test]
    fn test_poll_times_out() {
        let mut selector = Selector::<()>::new().unwrap();
        let mut listener = listener();
        selector.register(&mut listener, Interest::ACCEPTABLE, ()).unwrap();
        let start = Instant::now();
        assert_eq!(selector.poll(Some(Duration::from_millis(100))).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(90));
        assert_eq!(selector.selected_keys().count(), 0);
    }

    #[test]
    fn test_wakeup_ends_poll() {
        let mut selector = Selector::<()>::new().unwrap();
        let waker = selector.waker();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            waker.wakeup().unwrap();
        });
        let start = Instant::now();
        assert_eq!(selector.poll(Some(Duration::from_secs(10))).unwrap(), 0);
        assert!(start.elapsed() < Duration::from_secs(5));
        thread.join().unwrap();
    }

    #[test]
    fn test_readiness_is_level_triggered() {
        let mut selector = Selector::<()>::new().unwrap();
        let mut listener = listener();
        let mut client = StreamChannel::connect(listener.local_addr().unwrap()).unwrap();
        let mut server = loop {
            if let Some(stream) = listener.accept().unwrap() {
                break stream;
            }
        };
        server.configure_blocking(false).unwrap();
        let key = selector.register(&mut server, Interest::READABLE, ()).unwrap();

        client.write(&mut ByteBuffer::from(&b"ping"[..])).unwrap();
        assert_eq!(selector.poll(Some(Duration::from_secs(5))).unwrap(), 1);
        assert_eq!(selector.selected_keys().next().map(|selected| selected.key), Some(key));

        // not consumed: selected again without new data
        assert_eq!(selector.poll(Some(Duration::from_secs(5))).unwrap(), 1);
        let selected: Vec<_> = selector.selected_keys().collect();
        assert!(selected[0].is_readable());

        let mut buffer = ByteBuffer::allocate(16);
        while server.read(&mut buffer).unwrap().count() > 0 {}
        assert_eq!(buffer.position(), 4);
        assert_eq!(selector.poll(Some(Duration::from_millis(50))).unwrap(), 0);
    }

    #[test]
    fn test_close_cancels_key() {
        let mut selector = Selector::new().unwrap();
        let mut listener = listener();
        let key = selector.register(&mut listener, Interest::ACCEPTABLE, 7).unwrap();
        listener.close();
        assert!(!selector.is_valid(key));
        assert_eq!(selector.attachment(key), None);
        selector.poll_now().unwrap();
        assert!(selector.is_empty());
        assert_eq!(selector.cancel(key), None);
    }

    #[test]
    fn test_empty_interest_keeps_key() {
        let mut selector = Selector::<()>::new().unwrap();
        let mut listener = listener();
        let key = selector.register(&mut listener, Interest::ACCEPTABLE, ()).unwrap();
        listener.set_interest(Interest::NONE).unwrap();
        let _client = StreamChannel::connect(listener.local_addr().unwrap()).unwrap();
        assert_eq!(selector.poll(Some(Duration::from_millis(50))).unwrap(), 0);
        assert_eq!(selector.interest(key), Some(Interest::NONE));

        listener.set_interest(Interest::ACCEPTABLE).unwrap();
        assert_eq!(selector.poll(Some(Duration::from_secs(5))).unwrap(), 1);
        assert!(selector.selected_keys().all(|selected| selected.is_acceptable()));
    }

    #[test]
    fn test_into_attachments_releases_channels() {
        let mut selector = Selector::new().unwrap();
        let mut listener = listener();
        selector.register(&mut listener, Interest::ACCEPTABLE, "kept").unwrap();
        assert_eq!(selector.into_attachments(), vec!["kept"]);
        assert!(!listener.is_registered());

        let mut other = Selector::new().unwrap();
        other.register(&mut listener, Interest::ACCEPTABLE, "moved").unwrap();
    }
}
