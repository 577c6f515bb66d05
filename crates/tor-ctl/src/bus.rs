use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::model::EventRecord;

/// Which cooperative lane an observer's callback runs on.
///
/// `Main` is accepted for API parity with embedding GUI toolkits; in this
/// headless library there is no main/UI loop to target, so it behaves
/// identically to `Background` (see the Open Questions note in the design
/// docs for why this was decided rather than rejected at the API boundary).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Executor {
    Immediate,
    Main,
    Background,
}

/// The event categories a caller can subscribe to. `Control` covers raw
/// [`EventRecord`]s off the wire (already demultiplexed from replies);
/// `Log`, `State`, `Address`, and `Lifecycle` are published by the runtime
/// layer (`tor-runtime`'s state machine and process supervisor).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EventKind {
    Control,
    Log,
    State,
    Address,
    Lifecycle,
}

pub type Observer = Arc<dyn Fn(BusEvent) + Send + Sync + 'static>;

/// The payload delivered to a subscriber. `tor-runtime` publishes `Log`,
/// `State`, `Address`, and `Lifecycle`; `tor-ctl` publishes `Control`
/// directly off the wire.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Control(EventRecord),
    Log(LogLine),
    State(RuntimeState),
    Address(AddressInfo),
    Lifecycle(LifecycleEvent),
    Opaque(Arc<str>),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: Arc<str>,
}

/// Tor's self-reported lifecycle, per §3: `On`'s `bootstrap` percentage is
/// monotonic within a session and resets to 0 only by re-entering `Off`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DaemonState {
    Off,
    Starting,
    On { bootstrap: u8 },
    Stopping,
}

impl DaemonState {
    pub fn bootstrap(self) -> u8 {
        match self {
            DaemonState::On { bootstrap } => bootstrap,
            _ => 0,
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, DaemonState::On { .. })
    }

    pub fn is_off(self) -> bool {
        matches!(self, DaemonState::Off)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NetworkState {
    Enabled,
    Disabled,
}

/// Snapshot dispatched to `State` subscribers whenever either field changes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RuntimeState {
    pub daemon: DaemonState,
    pub network: NetworkState,
}

/// The kinds of client-facing listener tor can open, per §3's `Listener`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ListenerKind {
    Socks,
    Control,
    Dns,
    HttpTunnel,
    Transparent,
}

/// The last-known address for each listener kind. Addresses are carried
/// verbatim (invariant v): equality, including "is this the listener that
/// just closed", is string-wise, not semantic.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AddressInfo {
    pub socks: Option<String>,
    pub control: Option<String>,
    pub dns: Option<String>,
    pub http_tunnel: Option<String>,
    pub transparent: Option<String>,
}

impl AddressInfo {
    pub fn get(&self, kind: ListenerKind) -> Option<&str> {
        match kind {
            ListenerKind::Socks => self.socks.as_deref(),
            ListenerKind::Control => self.control.as_deref(),
            ListenerKind::Dns => self.dns.as_deref(),
            ListenerKind::HttpTunnel => self.http_tunnel.as_deref(),
            ListenerKind::Transparent => self.transparent.as_deref(),
        }
    }

    pub fn set(&mut self, kind: ListenerKind, value: Option<String>) {
        match kind {
            ListenerKind::Socks => self.socks = value,
            ListenerKind::Control => self.control = value,
            ListenerKind::Dns => self.dns = value,
            ListenerKind::HttpTunnel => self.http_tunnel = value,
            ListenerKind::Transparent => self.transparent = value,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Process-lifetime events published by the supervisor (C9).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LifecycleEvent {
    ProcessSpawned { pid: u32 },
    ProcessExited { code: Option<i32> },
}

#[derive(Clone)]
struct Subscription {
    executor: Executor,
    observer: Observer,
    /// Set for `Main`/`Background` subscriptions: events are pushed here and
    /// drained in order by one dedicated task (spawned in `subscribe`),
    /// rather than by a fresh task per event, so delivery to this observer
    /// stays ordered across separate `publish()` calls.
    queue: Option<mpsc::UnboundedSender<BusEvent>>,
}

/// A handle returned by [`EventBus::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SubscriptionHandle(u64);

/// Typed publish/subscribe hub. Delivery within one [`EventKind`] is
/// serialized (no reordering between observers of the same kind); a
/// publisher never holds the registry lock while invoking observers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscriptions: HashMap<EventKind, Vec<(u64, Subscription)>>,
    required: HashSet<EventKind>,
    required_events: HashSet<String>,
    refresh_tx: Option<mpsc::UnboundedSender<()>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Registers `refresh_tx` to be notified (best-effort) whenever the set
    /// of required event kinds grows, so the connection can issue a
    /// coalesced `SETEVENTS` refresh.
    pub fn set_refresh_channel(&self, refresh_tx: mpsc::UnboundedSender<()>) {
        self.inner.lock().unwrap().refresh_tx = Some(refresh_tx);
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        executor: Executor,
        observer: Observer,
    ) -> SubscriptionHandle {
        let queue = match executor {
            Executor::Immediate => None,
            Executor::Main | Executor::Background => {
                let (tx, mut rx) = mpsc::unbounded_channel::<BusEvent>();
                let drain_observer = observer.clone();
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        drain_observer(event);
                    }
                });
                Some(tx)
            }
        };

        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscriptions.entry(kind).or_default().push((
            id,
            Subscription {
                executor,
                observer,
                queue,
            },
        ));
        let is_new_kind = inner.required.insert(kind);
        if is_new_kind {
            if let Some(tx) = &inner.refresh_tx {
                let _ = tx.send(());
            }
        }
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&self, kind: EventKind, handle: SubscriptionHandle) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.subscriptions.get_mut(&kind) {
            list.retain(|(id, _)| *id != handle.0);
            if list.is_empty() {
                inner.required.remove(&kind);
            }
        }
    }

    pub fn required_kinds(&self) -> Vec<EventKind> {
        self.inner
            .lock()
            .unwrap()
            .required
            .iter()
            .copied()
            .collect()
    }

    /// Merges `keywords` (raw tor control-protocol event names, e.g.
    /// `STATUS_CLIENT`) into the set `tor-runtime` issues a `SETEVENTS`
    /// refresh for. Kept distinct from [`EventKind`] because a single
    /// `Control` subscriber may care about several wire event keywords at
    /// once, and the runtime layer has its own baseline it always needs
    /// (bootstrap/listener tracking) regardless of what callers subscribe to.
    pub fn require_events(&self, keywords: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.lock().unwrap();
        let mut grew = false;
        for keyword in keywords {
            grew |= inner.required_events.insert(keyword);
        }
        if grew {
            if let Some(tx) = &inner.refresh_tx {
                let _ = tx.send(());
            }
        }
    }

    pub fn required_events(&self) -> Vec<String> {
        let mut keywords: Vec<String> = self.inner.lock().unwrap().required_events.iter().cloned().collect();
        keywords.sort();
        keywords
    }

    /// Delivers `event` to every subscriber of `kind`, dispatching each
    /// according to its chosen [`Executor`]. The registry lock is held only
    /// long enough to clone the (`Arc`-backed) subscriber list; observers run
    /// outside the lock so they can themselves call back into the bus.
    pub fn publish(&self, kind: EventKind, event: BusEvent) {
        let subscribers: Vec<Subscription> = {
            let inner = self.inner.lock().unwrap();
            match inner.subscriptions.get(&kind) {
                None => return,
                Some(list) => list.iter().map(|(_, sub)| sub.clone()).collect(),
            }
        };
        for sub in subscribers {
            let event = event.clone();
            match sub.executor {
                Executor::Immediate => (sub.observer)(event),
                Executor::Main | Executor::Background => {
                    if let Some(tx) = &sub.queue {
                        let _ = tx.send(event);
                    }
                }
            }
        }
    }
}
