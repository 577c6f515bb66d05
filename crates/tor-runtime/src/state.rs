//! The state machine (C8): tracks `(DaemonState, NetworkState)` plus the
//! last-known [`AddressInfo`], and dispatches a `State` record whenever
//! either field changes, per §4.8.

use std::sync::Mutex;

use tor_ctl::{
    AddressInfo, BusEvent, DaemonState, EventBus, EventKind, ListenerKind, NetworkState,
    RuntimeState,
};

struct Inner {
    daemon: DaemonState,
    network: NetworkState,
    addresses: AddressInfo,
    /// The address map as of the last time it was non-empty, so it can be
    /// republished verbatim when network re-enables at full bootstrap.
    last_addresses: AddressInfo,
}

/// Owns `(DaemonState, NetworkState, AddressInfo)` and publishes [`RuntimeState`]
/// / [`AddressInfo`] changes on the shared [`EventBus`].
///
/// tor is always spawned with `--DisableNetwork 1` (§4.9), so a fresh state
/// machine starts `NetworkState::Disabled`; the action processor flips it to
/// `Enabled` once it clears `DisableNetwork` as the last step of starting.
pub struct StateMachine {
    inner: Mutex<Inner>,
    bus: EventBus,
}

impl StateMachine {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(Inner {
                daemon: DaemonState::Off,
                network: NetworkState::Disabled,
                addresses: AddressInfo::default(),
                last_addresses: AddressInfo::default(),
            }),
            bus,
        }
    }

    pub fn current(&self) -> RuntimeState {
        let inner = self.inner.lock().unwrap();
        RuntimeState {
            daemon: inner.daemon,
            network: inner.network,
        }
    }

    pub fn addresses(&self) -> AddressInfo {
        self.inner.lock().unwrap().addresses.clone()
    }

    /// Moves the daemon to `Starting`. Called when the action processor
    /// begins a `StartDaemon` sequence, before the process is spawned.
    pub fn mark_starting(&self) {
        self.transition_daemon(DaemonState::Starting);
    }

    /// Moves the daemon to `Stopping`. Called at the start of `StopDaemon`.
    pub fn mark_stopping(&self) {
        self.transition_daemon(DaemonState::Stopping);
    }

    /// Moves the daemon to `Off`, clearing `BootstrapPct` and `AddressInfo`
    /// per invariant (iv) and §4.8's daemon-transition rule. Called when a
    /// `StopDaemon` completes or the process exits unexpectedly.
    pub fn mark_off(&self) {
        self.transition_daemon(DaemonState::Off);
    }

    fn transition_daemon(&self, new_daemon: DaemonState) {
        let mut inner = self.inner.lock().unwrap();
        let old_daemon = inner.daemon;
        if old_daemon == new_daemon {
            return;
        }
        inner.daemon = new_daemon;
        if !new_daemon.is_on() && !inner.addresses.is_empty() {
            inner.addresses.clear();
        }
        self.emit_state_locked(&inner);
    }

    /// Applies a `Bootstrapped N%` notice. A decrease is ignored (invariant
    /// iv); the first bootstrap notice of a session moves `Starting -> On`.
    pub fn on_bootstrap(&self, pct: u8) {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.daemon.bootstrap();
        if inner.daemon.is_off() || inner.daemon == DaemonState::Stopping {
            return;
        }
        if pct <= current && inner.daemon.is_on() {
            return;
        }
        inner.daemon = DaemonState::On { bootstrap: pct };
        self.emit_state_locked(&inner);
    }

    /// Applies a `NETWORK_LIVENESS`/explicit network toggle. At full
    /// bootstrap, disabling clears `AddressInfo` and enabling republishes the
    /// last known one (§4.8).
    pub fn on_network(&self, new_network: NetworkState) {
        let mut inner = self.inner.lock().unwrap();
        if inner.network == new_network {
            return;
        }
        let at_full_bootstrap = inner.daemon.bootstrap() >= 100;
        inner.network = new_network;
        match new_network {
            NetworkState::Disabled if at_full_bootstrap => {
                if !inner.addresses.is_empty() {
                    inner.last_addresses = inner.addresses.clone();
                    inner.addresses.clear();
                    self.emit_addresses_locked(&inner);
                }
            }
            NetworkState::Enabled if at_full_bootstrap => {
                if inner.addresses.is_empty() && !inner.last_addresses.is_empty() {
                    inner.addresses = inner.last_addresses.clone();
                    self.emit_addresses_locked(&inner);
                }
            }
            _ => {}
        }
        self.emit_state_locked(&inner);
    }

    /// A listener was reported opened at `address`. Updates the per-type
    /// address and publishes a new [`AddressInfo`] only if it changed.
    pub fn on_listener_opened(&self, kind: ListenerKind, address: String) {
        let mut inner = self.inner.lock().unwrap();
        if inner.addresses.get(kind) == Some(address.as_str()) {
            return;
        }
        inner.addresses.set(kind, Some(address));
        self.emit_addresses_locked(&inner);
    }

    /// A listener was reported closed. Only clears the address if it
    /// matches the recorded one verbatim (invariant v), same as tor itself
    /// only ever reports closing the listener it most recently opened.
    pub fn on_listener_closed(&self, kind: ListenerKind, address: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.addresses.get(kind) != Some(address) {
            return;
        }
        inner.addresses.set(kind, None);
        self.emit_addresses_locked(&inner);
    }

    fn emit_state_locked(&self, inner: &Inner) {
        self.bus.publish(
            EventKind::State,
            BusEvent::State(RuntimeState {
                daemon: inner.daemon,
                network: inner.network,
            }),
        );
    }

    fn emit_addresses_locked(&self, inner: &Inner) {
        self.bus
            .publish(EventKind::Address, BusEvent::Address(inner.addresses.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tor_ctl::Executor;

    fn count_state_emissions(bus: &EventBus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(
            EventKind::State,
            Executor::Immediate,
            Arc::new(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        count
    }

    #[test]
    fn bootstrap_is_monotonic_within_a_session() {
        let bus = EventBus::new();
        let machine = StateMachine::new(bus);
        machine.mark_starting();
        machine.on_bootstrap(10);
        assert_eq!(machine.current().daemon.bootstrap(), 10);
        machine.on_bootstrap(5); // decrease ignored
        assert_eq!(machine.current().daemon.bootstrap(), 10);
        machine.on_bootstrap(100);
        assert_eq!(machine.current().daemon.bootstrap(), 100);
    }

    #[test]
    fn bootstrap_resets_after_returning_to_off() {
        let bus = EventBus::new();
        let machine = StateMachine::new(bus);
        machine.mark_starting();
        machine.on_bootstrap(100);
        machine.mark_off();
        machine.mark_starting();
        assert_eq!(machine.current().daemon.bootstrap(), 0);
    }

    #[test]
    fn daemon_transition_to_off_clears_addresses() {
        let bus = EventBus::new();
        let machine = StateMachine::new(bus);
        machine.mark_starting();
        machine.on_bootstrap(10);
        machine.on_listener_opened(ListenerKind::Socks, "127.0.0.1:9150".to_string());
        assert!(machine.addresses().socks.is_some());
        machine.mark_off();
        assert!(machine.addresses().socks.is_none());
    }

    #[test]
    fn listener_open_then_close_round_trips_to_null() {
        let bus = EventBus::new();
        let machine = StateMachine::new(bus);
        let count = count_state_emissions(&bus);
        machine.mark_starting();
        machine.on_listener_opened(ListenerKind::Socks, "127.0.0.1:9150".to_string());
        assert_eq!(machine.addresses().socks.as_deref(), Some("127.0.0.1:9150"));
        machine.on_listener_closed(ListenerKind::Socks, "127.0.0.1:9150");
        assert_eq!(machine.addresses().socks, None);
        // mark_starting (Off->Starting) is one state emission; listener
        // open/close publish on Address, not State.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_closed_with_mismatched_address_is_ignored() {
        let bus = EventBus::new();
        let machine = StateMachine::new(bus);
        machine.mark_starting();
        machine.on_listener_opened(ListenerKind::Socks, "127.0.0.1:9150".to_string());
        machine.on_listener_closed(ListenerKind::Socks, "127.0.0.1:9999");
        assert_eq!(machine.addresses().socks.as_deref(), Some("127.0.0.1:9150"));
    }

    #[test]
    fn state_emitted_only_when_daemon_or_network_changes() {
        let bus = EventBus::new();
        let machine = StateMachine::new(bus);
        let count = count_state_emissions(&bus);
        machine.mark_starting();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        machine.on_bootstrap(10);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        machine.on_bootstrap(10); // no change
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn network_disable_at_full_bootstrap_clears_and_reenable_republishes() {
        let bus = EventBus::new();
        let machine = StateMachine::new(bus);
        machine.mark_starting();
        machine.on_bootstrap(100);
        machine.on_listener_opened(ListenerKind::Socks, "127.0.0.1:9150".to_string());
        machine.on_network(NetworkState::Enabled);
        assert!(machine.addresses().socks.is_some());

        machine.on_network(NetworkState::Disabled);
        assert!(machine.addresses().socks.is_none());

        machine.on_network(NetworkState::Enabled);
        assert_eq!(machine.addresses().socks.as_deref(), Some("127.0.0.1:9150"));
    }
}
