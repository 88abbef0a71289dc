use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    stream::{self, BoxStream, PollNext, StreamExt},
};
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    address::DeviceAddress,
    ble::BtleplugTransport,
    error::{Result, TreadmillError},
    protocol,
    transport::{LinkEvent, Transport},
    types::{ConnectionConfig, ConnectionState, TreadmillStatus},
};

/// Observer invoked with every decoded status
///
/// Listeners are identified by `Arc` identity: keep a clone of the handle you
/// registered to remove it later.
pub type StatusListener = Arc<dyn Fn(&TreadmillStatus) + Send + Sync>;

/// Keeps one treadmill connected and fans its status out to listeners
///
/// A manager is bound to a single device address for its whole life. Once the
/// first link-up succeeds it reconnects on its own whenever the link drops, and
/// it keeps hardware notifications enabled only while at least one listener is
/// registered.
///
/// Listeners receive [`TreadmillStatus::Disconnected`] once per link drop and
/// resume receiving decoded frames after the next reconnect.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use treadmill_link::{ConnectionConfig, ConnectionManager, StatusListener, TreadmillStatus};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager =
///         ConnectionManager::connect_bluetooth("C0:11:22:33:44:55", ConnectionConfig::default())
///             .await?;
///
///     let listener: StatusListener = Arc::new(|status: &TreadmillStatus| println!("{status}"));
///     manager.add_listener(Arc::clone(&listener)).await;
///
///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///
///     manager.remove_listener(&listener).await;
///     manager.destroy().await;
///     Ok(())
/// }
/// ```
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

/// Link state; the characteristic only exists while connected
enum Link<C> {
    Idle,
    Connecting,
    Connected(Wiring<C>),
    Destroyed,
}

/// Per-link notification plumbing
struct Wiring<C> {
    characteristic: C,
    value_task: JoinHandle<()>,
    generation: u64,
}

struct Shared<C> {
    link: Link<C>,
    listeners: Vec<StatusListener>,
    // Set from spawn until the loop's link-up has been handled.
    reconnect_task: Option<JoinHandle<()>>,
    event_task: Option<JoinHandle<()>>,
    // Bumped on every wiring; frames carry the one they arrived on.
    generation: u64,
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    address: DeviceAddress,
    config: ConnectionConfig,
    shared: Mutex<Shared<T::Characteristic>>,
    // Effective hardware notification state. Held across start/stop calls so
    // toggles are applied one at a time. Lock before `shared`, never after.
    notifications_enabled: Mutex<bool>,
    state_tx: watch::Sender<ConnectionState>,
    link_up: UnboundedSender<()>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Connect to the treadmill at `address` with default settings
    ///
    /// Resolves once the first link-up has completed. Failed attempts are
    /// retried without limit, so wrap the call in a timeout if you need one.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::InvalidAddress`] without touching the
    /// transport if `address` is malformed, or the transport's error if it
    /// cannot deliver link events.
    pub async fn connect_to(transport: T, address: &str) -> Result<Self> {
        let address = DeviceAddress::from_string(address)?;
        Self::connect_with_config(transport, address, ConnectionConfig::default()).await
    }

    /// Connect to the treadmill at `address` using explicit connection parameters
    ///
    /// # Errors
    ///
    /// Returns the transport's error if it cannot deliver link events, or
    /// [`TreadmillError::Destroyed`] if the manager is torn down before the
    /// first link-up.
    pub async fn connect_with_config(
        transport: T,
        address: DeviceAddress,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let (state_tx, mut state_rx) = watch::channel(ConnectionState::Idle);
        let transport = Arc::new(transport);
        let events = transport.link_events().await?;
        let (link_up, link_ups) = unbounded();

        info!("Connecting to treadmill {address}");

        let inner = Arc::new(Inner {
            transport,
            address,
            config,
            shared: Mutex::new(Shared {
                link: Link::Idle,
                listeners: Vec::new(),
                reconnect_task: None,
                event_task: None,
                generation: 0,
            }),
            notifications_enabled: Mutex::new(false),
            state_tx,
            link_up,
        });

        {
            let mut shared = inner.shared.lock().await;
            shared.event_task = Some(tokio::spawn(run_link_events(
                Arc::downgrade(&inner),
                events,
                link_ups,
            )));
            inner.begin_reconnect(&mut shared);
        }

        // Built before waiting so that dropping this future tears everything down.
        let manager = Self { inner };

        let reached = state_rx
            .wait_for(|state| {
                matches!(state, ConnectionState::Connected | ConnectionState::Destroyed)
            })
            .await
            .map(|state| *state);

        match reached {
            Ok(ConnectionState::Connected) => Ok(manager),
            _ => Err(TreadmillError::Destroyed),
        }
    }

    /// Address this manager is bound to
    #[must_use]
    pub fn address(&self) -> &DeviceAddress {
        &self.inner.address
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every lifecycle state change
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of registered listeners
    pub async fn listener_count(&self) -> usize {
        self.inner.shared.lock().await.listeners.len()
    }

    /// Register a status listener
    ///
    /// The first listener turns hardware notifications on. While the link is
    /// down this is deferred to the next link-up.
    pub async fn add_listener(&self, listener: StatusListener) {
        self.inner.shared.lock().await.listeners.push(listener);
        self.inner.sync_notifications().await;
    }

    /// Remove the first registration of `listener`
    ///
    /// Removing the last listener turns hardware notifications off. Returns
    /// `false` if the listener was not registered.
    pub async fn remove_listener(&self, listener: &StatusListener) -> bool {
        {
            let mut shared = self.inner.shared.lock().await;
            let Some(index) = shared
                .listeners
                .iter()
                .position(|registered| Arc::ptr_eq(registered, listener))
            else {
                return false;
            };
            shared.listeners.remove(index);
        }

        self.inner.sync_notifications().await;
        true
    }

    /// Drop the current link
    ///
    /// Listeners stay registered: they receive [`TreadmillStatus::Disconnected`]
    /// and the manager reconnects as it would after any other drop. Does
    /// nothing once the manager is destroyed.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the disconnect request fails.
    pub async fn disconnect(&self) -> Result<()> {
        if self.state() == ConnectionState::Destroyed {
            return Ok(());
        }

        info!("Disconnecting from {}", self.inner.address);
        self.inner.transport.disconnect().await
    }

    /// Stop reconnecting, release the link and the transport
    ///
    /// Safe to call more than once.
    pub async fn destroy(&self) {
        self.inner.shutdown().await;
    }
}

impl ConnectionManager<BtleplugTransport> {
    /// Connect through the host's first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::InvalidAddress`] for a malformed address, or
    /// the adapter error if Bluetooth is unavailable.
    pub async fn connect_bluetooth(address: &str, config: ConnectionConfig) -> Result<Self> {
        let address = DeviceAddress::from_string(address)?;
        let transport = BtleplugTransport::new(config.clone()).await?;
        Self::connect_with_config(transport, address, config).await
    }
}

impl<T: Transport> fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.inner);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                inner.shutdown().await;
            });
        }
    }
}

impl<T: Transport> Inner<T> {
    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Enter `Connecting` and make sure exactly one reconnect loop runs
    ///
    /// A loop counts as in flight until its link-up has been handled by
    /// [`Inner::on_connected`], so a loop that has returned but whose link-up
    /// is still queued is never doubled.
    fn begin_reconnect(&self, shared: &mut Shared<T::Characteristic>) {
        match std::mem::replace(&mut shared.link, Link::Connecting) {
            Link::Destroyed => {
                shared.link = Link::Destroyed;
                return;
            }
            Link::Connected(wiring) => wiring.value_task.abort(),
            Link::Idle | Link::Connecting => {}
        }
        self.publish(ConnectionState::Connecting);

        if shared.reconnect_task.is_some() {
            debug!("Reconnect to {} already in flight", self.address);
            return;
        }

        shared.reconnect_task = Some(tokio::spawn(reconnect_loop(
            Arc::clone(&self.transport),
            self.address.clone(),
            self.config.reconnect_delay(),
            self.link_up.clone(),
        )));
    }

    /// Wire a fresh link
    ///
    /// `from_attempt` is set when our own connect attempt returned `Ok`. A
    /// transport event alone is ignored while an attempt is still running:
    /// the attempt reports the link-up itself once `connect` has finished.
    async fn on_connected(self: &Arc<Self>, from_attempt: bool) {
        {
            let mut shared = self.shared.lock().await;
            match shared.link {
                Link::Destroyed => return,
                Link::Connected(_) => {
                    debug!("Link to {} is already wired", self.address);
                    return;
                }
                Link::Idle | Link::Connecting => {}
            }

            if !from_attempt && shared.reconnect_task.is_some() {
                debug!("Link-up for {} reported before the attempt finished", self.address);
                return;
            }

            // The attempt is over; a failure below starts a new one.
            if let Some(task) = shared.reconnect_task.take() {
                task.abort();
            }
        }

        // A fresh link starts with notifications off.
        *self.notifications_enabled.lock().await = false;

        let characteristic = match self.transport.notification_characteristic().await {
            Ok(characteristic) => characteristic,
            Err(e) => {
                warn!("Link to {} is up but unusable: {e}", self.address);
                self.recover().await;
                return;
            }
        };

        let values = match self.transport.value_changes(&characteristic).await {
            Ok(values) => values,
            Err(e) => {
                warn!("Cannot listen for notifications from {}: {e}", self.address);
                self.recover().await;
                return;
            }
        };

        {
            let mut shared = self.shared.lock().await;
            if matches!(shared.link, Link::Destroyed) {
                return;
            }

            shared.generation = shared.generation.wrapping_add(1);
            let generation = shared.generation;
            let value_task = tokio::spawn(run_value_changes(
                Arc::downgrade(self),
                values,
                generation,
            ));
            let wiring = Wiring {
                characteristic,
                value_task,
                generation,
            };
            let previous = std::mem::replace(&mut shared.link, Link::Connected(wiring));
            if let Link::Connected(stale) = previous {
                stale.value_task.abort();
            }

            self.publish(ConnectionState::Connected);
        }

        info!("Link to {} is up", self.address);
        self.sync_notifications().await;
    }

    async fn on_disconnected(&self) {
        let (wiring, listeners) = {
            let mut shared = self.shared.lock().await;
            if matches!(shared.link, Link::Destroyed) {
                return;
            }

            let wiring = match std::mem::replace(&mut shared.link, Link::Connecting) {
                Link::Connected(wiring) => Some(wiring),
                _ => None,
            };
            (wiring, shared.listeners.clone())
        };

        warn!("Link to {} dropped", self.address);

        if let Some(wiring) = wiring {
            self.release(wiring).await;
        }

        for listener in &listeners {
            listener(&TreadmillStatus::Disconnected);
        }

        let mut shared = self.shared.lock().await;
        self.begin_reconnect(&mut shared);
    }

    /// Recycle a link that came up without a usable characteristic
    async fn recover(&self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!("Disconnect of unusable link failed: {e}");
        }

        let mut shared = self.shared.lock().await;
        self.begin_reconnect(&mut shared);
    }

    /// Unhook a link's value listener and turn its notifications off
    async fn release(&self, wiring: Wiring<T::Characteristic>) {
        wiring.value_task.abort();

        let mut enabled = self.notifications_enabled.lock().await;
        if *enabled {
            if let Err(e) = self.transport.stop_notifications(&wiring.characteristic).await {
                debug!("Stopping notifications on a dropped link failed: {e}");
            }
            *enabled = false;
        }
    }

    /// Bring hardware notifications in line with the listener registry
    ///
    /// The target is read under the registry lock while the toggle lock is
    /// held, so concurrent callers always converge on the latest registry
    /// contents whatever order they run in.
    async fn sync_notifications(&self) {
        let mut enabled = self.notifications_enabled.lock().await;

        let (enable, characteristic) = {
            let shared = self.shared.lock().await;
            let wanted = !shared.listeners.is_empty();
            if *enabled == wanted {
                return;
            }

            let Link::Connected(wiring) = &shared.link else {
                debug!("Link down, notification toggle deferred");
                return;
            };
            (wanted, wiring.characteristic.clone())
        };

        let result = if enable {
            self.transport.start_notifications(&characteristic).await
        } else {
            self.transport.stop_notifications(&characteristic).await
        };

        match result {
            Ok(()) => {
                debug!(
                    "Notifications {} on {}",
                    if enable { "enabled" } else { "disabled" },
                    self.address
                );
                *enabled = enable;
            }
            Err(e) => warn!("Failed to toggle notifications on {}: {e}", self.address),
        }
    }

    /// Hand a decoded frame from link `generation` to every listener
    ///
    /// Listeners run under the registry lock, so a frame from a link that has
    /// been released can never reach them after its `Disconnected`.
    async fn dispatch(&self, status: &TreadmillStatus, generation: u64) {
        let shared = self.shared.lock().await;
        match &shared.link {
            Link::Connected(wiring) if wiring.generation == generation => {}
            _ => {
                trace!("Dropping {status} from retired link {generation}");
                return;
            }
        }

        for listener in &shared.listeners {
            listener(status);
        }
    }

    async fn shutdown(&self) {
        let (wiring, tasks) = {
            let mut shared = self.shared.lock().await;
            let wiring = match std::mem::replace(&mut shared.link, Link::Destroyed) {
                Link::Destroyed => return,
                Link::Connected(wiring) => Some(wiring),
                Link::Idle | Link::Connecting => None,
            };
            (wiring, [shared.event_task.take(), shared.reconnect_task.take()])
        };

        self.publish(ConnectionState::Destroyed);

        for task in tasks.into_iter().flatten() {
            task.abort();
        }

        if let Some(wiring) = wiring {
            self.release(wiring).await;
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect during teardown failed: {e}");
        }

        info!("Connection manager for {} destroyed", self.address);
    }
}

/// Input of the event task
enum Signal {
    Transport(LinkEvent),
    AttemptSucceeded,
}

/// Process link events one at a time, in delivery order
///
/// Transport events already queued are handled before a reconnect loop's
/// link-up, so a drop reported ahead of the attempt is never applied to the
/// link that attempt brings up.
async fn run_link_events<T: Transport>(
    inner: Weak<Inner<T>>,
    events: BoxStream<'static, LinkEvent>,
    link_ups: UnboundedReceiver<()>,
) {
    let mut signals = stream::select_with_strategy(
        events.map(Signal::Transport),
        link_ups.map(|()| Signal::AttemptSucceeded),
        |_: &mut ()| PollNext::Left,
    );

    while let Some(signal) = signals.next().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match signal {
            Signal::Transport(event) => {
                debug!("Link event for {}: {event:?}", inner.address);
                match event {
                    LinkEvent::Connected => inner.on_connected(false).await,
                    LinkEvent::Disconnected => inner.on_disconnected().await,
                }
            }
            Signal::AttemptSucceeded => inner.on_connected(true).await,
        }
    }

    debug!("Link event stream ended");
}

async fn run_value_changes<T: Transport>(
    inner: Weak<Inner<T>>,
    mut values: BoxStream<'static, Vec<u8>>,
    generation: u64,
) {
    while let Some(data) = values.next().await {
        let Some(status) = protocol::decode(&data) else {
            trace!("Ignoring frame {data:02X?}");
            continue;
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch(&status, generation).await;
    }
}

async fn reconnect_loop<T: Transport>(
    transport: Arc<T>,
    address: DeviceAddress,
    delay: Duration,
    link_up: UnboundedSender<()>,
) {
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        debug!("Connect attempt {attempt} to {address}");

        match transport.connect(&address).await {
            Ok(()) => {
                let _ = link_up.unbounded_send(());
                return;
            }
            Err(e) => {
                debug!("Connect attempt {attempt} to {address} failed: {e}");
                if let Err(e) = transport.disconnect().await {
                    debug!("Cleanup after failed attempt failed: {e}");
                }
            }
        }

        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}
