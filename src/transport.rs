use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{address::DeviceAddress, error::Result};

/// Link lifecycle events raised by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The device finished a link-up and its services can be looked up
    Connected,
    /// The link to the device dropped, expectedly or not
    Disconnected,
}

/// Wireless link to a single treadmill
///
/// [`ConnectionManager`](crate::ConnectionManager) drives this; implementations
/// only move bytes and report link changes. All methods may be called from any
/// task, in any state, and must not panic when the link is down.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Handle to the characteristic that carries status notifications
    type Characteristic: Clone + Send + Sync + 'static;

    /// Try once to establish a link to `address`
    ///
    /// Returns `Ok` only once the link is usable, with services discovered.
    /// The manager treats that return as the link-up; a
    /// [`LinkEvent::Connected`] raised while this call is still running is
    /// ignored.
    async fn connect(&self, address: &DeviceAddress) -> Result<()>;

    /// Tear the link down; succeeds when already disconnected
    async fn disconnect(&self) -> Result<()>;

    /// Look up the notification characteristic on the current link
    ///
    /// Handles are not stable across reconnects and must be fetched again
    /// after every link-up.
    async fn notification_characteristic(&self) -> Result<Self::Characteristic>;

    /// Ask the device to start sending notifications
    async fn start_notifications(&self, characteristic: &Self::Characteristic) -> Result<()>;

    /// Ask the device to stop sending notifications
    async fn stop_notifications(&self, characteristic: &Self::Characteristic) -> Result<()>;

    /// Raw values notified on `characteristic` for the lifetime of the current link
    async fn value_changes(
        &self,
        characteristic: &Self::Characteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>>;

    /// Connect and disconnect events for the bound device, in delivery order
    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>>;
}
