use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _,
        Peripheral as _, ScanFilter,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::{
    channel::mpsc::{unbounded, UnboundedSender},
    stream::{self, BoxStream, StreamExt},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info};

use crate::{
    address::DeviceAddress,
    error::{Result, TreadmillError},
    transport::{LinkEvent, Transport},
    types::ConnectionConfig,
};

/// [`Transport`] over the host Bluetooth adapter, via `btleplug`
pub struct BtleplugTransport {
    adapter: Adapter,
    peripheral: Arc<Mutex<Option<Peripheral>>>,
    // Feeds `Connected` into the stream handed out by `link_events`.
    link_up: Mutex<Option<UnboundedSender<LinkEvent>>>,
    config: ConnectionConfig,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter of the host
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::AdapterNotFound`] if the host has no adapter,
    /// or [`TreadmillError::Ble`] if the Bluetooth stack cannot be reached.
    pub async fn new(config: ConnectionConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TreadmillError::AdapterNotFound)?;

        Ok(Self {
            adapter,
            peripheral: Arc::new(Mutex::new(None)),
            link_up: Mutex::new(None),
            config,
        })
    }

    /// Find a known peripheral by address, scanning once if it is not known yet
    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Peripheral> {
        let target = BDAddr::from(address.octets());

        if let Some(peripheral) = self.known_peripheral(target).await? {
            return Ok(peripheral);
        }

        debug!("Scanning {}ms for {address}", self.config.scan_timeout_ms);
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_millis(self.config.scan_timeout_ms)).await;
        self.adapter.stop_scan().await?;

        self.known_peripheral(target)
            .await?
            .ok_or_else(|| TreadmillError::DeviceNotFound(address.to_string()))
    }

    async fn known_peripheral(&self, target: BDAddr) -> Result<Option<Peripheral>> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == target))
    }

    async fn current_peripheral(&self) -> Result<Peripheral> {
        self.peripheral
            .lock()
            .await
            .clone()
            .ok_or(TreadmillError::NotConnected)
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Characteristic = Characteristic;

    async fn connect(&self, address: &DeviceAddress) -> Result<()> {
        let peripheral = self.find_peripheral(address).await?;
        *self.peripheral.lock().await = Some(peripheral.clone());

        let timeout_ms = self.config.connect_timeout_ms;
        timeout(Duration::from_millis(timeout_ms), peripheral.connect())
            .await
            .map_err(|_| TreadmillError::Timeout { timeout_ms })?
            .map_err(|e| TreadmillError::ConnectionFailed(e.to_string()))?;

        peripheral.discover_services().await?;

        info!("Connected to {address}");
        if let Some(link_up) = self.link_up.lock().await.as_ref() {
            let _ = link_up.unbounded_send(LinkEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(peripheral) = self.peripheral.lock().await.clone() else {
            return Ok(());
        };

        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral.disconnect().await?;
        }

        Ok(())
    }

    async fn notification_characteristic(&self) -> Result<Characteristic> {
        let peripheral = self.current_peripheral().await?;
        let characteristics = peripheral.characteristics();

        let found = match self.config.notify_characteristic {
            Some(uuid) => characteristics.into_iter().find(|c| c.uuid == uuid),
            None => characteristics
                .into_iter()
                .find(|c| c.properties.contains(CharPropFlags::NOTIFY)),
        };

        found.ok_or(TreadmillError::CharacteristicNotFound)
    }

    async fn start_notifications(&self, characteristic: &Characteristic) -> Result<()> {
        self.current_peripheral()
            .await?
            .subscribe(characteristic)
            .await?;
        Ok(())
    }

    async fn stop_notifications(&self, characteristic: &Characteristic) -> Result<()> {
        self.current_peripheral()
            .await?
            .unsubscribe(characteristic)
            .await?;
        Ok(())
    }

    async fn value_changes(
        &self,
        characteristic: &Characteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>> {
        let uuid = characteristic.uuid;
        let notifications = self.current_peripheral().await?.notifications().await?;

        Ok(notifications
            .filter_map(move |data| async move { (data.uuid == uuid).then_some(data.value) })
            .boxed())
    }

    /// Drops come from the adapter; link-ups are raised by [`Self::connect`]
    ///
    /// The adapter reports `DeviceConnected` before services are discovered,
    /// when the characteristic cannot be looked up yet, so that event is not
    /// forwarded.
    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>> {
        let events = self.adapter.events().await?;
        let peripheral = Arc::clone(&self.peripheral);

        let drops = events.filter_map(move |event| {
            let peripheral = Arc::clone(&peripheral);
            async move {
                let CentralEvent::DeviceDisconnected(id) = event else {
                    return None;
                };

                let bound = peripheral.lock().await.as_ref().map(|p| p.id());
                (bound == Some(id)).then_some(LinkEvent::Disconnected)
            }
        });

        let (link_up, link_ups) = unbounded();
        *self.link_up.lock().await = Some(link_up);

        Ok(stream::select(drops, link_ups).boxed())
    }
}
