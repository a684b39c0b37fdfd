use std::future::Future;
use std::time::{Duration, Instant};

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};

use super::discovery::{DeviceRecord, Discovery, DiscoveryEvent, DiscoveryPolicy, DiscoverySnapshot};
use super::error::{classify_write_error, TransportError, WriteFailure};
use super::hex;
use crate::report::Reporter;

/// How long `connect` keeps scanning for an id the adapter has not seen yet.
const CONNECT_SCAN: Duration = Duration::from_secs(5);
const CONNECT_POLL: Duration = Duration::from_millis(250);

/// Device + service + characteristic triple verified to accept writes.
#[derive(Clone, Debug)]
pub struct CompatibleEndpoint {
    pub device_id: String,
    pub device_name: String,
    pub characteristic: Characteristic,
}

impl CompatibleEndpoint {
    pub fn service_name(&self) -> String {
        self.characteristic.service_uuid.to_string()
    }

    pub fn characteristic_name(&self) -> String {
        self.characteristic.uuid.to_string()
    }
}

/// BLE link over the first platform adapter.
pub struct Transport {
    adapter: Adapter,
    reporter: Reporter,
}

impl Transport {
    pub async fn open(reporter: Reporter) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        if let Ok(info) = adapter.adapter_info().await {
            log::debug!("Using Bluetooth adapter {}", info);
        }

        Ok(Self { adapter, reporter })
    }

    /// Scans for `duration` (or until Ctrl-C) and returns what was seen.
    pub async fn discover(
        &self,
        duration: Duration,
        policy: DiscoveryPolicy,
    ) -> Result<DiscoverySnapshot, TransportError> {
        self.reporter.pending("Discovery in progress...");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = tokio::spawn(watch_advertisements(self.adapter.clone(), tx, duration));

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));

        let mut discovery = Discovery::new(policy, self.reporter.nested());
        discovery
            .drain(&mut rx, |visible| {
                spinner.set_message(format!("{} device(s) visible", visible));
            })
            .await;
        spinner.finish_and_clear();

        match watcher.await {
            Ok(Err(err)) => self.reporter.warn(format!("Scanner reported: {}", err)),
            Err(err) => self.reporter.warn(format!("Scanner task failed: {}", err)),
            Ok(Ok(())) => {}
        }

        Ok(discovery.finish())
    }

    /// Resolves a device by id and opens the link.
    pub async fn connect(&self, id: &str) -> Result<Peripheral, TransportError> {
        let peripheral = match self.find_peripheral(id).await? {
            Some(peripheral) => peripheral,
            None => {
                self.adapter.start_scan(ScanFilter::default()).await?;
                let found = self.wait_for(id, CONNECT_SCAN).await;
                if let Err(err) = self.adapter.stop_scan().await {
                    log::debug!("stop_scan failed: {}", err);
                }
                found.ok_or_else(|| TransportError::NotFound(id.to_string()))?
            }
        };

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|err| TransportError::Unreachable {
                    id: id.to_string(),
                    reason: err.to_string(),
                })?;
        }

        Ok(peripheral)
    }

    /// Fresh (uncached) GATT service discovery.
    pub async fn list_services(&self, device: &Peripheral) -> Result<Vec<Service>, TransportError> {
        device
            .discover_services()
            .await
            .map_err(|err| TransportError::Communication(err.to_string()))?;
        Ok(device.services().into_iter().collect())
    }

    /// Checks the link first, then re-enumerates the service's characteristics.
    pub async fn list_characteristics(
        &self,
        device: &Peripheral,
        service: &Service,
    ) -> Result<Vec<Characteristic>, TransportError> {
        match device.is_connected().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(TransportError::AccessDenied(
                    "link to the device is closed".into(),
                ))
            }
            Err(err) => return Err(TransportError::from_enumeration(err)),
        }

        device
            .discover_services()
            .await
            .map_err(TransportError::from_enumeration)?;

        let refreshed = device
            .services()
            .into_iter()
            .find(|s| s.uuid == service.uuid)
            .ok_or_else(|| {
                TransportError::Communication(format!("service {} is gone", service.uuid))
            })?;

        Ok(refreshed.characteristics.into_iter().collect())
    }

    /// Walks the services in order and returns the first writable
    /// characteristic, honoring explicit service/characteristic ids.
    pub async fn find_endpoint(
        &self,
        device: &Peripheral,
        services: &[Service],
        wanted_service: Option<&str>,
        wanted_characteristic: Option<&str>,
    ) -> Option<CompatibleEndpoint> {
        let reporter = self.reporter.nested();

        for service in services {
            if let Some(wanted) = wanted_service {
                if !service.uuid.to_string().eq_ignore_ascii_case(wanted) {
                    continue;
                }
            }

            reporter.pending(format!("Looking for characteristics of {}", service.uuid));
            let characteristics = match self.list_characteristics(device, service).await {
                Ok(characteristics) => characteristics,
                Err(err) => {
                    report_enumeration_error(&reporter, &err);
                    continue;
                }
            };

            reporter.ok(format!("Found {} characteristic(s)", characteristics.len()));
            let listed = reporter.nested();
            for characteristic in &characteristics {
                listed.ok(format!(
                    "Characteristic: {} {:?}",
                    characteristic.uuid, characteristic.properties
                ));
            }

            if let Some(characteristic) = pick_characteristic(&characteristics, wanted_characteristic) {
                let device_name = device
                    .properties()
                    .await
                    .ok()
                    .flatten()
                    .and_then(|p| p.local_name)
                    .unwrap_or_default();
                return Some(CompatibleEndpoint {
                    device_id: device_id(device),
                    device_name,
                    characteristic: characteristic.clone(),
                });
            }
        }

        None
    }

    pub async fn disconnect(&self, device: &Peripheral) {
        if let Err(err) = device.disconnect().await {
            self.reporter.warn(format!("Disconnect failed: {}", err));
        }
    }

    async fn find_peripheral(&self, id: &str) -> Result<Option<Peripheral>, TransportError> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| device_id(p).eq_ignore_ascii_case(id)))
    }

    async fn wait_for(&self, id: &str, timeout: Duration) -> Option<Peripheral> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(peripheral)) = self.find_peripheral(id).await {
                return Some(peripheral);
            }
            tokio::time::sleep(CONNECT_POLL).await;
        }
        None
    }
}

/// Writes `hex` to one characteristic of one device. Cloned into every
/// detached write task.
#[derive(Clone)]
pub struct LedWriter {
    device: Peripheral,
    characteristic: Characteristic,
    runtime: Handle,
    reporter: Reporter,
}

impl LedWriter {
    pub fn new(
        device: Peripheral,
        endpoint: &CompatibleEndpoint,
        runtime: Handle,
        reporter: Reporter,
    ) -> Self {
        Self {
            device,
            characteristic: endpoint.characteristic.clone(),
            runtime,
            reporter,
        }
    }

    /// Runs the write on the runtime without waiting for it.
    pub fn spawn_write(&self, hex: String) {
        let writer = self.clone();
        self.runtime.spawn(async move {
            writer.write_hex(&hex).await;
        });
    }

    /// Decodes and writes; every failure is logged and swallowed.
    pub async fn write_hex(&self, hex: &str) -> bool {
        match try_write_hex(&self.device, hex, &self.characteristic).await {
            Ok(()) => true,
            Err(failure) if failure.is_rejection() => {
                self.reporter.error(format!("Write rejected: {}", failure));
                false
            }
            Err(failure) => {
                self.reporter.warn(format!("Write failed: {}", failure));
                false
            }
        }
    }
}

pub async fn try_write_hex(
    device: &Peripheral,
    hex: &str,
    characteristic: &Characteristic,
) -> Result<(), WriteFailure> {
    let payload = hex::decode(hex)?;
    device
        .write(characteristic, &payload, WriteType::WithResponse)
        .await
        .map_err(|err| classify_write_error(&err))?;
    log::trace!("wrote {} to {}", hex::encode(&payload), characteristic.uuid);
    Ok(())
}

pub fn is_writable(characteristic: &Characteristic) -> bool {
    characteristic
        .properties
        .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
}

/// The requested characteristic if given (it must still be writable),
/// otherwise the first writable one.
pub fn pick_characteristic<'a>(
    characteristics: &'a [Characteristic],
    wanted: Option<&str>,
) -> Option<&'a Characteristic> {
    characteristics.iter().find(|c| {
        is_writable(c)
            && wanted.map_or(true, |w| c.uuid.to_string().eq_ignore_ascii_case(w))
    })
}

/// Lowercase Bluetooth address, or the platform id where addresses are hidden.
pub fn device_id(peripheral: &Peripheral) -> String {
    let address = peripheral.address().to_string().to_lowercase();
    if address == "00:00:00:00:00:00" {
        format!("{:?}", peripheral.id())
    } else {
        address
    }
}

fn report_enumeration_error(reporter: &Reporter, err: &TransportError) {
    match err {
        TransportError::AccessDenied(reason) => {
            reporter.error(format!("Error accessing device: access not granted ({})", reason))
        }
        TransportError::Restricted(reason) => reporter.error(format!(
            "Restricted service. Can't read characteristics: {}",
            reason
        )),
        other => reporter.error(format!("Error accessing device: {}", other)),
    }
}

async fn watch_advertisements(
    adapter: Adapter,
    tx: UnboundedSender<DiscoveryEvent>,
    duration: Duration,
) -> Result<(), btleplug::Error> {
    let events = adapter.events().await?;
    adapter.start_scan(ScanFilter::default()).await?;

    let interrupted = async {
        // Without a signal handler only the deadline ends the scan.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let source = &adapter;
    let end = pump_events(
        events,
        duration,
        interrupted,
        move |event| translate(source, event),
        &tx,
    )
    .await;

    let stopped = adapter.stop_scan().await;
    let _ = tx.send(end);
    stopped
}

/// Forwards translated events until `duration` elapses, `stop` resolves or
/// the stream ends. Returns the event that closes the scan. `stop` is polled
/// across iterations, so it is not missed while a translation is running.
async fn pump_events<S, T, F, Fut>(
    mut events: S,
    duration: Duration,
    stop: impl Future<Output = ()>,
    mut translate: F,
    tx: &UnboundedSender<DiscoveryEvent>,
) -> DiscoveryEvent
where
    S: Stream<Item = T> + Unpin,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Option<DiscoveryEvent>>,
{
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut deadline => return DiscoveryEvent::Completed,
            _ = &mut stop => return DiscoveryEvent::Stopped,
            event = events.next() => match event {
                Some(event) => {
                    if let Some(translated) = translate(event).await {
                        if tx.send(translated).is_err() {
                            return DiscoveryEvent::Stopped;
                        }
                    }
                }
                None => return DiscoveryEvent::Completed,
            },
        }
    }
}

async fn translate(adapter: &Adapter, event: CentralEvent) -> Option<DiscoveryEvent> {
    match event {
        CentralEvent::DeviceDiscovered(id) => describe(adapter, &id).await.map(DiscoveryEvent::Added),
        CentralEvent::DeviceUpdated(id) => describe(adapter, &id).await.map(DiscoveryEvent::Updated),
        CentralEvent::DeviceDisconnected(id) => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            Some(DiscoveryEvent::Removed(device_id(&peripheral)))
        }
        _ => None,
    }
}

async fn describe(adapter: &Adapter, id: &PeripheralId) -> Option<DeviceRecord> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let name = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|p| p.local_name)
        .unwrap_or_default();
    Some(DeviceRecord::new(device_id(&peripheral), name))
}
