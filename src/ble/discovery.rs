use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::report::Reporter;

/// One advertised device as seen by the scanner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
}

impl DeviceRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "?"
        } else {
            &self.name
        }
    }
}

/// Typed watcher events, queued in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(DeviceRecord),
    Updated(DeviceRecord),
    Removed(String),
    Completed,
    Stopped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryPolicy {
    /// Upsert by id, delete on removal. The snapshot is what is currently visible.
    #[default]
    Keyed,
    /// Keep every device that reported a non-empty name at least once.
    RetainNamed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryEnd {
    Completed,
    Stopped,
}

/// Immutable result of a finished scan.
#[derive(Clone, Debug)]
pub struct DiscoverySnapshot {
    pub devices: Vec<DeviceRecord>,
    pub end: DiscoveryEnd,
}

/// Folds watcher events into a device list. Closed for mutation once the
/// scan completes or is stopped.
#[derive(Debug)]
pub struct Discovery {
    policy: DiscoveryPolicy,
    reporter: Reporter,
    visible: Vec<DeviceRecord>,
    named: Vec<DeviceRecord>,
    end: Option<DiscoveryEnd>,
}

impl Discovery {
    pub fn new(policy: DiscoveryPolicy, reporter: Reporter) -> Self {
        Self {
            policy,
            reporter,
            visible: Vec::new(),
            named: Vec::new(),
            end: None,
        }
    }

    pub fn has_ended(&self) -> bool {
        self.end.is_some()
    }

    /// Applies one event. Returns true once the scan has ended.
    pub fn apply(&mut self, event: DiscoveryEvent) -> bool {
        if self.has_ended() {
            return true;
        }

        match event {
            DiscoveryEvent::Added(record) => {
                if find(&self.visible, &record.id).is_none() {
                    self.reporter.ok(format!(
                        "Device \"{}\" added, id={}",
                        record.display_name(),
                        record.id
                    ));
                }
                self.upsert(record);
            }
            DiscoveryEvent::Updated(record) => {
                log::debug!("Device \"{}\" updated, id={}", record.display_name(), record.id);
                self.upsert(record);
            }
            DiscoveryEvent::Removed(id) => {
                if let Some(index) = find(&self.visible, &id) {
                    let record = self.visible.remove(index);
                    self.reporter.ok(format!(
                        "Device \"{}\" removed, id={}",
                        record.display_name(),
                        record.id
                    ));
                }
            }
            DiscoveryEvent::Completed => self.end = Some(DiscoveryEnd::Completed),
            DiscoveryEvent::Stopped => self.end = Some(DiscoveryEnd::Stopped),
        }

        self.has_ended()
    }

    /// Drains the queue until the scan ends or the sender goes away.
    /// `progress` sees the visible device count after every event.
    pub async fn drain(
        &mut self,
        events: &mut UnboundedReceiver<DiscoveryEvent>,
        mut progress: impl FnMut(usize),
    ) {
        while let Some(event) = events.recv().await {
            let ended = self.apply(event);
            progress(self.visible.len());
            if ended {
                return;
            }
        }
        self.apply(DiscoveryEvent::Stopped);
    }

    /// Closes the scan (as stopped, if it has not ended yet) and returns the snapshot.
    pub fn finish(mut self) -> DiscoverySnapshot {
        let end = *self.end.get_or_insert(DiscoveryEnd::Stopped);
        let devices = match self.policy {
            DiscoveryPolicy::Keyed => self.visible,
            DiscoveryPolicy::RetainNamed => self.named,
        };

        match end {
            DiscoveryEnd::Completed => self
                .reporter
                .ok(format!("Discovery ended, {} device(s) found", devices.len())),
            DiscoveryEnd::Stopped => self
                .reporter
                .ok(format!("Discovery stopped, {} device(s) found", devices.len())),
        }

        DiscoverySnapshot { devices, end }
    }

    fn upsert(&mut self, record: DeviceRecord) {
        if !record.name.is_empty() {
            match find(&self.named, &record.id) {
                Some(index) => self.named[index].name = record.name.clone(),
                None => self.named.push(record.clone()),
            }
        }

        match find(&self.visible, &record.id) {
            Some(index) => self.visible[index] = record,
            None => self.visible.push(record),
        }
    }
}

fn find(records: &[DeviceRecord], id: &str) -> Option<usize> {
    records.iter().position(|r| r.id.eq_ignore_ascii_case(id))
}
