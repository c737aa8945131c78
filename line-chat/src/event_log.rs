use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::Local;
use tracing::{info, warn};

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Append-only, timestamped record of server events.
///
/// Every line lands in the file as `[yyyy/mm/dd hh:mm:ss]event`. Recording is
/// fire-and-forget: a failed write is reported through `tracing` and never
/// reaches the caller, so a broken log file cannot take a session down.
#[derive(Clone, Default)]
pub struct EventLog {
    file: Option<Arc<Mutex<File>>>,
}

impl EventLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// A sink that only forwards to `tracing`.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl AsRef<str>) {
        let event = event.as_ref();
        info!("{event}");
        self.append(event);
    }

    pub fn record_error(&self, event: impl AsRef<str>) {
        let event = event.as_ref();
        warn!("{event}");
        self.append(event);
    }

    fn append(&self, event: &str) {
        let Some(file) = &self.file else {
            return;
        };

        let line = format!("[{}]{event}\n", Local::now().format(TIMESTAMP_FORMAT));
        let mut guard = match file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(error) = guard.write_all(line.as_bytes()) {
            warn!(?error, "unable to write event log entry");
        }
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("enabled", &self.file.is_some())
            .finish()
    }
}
