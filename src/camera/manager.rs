use std::sync::Arc;

use facegate_vision::capture::DriverOptions;
use facegate_vision::{CameraSource, DriverSet, Frame};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{CameraStream, ConnectReport, Role, ServiceRestarter};
use crate::config::CameraConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CameraStatus {
    pub entry_connected: bool,
    pub exit_connected: bool,
}

/// Per-role outcome of `configure`; `None` for roles left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigureReport {
    pub entry: Option<bool>,
    pub exit: Option<bool>,
}

impl ConfigureReport {
    pub fn success(&self) -> bool {
        self.entry.unwrap_or(true) && self.exit.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub entry_connected: bool,
    pub exit_connected: bool,
    pub service_restart_attempted: bool,
    pub service_restart_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableCamera {
    pub index: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// False while one of our own streams holds the device.
    pub available: bool,
}

type StreamGuard = OwnedMutexGuard<CameraStream>;

/// Owns the entry and exit streams.
///
/// Each stream has its own lock, so work on one role never waits for the
/// other. All device I/O happens on the blocking pool.
pub struct CameraManager {
    drivers: DriverSet,
    entry: Arc<Mutex<CameraStream>>,
    exit: Arc<Mutex<CameraStream>>,
    /// Held for a whole reset, so two recoveries never interleave.
    recovery: Mutex<()>,
    probe_limit: u32,
    restarter: ServiceRestarter,
}

impl CameraManager {
    pub fn new(drivers: DriverSet, entry: CameraSource, exit: CameraSource) -> Self {
        Self {
            drivers,
            entry: Arc::new(Mutex::new(CameraStream::new(Role::Entry, entry))),
            exit: Arc::new(Mutex::new(CameraStream::new(Role::Exit, exit))),
            recovery: Mutex::new(()),
            probe_limit: 10,
            restarter: ServiceRestarter::platform(std::time::Duration::from_secs(10)),
        }
    }

    pub fn from_config(cfg: &CameraConfig) -> Self {
        let drivers = DriverSet::platform(DriverOptions {
            ffmpeg: cfg.ffmpeg.clone(),
            timeout: cfg.network_timeout(),
            read_timeout: cfg.read_timeout(),
        });
        Self::new(drivers, cfg.entry.clone(), cfg.exit.clone())
            .with_probe_limit(cfg.probe_limit)
            .with_restarter(ServiceRestarter::platform(cfg.recovery_timeout()))
    }

    pub fn with_probe_limit(mut self, limit: u32) -> Self {
        self.probe_limit = limit;
        self
    }

    pub fn with_restarter(mut self, restarter: ServiceRestarter) -> Self {
        self.restarter = restarter;
        self
    }

    fn stream(&self, role: Role) -> Arc<Mutex<CameraStream>> {
        match role {
            Role::Entry => self.entry.clone(),
            Role::Exit => self.exit.clone(),
        }
    }

    async fn lock(&self, role: Role) -> StreamGuard {
        self.stream(role).lock_owned().await
    }

    /// Run `f` on an already locked stream from the blocking pool and hand
    /// the guard back.
    async fn on_guard<T, F>(&self, role: Role, mut guard: StreamGuard, f: F) -> Option<(StreamGuard, T)>
    where
        F: FnOnce(&mut CameraStream, &DriverSet) -> T + Send + 'static,
        T: Send + 'static,
    {
        let drivers = self.drivers.clone();
        let result = tokio::task::spawn_blocking(move || {
            let value = f(&mut *guard, &drivers);
            (guard, value)
        })
        .await;
        match result {
            Ok(pair) => Some(pair),
            Err(err) => {
                log::error!("{} camera worker failed: {}", role, err);
                None
            }
        }
    }

    /// Run `f` on a role's stream from the blocking pool, holding its lock.
    async fn with_stream<T, F>(&self, role: Role, f: F) -> Option<T>
    where
        F: FnOnce(&mut CameraStream, &DriverSet) -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.lock(role).await;
        self.on_guard(role, guard, f).await.map(|(_, value)| value)
    }

    pub async fn connect(&self, role: Role) -> ConnectReport {
        self.with_stream(role, |stream, drivers| stream.connect(drivers))
            .await
            .unwrap_or(ConnectReport {
                connected: false,
                attempts: Vec::new(),
            })
    }

    pub async fn connect_all(&self) -> CameraStatus {
        let (entry, exit) = tokio::join!(self.connect(Role::Entry), self.connect(Role::Exit));
        CameraStatus {
            entry_connected: entry.connected,
            exit_connected: exit.connected,
        }
    }

    pub async fn get_frame(&self, role: Role) -> Option<Frame> {
        self.with_stream(role, |stream, _| stream.read()).await.flatten()
    }

    /// Bind `role` to a new source and connect it.
    pub async fn reconfigure(&self, role: Role, source: CameraSource) -> bool {
        self.with_stream(role, move |stream, drivers| {
            stream.rebind(source);
            stream.connect(drivers).connected
        })
        .await
        .unwrap_or(false)
    }

    pub async fn configure(
        &self,
        entry: Option<CameraSource>,
        exit: Option<CameraSource>,
    ) -> ConfigureReport {
        let entry_fut = async move {
            match entry {
                Some(source) => Some(self.reconfigure(Role::Entry, source).await),
                None => None,
            }
        };
        let exit_fut = async move {
            match exit {
                Some(source) => Some(self.reconfigure(Role::Exit, source).await),
                None => None,
            }
        };
        let (entry, exit) = tokio::join!(entry_fut, exit_fut);
        if entry == Some(false) || exit == Some(false) {
            log::warn!("camera configure incomplete: entry={:?} exit={:?}", entry, exit);
        }
        ConfigureReport { entry, exit }
    }

    /// Disconnect, optionally run OS recovery, then reconnect.
    ///
    /// Roles given a new source are rebound to it; with no sources given both
    /// roles are reset on their current sources. The targeted roles stay
    /// locked from disconnect to reconnect. With `restart_services` the other
    /// role's local device is released for the duration too, since the
    /// driver cannot be unloaded while we hold it.
    pub async fn reset(
        &self,
        entry: Option<CameraSource>,
        exit: Option<CameraSource>,
        restart_services: bool,
    ) -> ResetReport {
        let _recovery = self.recovery.lock().await;

        let mut targets = [(Role::Entry, entry), (Role::Exit, exit)];
        let everything = targets.iter().all(|(_, source)| source.is_none());

        // Locked in `Role::ALL` order; (guard, reconnect afterwards).
        let mut held: Vec<(Role, StreamGuard, bool)> = Vec::new();
        let mut indices = Vec::new();
        for (role, source) in targets.iter_mut() {
            let role = *role;
            let targeted = everything || source.is_some();
            if !targeted && !restart_services {
                continue;
            }
            let source = source.take();
            let guard = self.lock(role).await;
            let released = self
                .on_guard(role, guard, move |stream, _| {
                    let local = stream.source().local_index().is_some();
                    if targeted {
                        match source {
                            Some(source) => stream.rebind(source),
                            None => stream.disconnect(),
                        }
                        return (true, true, stream.source().local_index());
                    }
                    let was_connected = stream.is_connected();
                    if local {
                        stream.disconnect();
                    }
                    (local, local && was_connected, None)
                })
                .await;
            if let Some((guard, (hold, reconnect, index))) = released {
                indices.extend(index);
                if hold {
                    held.push((role, guard, reconnect));
                }
            }
        }

        let mut report = ResetReport {
            entry_connected: false,
            exit_connected: false,
            service_restart_attempted: restart_services,
            service_restart_success: false,
            service_error: None,
        };
        if restart_services {
            match self.restarter.restart(&indices).await {
                Ok(()) => report.service_restart_success = true,
                Err(err) => {
                    log::warn!("camera service recovery failed: {:#}", err);
                    report.service_error = Some(format!("{:#}", err));
                }
            }
        }

        for (role, guard, reconnect) in held {
            if reconnect {
                self.on_guard(role, guard, |stream, drivers| stream.connect(drivers))
                    .await;
            }
        }

        let status = self.status().await;
        report.entry_connected = status.entry_connected;
        report.exit_connected = status.exit_connected;
        report
    }

    /// Release both handles. Safe to call more than once.
    pub async fn shutdown(&self) {
        for role in Role::ALL {
            self.with_stream(role, |stream, _| stream.disconnect()).await;
        }
    }

    /// The source `role` is currently bound to.
    pub async fn source(&self, role: Role) -> CameraSource {
        self.stream(role).lock().await.source().clone()
    }

    pub async fn status(&self) -> CameraStatus {
        let entry = self.with_stream(Role::Entry, |s, _| s.is_connected()).await;
        let exit = self.with_stream(Role::Exit, |s, _| s.is_connected()).await;
        CameraStatus {
            entry_connected: entry.unwrap_or(false),
            exit_connected: exit.unwrap_or(false),
        }
    }

    /// Probe local indices with the primary driver; unreachable ones are left out.
    pub async fn list_available(&self) -> Vec<AvailableCamera> {
        let mut held = Vec::new();
        for role in Role::ALL {
            let index = self
                .with_stream(role, |s, _| {
                    if s.is_connected() {
                        s.source().local_index()
                    } else {
                        None
                    }
                })
                .await
                .flatten();
            held.extend(index);
        }

        let Some(driver) = self.drivers.primary().cloned() else {
            log::warn!("no local capture driver on this platform");
            return Vec::new();
        };
        let limit = self.probe_limit;
        let probed = tokio::task::spawn_blocking(move || {
            (0..limit)
                .filter_map(|index| match driver.describe(index) {
                    Ok(info) => Some(info),
                    Err(err) => {
                        log::debug!("camera index {} unavailable: {:#}", index, err);
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .await;

        match probed {
            Ok(devices) => devices
                .into_iter()
                .map(|info| AvailableCamera {
                    available: !held.contains(&info.index),
                    index: info.index,
                    name: info.name,
                    kind: info.kind,
                })
                .collect(),
            Err(err) => {
                log::error!("camera probe failed: {}", err);
                Vec::new()
            }
        }
    }
}
