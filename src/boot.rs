//! Boot sequence and wiring (spec §4.10): brings up logging, mounts
//! persistence, constructs the arbiter/registry/event store, starts the
//! task-pool worker, and hands back a [`Handle`] the REST layer and the
//! daemon entry point drive.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use resource_hal::Arbiter;
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::schedule::{Schedule, WeekClock};
use crate::store::EventStore;
use crate::switch::SwitchController;
use crate::task_pool::{SystemClock, TaskPool, TaskTracker};

fn default_tz() -> String {
    "UTC".to_string()
}
fn default_ntp_peer() -> String {
    "pool.ntp.org".to_string()
}
fn default_hostname() -> String {
    "aquacore".to_string()
}
fn default_mount_path() -> PathBuf {
    PathBuf::from("/mnt/values")
}
fn default_tick_interval_secs() -> f64 {
    2.0
}

/// Boot-time configuration (spec §6 "Environment"): `TZ`, Wi-Fi
/// credentials, an NTP peer, a hostname, and the persisted-state mount
/// path, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct BootConfig {
    /// `TZ`-style timezone string honoured for local time.
    #[serde(default = "default_tz")]
    pub tz: String,
    /// Wi-Fi SSID to associate with at boot.
    pub wifi_ssid: String,
    /// Wi-Fi password.
    pub wifi_password: String,
    /// NTP peer address used to sync the system clock.
    #[serde(default = "default_ntp_peer")]
    pub ntp_peer: String,
    /// Hostname advertised on the network.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Filesystem root the "values" partition mounts at.
    #[serde(default = "default_mount_path")]
    pub mount_path: PathBuf,
    /// Interval between registry/schedule/switch ticks, in seconds.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: f64,
}

impl BootConfig {
    /// Parses a [`BootConfig`] from TOML text.
    pub fn parse(text: &str) -> CoreResult<BootConfig> {
        toml::from_str(text).map_err(|e| CoreError::malformed(e.to_string()))
    }

    /// Installs a `tracing` subscriber honouring `RUST_LOG`, defaulting to
    /// `info`. Idempotent-ish: a second call is a harmless no-op error
    /// that is swallowed, since the process only wants one subscriber.
    pub fn install_tracing() {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

/// The running core: the event store plus the schedules and switch
/// controllers the background tick drives. Held behind individual locks
/// (rather than one coarse lock) so a REST handler reading device state
/// doesn't block a schedule tick evaluating an unrelated schedule.
pub struct Core {
    /// The device registry and its persistence backend.
    pub store: Mutex<EventStore>,
    schedules: Mutex<Vec<ScheduleEntry>>,
    switches: Mutex<Vec<SwitchController>>,
    mount_path: PathBuf,
}

struct ScheduleEntry {
    schedule: Schedule,
    state_path: PathBuf,
}

impl Core {
    /// Builds a bare `Core` around an already-booted store, with no
    /// schedules or switches registered. Used by the REST dispatch tests
    /// and integration tests that don't need the full task-pool worker.
    pub fn for_test(store: EventStore) -> Core {
        Core {
            store: Mutex::new(store),
            schedules: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
            mount_path: PathBuf::from("/tmp"),
        }
    }

    /// Registers a schedule instance, loading its last-fired state from the
    /// persistence protocol (spec §4.6 "State storage").
    pub fn add_schedule(&self, mut schedule: Schedule) {
        let state_path =
            crate::schedule::ScheduleState::path_for(&self.mount_path, schedule.creation_id);
        schedule.state = crate::schedule::ScheduleState::load(&state_path);
        self.schedules
            .lock()
            .unwrap()
            .push(ScheduleEntry { schedule, state_path });
    }

    /// Registers a switch controller to be ticked in the background.
    pub fn add_switch(&self, switch: SwitchController) {
        self.switches.lock().unwrap().push(switch);
    }

    /// One pass of the core's periodic work (spec §4.10 step 5): ticks the
    /// registry, then every schedule, then every switch, applying each
    /// one's downstream writes through the event store so none of them
    /// holds a second borrow into the registry.
    pub fn tick(&self, clock: WeekClock, now_secs: f64) {
        {
            let mut store = self.store.lock().unwrap();
            store.tick_registry(now_secs);
        }

        let mut schedules = self.schedules.lock().unwrap();
        for entry in schedules.iter_mut() {
            let writes = entry.schedule.tick(clock);
            if writes.is_empty() {
                continue;
            }
            let mut store = self.store.lock().unwrap();
            for write in &writes {
                let what = write.value.unit().canonical_key();
                if let Err(err) = store.write_to_device(write.device_index, what, write.value) {
                    tracing::warn!(device = write.device_index, %err, "schedule write failed");
                }
            }
            drop(store);
            if matches!(entry.schedule.kind, crate::schedule::ScheduleKind::Action) {
                if let Err(err) = entry.schedule.state.save(&entry.state_path) {
                    tracing::warn!(%err, "failed to persist schedule state");
                }
            }
        }
        drop(schedules);

        let mut switches = self.switches.lock().unwrap();
        for switch in switches.iter_mut() {
            let reading = {
                let mut store = self.store.lock().unwrap();
                store
                    .read_from_device(switch.reading_device_id(), switch.reading_argument())
                    .ok()
            };
            if let Some(value) = switch.tick(reading) {
                let mut store = self.store.lock().unwrap();
                if let Err(err) =
                    store.write_to_device(switch.target_device_id(), switch.target_argument(), value)
                {
                    tracing::warn!(%err, "switch write failed");
                }
            }
        }
    }
}

/// Handle returned by [`run`]: the running [`Core`] plus the task pool and
/// the RAII tracker keeping the recurring tick task alive. Dropping this
/// stops the worker thread (spec §4.8's cooperative cancellation).
pub struct Handle {
    /// The running core, shared with the REST layer.
    pub core: Arc<Core>,
    /// The shared task pool (exposed so drivers/tests can post their own
    /// tasks against the same pool the daemon runs).
    pub task_pool: Arc<TaskPool>,
    stop: Arc<AtomicBool>,
    _tick_task: TaskTracker,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl Handle {
    /// Signals the worker thread to stop and joins it.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn unix_now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn current_week_clock() -> WeekClock {
    let secs = unix_now_secs() as u64;
    // Unix epoch (1970-01-01) was a Thursday: weekday index 3 in a
    // Monday-origin week.
    let days_since_epoch = secs / 86_400;
    let weekday = ((days_since_epoch + 3) % 7) as u8;
    let time_of_day_secs = (secs % 86_400) as u32;
    WeekClock { weekday, time_of_day_secs }
}

/// Boots the core (spec §4.10):
///
/// 1. Installs the tracing subscriber.
/// 2. Mounts the "values" partition at `cfg.mount_path`.
/// 3. Constructs the resource arbiter.
/// 4. Constructs the registry/event store, hydrating from `devices.bin` if
///    present, else starting empty.
/// 5. Starts the task-pool worker thread and posts the recurring tick task.
/// 6. Returns a [`Handle`] the REST layer and CLI entry point both hold.
pub fn run(cfg: &BootConfig) -> CoreResult<Handle> {
    BootConfig::install_tracing();
    tracing::info!(hostname = %cfg.hostname, tz = %cfg.tz, "booting aquacore");

    let arbiter = Arc::new(Arbiter::new());
    let store = EventStore::boot(arbiter, &cfg.mount_path)?;

    let core = Arc::new(Core {
        store: Mutex::new(store),
        schedules: Mutex::new(Vec::new()),
        switches: Mutex::new(Vec::new()),
        mount_path: cfg.mount_path.clone(),
    });

    let task_pool = Arc::new(TaskPool::new());
    let tick_core = core.clone();
    let tick_task = task_pool
        .post_task(
            "core-tick",
            false,
            cfg.tick_interval_secs,
            move || {
                tick_core.tick(current_week_clock(), unix_now_secs());
            },
        )
        .ok_or_else(|| CoreError::operation_failure("task pool is full at boot"))?;

    let stop = Arc::new(AtomicBool::new(false));
    let worker_pool = task_pool.clone();
    let worker_stop = stop.clone();
    let worker = std::thread::spawn(move || {
        worker_pool.run_blocking(Arc::new(SystemClock::new()), worker_stop);
    });

    tracing::info!("aquacore boot complete");
    Ok(Handle {
        core,
        task_pool,
        stop,
        _tick_task: tick_task,
        worker: Some(worker),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let cfg = BootConfig::parse(
            r#"
            wifi_ssid = "tank"
            wifi_password = "hunter2"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tz, "UTC");
        assert_eq!(cfg.hostname, "aquacore");
        assert_eq!(cfg.tick_interval_secs, 2.0);
    }

    #[test]
    fn parses_full_toml() {
        let cfg = BootConfig::parse(
            r#"
            tz = "Europe/Berlin"
            wifi_ssid = "tank"
            wifi_password = "hunter2"
            ntp_peer = "time.example.org"
            hostname = "aqua-1"
            mount_path = "/tmp/aquacore-values"
            tick_interval_secs = 5.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tz, "Europe/Berlin");
        assert_eq!(cfg.mount_path, PathBuf::from("/tmp/aquacore-values"));
    }

    #[test]
    fn boot_and_shutdown_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BootConfig {
            tz: "UTC".to_string(),
            wifi_ssid: "tank".to_string(),
            wifi_password: "hunter2".to_string(),
            ntp_peer: default_ntp_peer(),
            hostname: default_hostname(),
            mount_path: dir.path().to_path_buf(),
            tick_interval_secs: 0.05,
        };
        let handle = run(&cfg).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(120));
        assert!(handle.core.store.lock().unwrap().retrieve_device_overview().is_empty());
        handle.shutdown();
    }
}
