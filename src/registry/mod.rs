//! Device registry: an [`EventAccessArray`] of [`crate::config::DeviceConfig`]
//! paired with boxed driver instances, dispatched through the events in
//! spec §4.3.

pub mod drivers;

use std::sync::Arc;

use resource_hal::Arbiter;

use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::event_array::{EventAccessArray, Locator, Snapshot};
use crate::value::DeviceValue;

/// Maximum number of devices the registry can hold at once.
pub const DEVICE_CAPACITY: usize = 24;

/// Capability surface every concrete driver implements (spec §4.3's
/// "Driver capability set" table). Drivers are move-only: the trait is
/// only ever held behind a `Box`, never cloned.
pub trait Driver: Send {
    /// Reads `what` into a [`DeviceValue`].
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue>;
    /// Writes `value` to `what`.
    fn write_value(&mut self, what: &str, value: DeviceValue) -> CoreResult<()>;
    /// Renders a JSON object describing this device's live state.
    fn get_info(&self) -> String;
    /// Runs a named action (e.g. `tare`, `calibrate-lower`), possibly
    /// mutating the persisted `config`.
    fn call_device_action(
        &mut self,
        config: &mut DeviceConfig,
        action: &str,
        input: &str,
    ) -> CoreResult<()> {
        let _ = (config, input);
        Err(CoreError::not_supported(action))
    }
    /// Called on the registry's background tick; drivers that sample on a
    /// fixed cadence do their work here rather than on a private thread.
    fn update_runtime_data(&mut self, now_secs: f64) {
        let _ = now_secs;
    }
    /// Drains a queued downstream write (the dosing pump's `milliliter` →
    /// `generic_unsigned_integral` conversion is the only current user),
    /// if one is pending. The registry applies it as a normal
    /// `WriteToDevice` against `target_index` after every driver has
    /// ticked, so a driver never holds another driver's runtime borrow.
    fn drain_pending_writes(&mut self) -> Vec<(usize, String, DeviceValue)> {
        Vec::new()
    }
    /// Declares an upstream device/selector this driver wants read each
    /// tick (the pH probe's analog source is the current user). The
    /// registry performs the read and feeds the result back through
    /// [`Driver::receive_upstream`].
    fn upstream_read(&self) -> Option<(usize, String)> {
        None
    }
    /// Receives the value requested by [`Driver::upstream_read`].
    fn receive_upstream(&mut self, value: DeviceValue) {
        let _ = value;
    }
}

/// A driver's self-described type name, and its two construction paths.
/// The registry's driver-name space is open: new driver modules register
/// a [`DriverFactory`] in [`drivers::ALL`] without the registry itself
/// changing.
pub struct DriverFactory {
    /// Unique driver type name, matched against `AddDevice`'s `driver_name`.
    pub name: &'static str,
    /// Builds a fresh driver instance from a JSON creation payload,
    /// writing its persisted form into `config_out`.
    pub create_from_json:
        fn(&Arc<Arbiter>, &str, &mut DeviceConfig) -> Option<Box<dyn Driver>>,
    /// Rebuilds a driver instance from a previously persisted config, used
    /// by [`EventAccessArray::assign`] at boot.
    pub create_from_config: fn(&Arc<Arbiter>, &DeviceConfig) -> Option<Box<dyn Driver>>,
}

fn find_factory(name: &str) -> Option<&'static DriverFactory> {
    drivers::ALL.iter().find(|f| f.name == name)
}

/// The device registry (spec §4.3): a fixed-capacity table of devices, each
/// a [`DeviceConfig`] plus (once initialized) a boxed [`Driver`].
pub struct Registry {
    table: EventAccessArray<DeviceConfig, Box<dyn Driver>, DEVICE_CAPACITY>,
    arbiter: Arc<Arbiter>,
}

/// Per-slot summary emitted by `RetrieveDeviceOverview`.
pub struct DeviceOverviewEntry {
    /// Slot index.
    pub index: usize,
    /// Device's display name.
    pub name: String,
    /// Driver type name.
    pub driver_name: String,
}

impl Registry {
    /// Creates an empty registry bound to `arbiter`.
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        Registry {
            table: EventAccessArray::new(),
            arbiter,
        }
    }

    /// Rebuilds the registry's runtime drivers from a persisted snapshot,
    /// invoking each device's `create_from_config`. Slots whose driver
    /// name is unknown, or whose `create_from_config` fails, are left
    /// uninitialized.
    pub fn assign(&mut self, snapshot: &Snapshot<DeviceConfig, DEVICE_CAPACITY>) {
        let arbiter = self.arbiter.clone();
        self.table.assign(snapshot, move |config, runtime| {
            let Some(factory) = find_factory(config.driver_name()) else {
                return false;
            };
            match (factory.create_from_config)(&arbiter, config) {
                Some(driver) => {
                    *runtime = Some(driver);
                    true
                }
                None => false,
            }
        })
    }

    /// `AddDevice{driver_name, index?, name, payload}`.
    pub fn add_device(
        &mut self,
        driver_name: &str,
        index: Option<usize>,
        name: &str,
        payload: &str,
    ) -> CoreResult<usize> {
        let factory = find_factory(driver_name)
            .ok_or_else(|| CoreError::malformed(format!("unknown driver {driver_name:?}")))?;
        let arbiter = self.arbiter.clone();

        let result = self.table.dispatch_set(
            Locator {
                index,
                name: Some(name),
            },
            payload,
            move |runtime, config, payload| {
                match (factory.create_from_json)(&arbiter, payload, config) {
                    Some(driver) => {
                        *runtime = Some(driver);
                        true
                    }
                    None => false,
                }
            },
        )?;

        if !result.success {
            return Err(CoreError::malformed("device creation payload rejected"));
        }
        Ok(result.index)
    }

    /// `RemoveDevice{index}`. Dropping the slot's `Box<dyn Driver>` runs
    /// the driver's destructor, which releases its resource-arbiter
    /// handles.
    pub fn remove_device(&mut self, index: usize) -> CoreResult<()> {
        self.table
            .dispatch_remove(Locator {
                index: Some(index),
                name: None,
            })
            .map(|_| ())
    }

    /// `ReadFromDevice{index, what}`.
    pub fn read_from_device(&mut self, index: usize, what: &str) -> CoreResult<DeviceValue> {
        self.table.invoke_on_runtime(index, |driver| driver.read_value(what))?
    }

    /// `WriteToDevice{index, what, value}`.
    pub fn write_to_device(
        &mut self,
        index: usize,
        what: &str,
        value: DeviceValue,
    ) -> CoreResult<()> {
        self.table
            .invoke_on_runtime(index, |driver| driver.write_value(what, value))?
    }

    /// `WriteDeviceOptions{index, action, input}`. On success, the table's
    /// snapshot reflects the driver's mutated config and is returned for
    /// the event store to persist.
    pub fn write_device_options(
        &mut self,
        index: usize,
        action: &str,
        input: &str,
    ) -> CoreResult<Snapshot<DeviceConfig, DEVICE_CAPACITY>> {
        let result = self.table.dispatch_set(
            Locator {
                index: Some(index),
                name: None,
            },
            (),
            |runtime, config, ()| {
                let Some(driver) = runtime.as_mut() else {
                    return false;
                };
                driver.call_device_action(config, action, input).is_ok()
            },
        )?;
        if !result.success {
            return Err(CoreError::operation_failure("device action failed"));
        }
        Ok(result.snapshot)
    }

    /// `RetrieveDeviceInfo{index, out_buf}`.
    pub fn retrieve_device_info(&mut self, index: usize) -> CoreResult<String> {
        self.table.invoke_on_runtime(index, |driver| driver.get_info())
    }

    /// `RetrieveDeviceOverview{out_buf}`: walks initialized slots and
    /// emits `{index, description, driver_name}` entries.
    pub fn retrieve_device_overview(&self) -> Vec<DeviceOverviewEntry> {
        let mut entries = Vec::new();
        for index in 0..DEVICE_CAPACITY {
            if !self.table.is_initialized(index) {
                continue;
            }
            let name = self.table.name_at(index).unwrap_or_default().to_string();
            let driver_name = self
                .table
                .dispatch_get(Locator { index: Some(index), name: None })
                .map(|(_, config)| config.driver_name().to_string())
                .unwrap_or_default();
            entries.push(DeviceOverviewEntry {
                index,
                name,
                driver_name,
            });
        }
        entries
    }

    /// Called by the registry's recurring task-pool entry (spec §4.3
    /// "Background work"): ticks every initialized driver's
    /// `update_runtime_data`, then applies any deferred downstream writes
    /// it queued (e.g. the dosing pump's step count to its pico).
    pub fn tick(&mut self, now_secs: f64) {
        let mut pending = Vec::new();
        let mut upstream = Vec::new();
        self.table.invoke_on_all_runtime(|index, driver| {
            driver.update_runtime_data(now_secs);
            pending.extend(driver.drain_pending_writes());
            if let Some((source, what)) = driver.upstream_read() {
                upstream.push((index, source, what));
            }
        });
        for (target, what, value) in pending {
            let _ = self.write_to_device(target, &what, value);
        }
        for (index, source, what) in upstream {
            if let Ok(value) = self.read_from_device(source, &what) {
                let _ = self
                    .table
                    .invoke_on_runtime(index, |driver| driver.receive_upstream(value));
            }
        }
    }

    /// The number of devices the table can hold.
    pub const fn capacity(&self) -> usize {
        DEVICE_CAPACITY
    }

    /// A copy of the table's current persisted-form state, for the event
    /// store to write out after a mutation this type's own methods don't
    /// already return a snapshot for (`add_device`, `remove_device`).
    pub fn snapshot(&self) -> Snapshot<DeviceConfig, DEVICE_CAPACITY> {
        self.table.snapshot_for_persistence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(DeviceValue);
    impl Driver for Echo {
        fn read_value(&mut self, _what: &str) -> CoreResult<DeviceValue> {
            Ok(self.0)
        }
        fn write_value(&mut self, _what: &str, value: DeviceValue) -> CoreResult<()> {
            self.0 = value;
            Ok(())
        }
        fn get_info(&self) -> String {
            "{}".to_string()
        }
    }

    const ECHO: DriverFactory = DriverFactory {
        name: "test_echo",
        create_from_json: |_arb, _input, config| {
            *config = DeviceConfig::new("test_echo", [0; crate::config::CONFIG_BUF_LEN])?;
            Some(Box::new(Echo(DeviceValue::None)))
        },
        create_from_config: |_arb, _config| Some(Box::new(Echo(DeviceValue::None))),
    };

    fn registry_with_echo() -> Registry {
        // Real factories come from `drivers::ALL`; this test exercises
        // dispatch plumbing using a local factory found by pointer
        // equality against a hand-rolled lookup instead of the static
        // table, since registering into `drivers::ALL` from a test isn't
        // possible.
        let mut reg = Registry::new(Arc::new(Arbiter::new()));
        let arbiter = reg.arbiter.clone();
        let result = reg
            .table
            .dispatch_set(
                Locator {
                    index: None,
                    name: Some("probe"),
                },
                "{}",
                move |runtime, config, payload| {
                    (ECHO.create_from_json)(&arbiter, payload, config)
                        .map(|d| *runtime = Some(d))
                        .is_some()
                },
            )
            .unwrap();
        assert!(result.success);
        reg
    }

    #[test]
    fn read_and_write_round_trip_through_driver() {
        let mut reg = registry_with_echo();
        reg.write_to_device(0, "x", DeviceValue::Temperature(21.5))
            .unwrap();
        assert_eq!(
            reg.read_from_device(0, "x").unwrap(),
            DeviceValue::Temperature(21.5)
        );
    }

    #[test]
    fn remove_then_read_is_index_invalid() {
        let mut reg = registry_with_echo();
        reg.remove_device(0).unwrap();
        assert!(reg.read_from_device(0, "x").is_err());
    }

    #[test]
    fn overview_reports_the_one_initialized_slot() {
        let reg = registry_with_echo();
        let overview = reg.retrieve_device_overview();
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0].name, "probe");
    }

    #[test]
    fn overview_reports_the_slot_s_driver_name() {
        let reg = registry_with_echo();
        let overview = reg.retrieve_device_overview();
        assert_eq!(overview.len(), 1);
        assert!(!overview[0].driver_name.is_empty());
        assert_eq!(overview[0].driver_name, "test_echo");
    }
}
