//! End-to-end tests driving the core through [`aquacore::boot::Core`] and
//! the REST dispatch layer, the way a booted daemon and its HTTP front end
//! would.

use std::sync::Arc;

use aquacore::boot::Core;
use aquacore::rest::{dispatch, Route};
use aquacore::schedule::{Channel, Schedule, ScheduleKind, ScheduleState, WeekClock, WeekSchedule};
use aquacore::store::EventStore;
use aquacore::switch::{SwitchConfig, SwitchController, SwitchDefault};
use aquacore::value::{DeviceValue, Unit};
use resource_hal::Arbiter;

fn pwm_pin_param() -> &'static str {
    r#"{"gpio":5,"mode":{"Pwm":{"frequency_hz":1000}},"invert":false}"#
}

fn core_with_empty_store() -> (Core, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = EventStore::boot(Arc::new(Arbiter::new()), dir.path()).unwrap();
    (Core::for_test(store), dir)
}

#[test]
fn add_device_then_read_and_write_via_rest() {
    let (core, _dir) = core_with_empty_store();

    let add = dispatch(
        &core,
        Route::AddDevice { driver_type: "pin_driver", description: "dimmer", driver_param: pwm_pin_param() },
    );
    assert_eq!(add.status, 200);
    assert_eq!(add.body["index"], 0);

    let write = dispatch(&core, Route::WriteDevice { index: 0, what: "pwm", body: r#"{"pwm": 400}"# });
    assert_eq!(write.status, 204);

    let read = dispatch(&core, Route::ReadDevice { index: 0, what: "pwm" });
    assert_eq!(read.status, 200);
    assert_eq!(read.body["data"]["pwm"], 400);

    let list = dispatch(&core, Route::ListDevices);
    assert_eq!(list.body["data"].as_array().unwrap().len(), 1);
}

#[test]
fn schedule_interpolates_a_pwm_channel_across_core_tick() {
    let (core, _dir) = core_with_empty_store();
    dispatch(
        &core,
        Route::AddDevice { driver_type: "pin_driver", description: "dimmer", driver_param: pwm_pin_param() },
    );

    let mut channels: [Option<Channel>; 4] = Default::default();
    channels[0] = Some(Channel {
        name: heapless::String::try_from("p").unwrap(),
        device_index: 0,
        unit: Unit::Pwm,
    });
    let mut week = WeekSchedule::default();
    week.set_repeating("00-00:p=100;12-00:p=500", |n| if n == "p" { Some(0) } else { None });

    core.add_schedule(Schedule {
        channels,
        kind: ScheduleKind::Interpolate,
        creation_id: 1,
        week,
        state: ScheduleState::default(),
    });

    // Halfway between 00:00 (100) and 12:00 (500) is 06:00: interpolated
    // value should land at 300.
    core.tick(WeekClock { weekday: 0, time_of_day_secs: 6 * 3600 }, 0.0);

    let read = dispatch(&core, Route::ReadDevice { index: 0, what: "pwm" });
    assert_eq!(read.body["data"]["pwm"], 300);
}

#[test]
fn switch_controller_drives_its_target_through_core_tick() {
    let (core, _dir) = core_with_empty_store();
    dispatch(
        &core,
        Route::AddDevice { driver_type: "pin_driver", description: "reading", driver_param: pwm_pin_param() },
    );
    dispatch(
        &core,
        Route::AddDevice { driver_type: "pin_driver", description: "target", driver_param: pwm_pin_param() },
    );
    // Seed the "reading" device's duty to simulate a sensor far above target.
    dispatch(&core, Route::WriteDevice { index: 0, what: "pwm", body: r#"{"pwm": 700}"# });

    let switch = SwitchController::new(
        SwitchConfig {
            reading_device_id: 0,
            reading_argument: "pwm".to_string(),
            target_device_id: 1,
            target_argument: "pwm".to_string(),
            target_value: DeviceValue::Pwm(500),
            low_value: DeviceValue::Pwm(0),
            high_value: DeviceValue::Pwm(1000),
            max_allowed_difference: DeviceValue::Pwm(50),
            default_value: SwitchDefault::Low,
        },
        99,
    )
    .unwrap();
    core.add_switch(switch);

    core.tick(WeekClock { weekday: 0, time_of_day_secs: 0 }, 0.0);
    let read = dispatch(&core, Route::ReadDevice { index: 1, what: "pwm" });
    assert_eq!(read.body["data"]["pwm"], 0);

    // Reading now below target past tolerance: target should swing high.
    dispatch(&core, Route::WriteDevice { index: 0, what: "pwm", body: r#"{"pwm": 300}"# });
    core.tick(WeekClock { weekday: 0, time_of_day_secs: 1 }, 1.0);
    let read = dispatch(&core, Route::ReadDevice { index: 1, what: "pwm" });
    assert_eq!(read.body["data"]["pwm"], 1000);
}

#[test]
fn partition_backup_and_restore_round_trip_through_rest() {
    let (core, _dir) = core_with_empty_store();
    dispatch(
        &core,
        Route::AddDevice { driver_type: "pin_driver", description: "relay", driver_param: r#"{"gpio":4,"mode":"Output","invert":false}"# },
    );

    let image = aquacore::rest::backup_partition(&core).unwrap();

    let (target_core, _target_dir) = core_with_empty_store();
    assert!(dispatch(&target_core, Route::ListDevices).body["data"].as_array().unwrap().is_empty());

    let restore = dispatch(&target_core, Route::RestorePartition { image: &image });
    assert_eq!(restore.status, 204);

    let list = dispatch(&target_core, Route::ListDevices);
    assert_eq!(list.body["data"].as_array().unwrap().len(), 1);
    assert_eq!(list.body["data"][0]["description"], "relay");
}

#[test]
fn removing_an_unknown_index_is_reported_as_not_found() {
    let (core, _dir) = core_with_empty_store();
    let remove = dispatch(&core, Route::RemoveDevice { index: 3 });
    assert_eq!(remove.status, 404);
}
