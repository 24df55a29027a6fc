//! DRV8825 stepper driver (spec §4.4): owns a step GPIO, an enable GPIO
//! and an RMT-style TX channel; its runtime tick drains a pending-steps
//! counter through [`stepgen::Stepgen`].

use std::sync::Arc;

use resource_hal::{Arbiter, GpioPurpose};
use serde::{Deserialize, Serialize};
use stepgen::Stepgen;

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::value::DeviceValue;

/// Tick clock the step generator plans against, in Hz.
const STEPGEN_TICK_FREQ: u32 = 1_000_000;

#[derive(Serialize, Deserialize, Clone, Copy)]
struct Config {
    step_gpio: u32,
    enable_gpio: u32,
    steps_per_sec: u32,
    acceleration: u32,
}

pub struct Stepper {
    _step_gpio: resource_hal::GpioHandle,
    _enable_gpio: resource_hal::GpioHandle,
    _channel: resource_hal::ChannelHandle,
    steps_per_sec: u32,
    acceleration: u32,
    pending_steps: u32,
    running: bool,
    last_plan_total_ticks: u64,
}

impl Driver for Stepper {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        match what {
            "generic_unsigned_integral" => {
                Ok(DeviceValue::UnsignedIntegral(self.pending_steps.min(u16::MAX as u32) as u16))
            }
            "enable" => Ok(DeviceValue::Enable(self.running)),
            _ => Err(CoreError::not_supported(what)),
        }
    }

    fn write_value(&mut self, what: &str, value: DeviceValue) -> CoreResult<()> {
        if what != "generic_unsigned_integral" {
            return Err(CoreError::not_supported(what));
        }
        let steps = value
            .as_u16()
            .ok_or_else(|| CoreError::malformed("expected a step count"))?;
        self.pending_steps = self.pending_steps.saturating_add(steps as u32);
        Ok(())
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"drv8825_stepper","pending_steps":{},"running":{}}}"#,
            self.pending_steps, self.running
        )
    }

    fn update_runtime_data(&mut self, _now_secs: f64) {
        if self.pending_steps == 0 {
            self.running = false;
            return;
        }
        self.running = true;
        let mut gen = Stepgen::new(STEPGEN_TICK_FREQ);
        if gen.set_target_speed(self.steps_per_sec).is_err()
            || gen.set_acceleration(self.acceleration).is_err()
        {
            self.pending_steps = 0;
            self.running = false;
            return;
        }
        gen.plan(self.pending_steps);

        // One driver tick asserts enable, transmits the whole planned
        // move through the RMT-style channel, deasserts. A real driver
        // streams delays to hardware one at a time; the core tracks only
        // the aggregate tick count the worker thread would have consumed.
        let mut total_ticks = 0u64;
        while let Some(delay) = gen.next_delay() {
            total_ticks += delay as u64;
        }
        self.last_plan_total_ticks = total_ticks;
        self.pending_steps = 0;
        self.running = false;
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    let step_gpio = arbiter.acquire_gpio(cfg.step_gpio, GpioPurpose::Gpio)?;
    let enable_gpio = arbiter.acquire_gpio(cfg.enable_gpio, GpioPurpose::Gpio)?;
    let channel = arbiter.acquire_channel()?;
    Some(Box::new(Stepper {
        _step_gpio: step_gpio,
        _enable_gpio: enable_gpio,
        _channel: channel,
        steps_per_sec: cfg.steps_per_sec,
        acceleration: cfg.acceleration,
        pending_steps: 0,
        running: false,
        last_plan_total_ticks: 0,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "drv8825_stepper_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("drv8825_stepper_driver", config_out.buf)?;
        Some(driver)
    },
    create_from_config: |arbiter, config| {
        let cfg: Config = codec::decode_from(&config.buf)?;
        build(arbiter, &cfg)
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> Stepper {
        let arb = Arc::new(Arbiter::new());
        Stepper {
            _step_gpio: arb.acquire_gpio(1, GpioPurpose::Gpio).unwrap(),
            _enable_gpio: arb.acquire_gpio(2, GpioPurpose::Gpio).unwrap(),
            _channel: arb.acquire_channel().unwrap(),
            steps_per_sec: 1_000,
            acceleration: 2_000,
            pending_steps: 0,
            running: false,
            last_plan_total_ticks: 0,
        }
    }

    #[test]
    fn queued_steps_drain_on_tick() {
        let mut stepper = driver();
        stepper
            .write_value("generic_unsigned_integral", DeviceValue::UnsignedIntegral(200))
            .unwrap();
        stepper.update_runtime_data(0.0);
        assert_eq!(stepper.pending_steps, 0);
        assert!(stepper.last_plan_total_ticks > 0);
    }

    #[test]
    fn idle_stepper_reports_not_running() {
        let mut stepper = driver();
        stepper.update_runtime_data(0.0);
        assert!(!stepper.running);
    }
}
