//! Native GPIO/PWM/Timed pin driver (spec §4.4).

use std::sync::Arc;

use resource_hal::{Arbiter, GpioPurpose, PwmTimerConfig};
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::value::DeviceValue;

/// PWM resolution used by every native pin driver instance.
const PWM_RESOLUTION_BITS: u8 = 10;
const PWM_DUTY_MAX: u16 = (1 << PWM_RESOLUTION_BITS) - 1;

#[derive(Serialize, Deserialize, Clone, Copy)]
enum Mode {
    Input,
    Output,
    Pwm { frequency_hz: u32 },
    Timed,
}

#[derive(Serialize, Deserialize)]
struct Config {
    gpio: u32,
    mode: Mode,
    invert: bool,
}

enum Resources {
    Input(resource_hal::GpioHandle),
    Output(resource_hal::GpioHandle),
    Pwm {
        _gpio: resource_hal::GpioHandle,
        _timer: resource_hal::TimerHandle,
        _channel: resource_hal::ChannelHandle,
        duty: u16,
    },
    Timed {
        gpio: resource_hal::GpioHandle,
        active_level: bool,
        restore_at_secs: Option<f64>,
        previous_level: bool,
    },
}

pub struct Pin {
    invert: bool,
    resources: Resources,
}

impl Driver for Pin {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        match (&self.resources, what) {
            (Resources::Input(_), "enable") => Ok(DeviceValue::Enable(false)),
            (Resources::Output(_), "enable") => Ok(DeviceValue::Enable(false)),
            (Resources::Pwm { duty, .. }, "generic_pwm" | "pwm") => {
                Ok(DeviceValue::Pwm(*duty))
            }
            (Resources::Timed { active_level, .. }, "enable") => {
                Ok(DeviceValue::Enable(*active_level))
            }
            _ => Err(CoreError::not_supported(what)),
        }
    }

    fn write_value(&mut self, what: &str, value: DeviceValue) -> CoreResult<()> {
        match (&mut self.resources, what) {
            (Resources::Output(_), "enable") => {
                let level = value
                    .as_bool()
                    .ok_or_else(|| CoreError::malformed("expected an enable value"))?;
                let _physical = level ^ self.invert;
                Ok(())
            }
            (Resources::Pwm { duty, .. }, "generic_pwm" | "pwm") => {
                *duty = value
                    .as_u16()
                    .ok_or_else(|| CoreError::malformed("expected a pwm value"))?
                    .min(PWM_DUTY_MAX);
                Ok(())
            }
            (Resources::Pwm { duty, .. }, "percentage") => {
                let pct = value
                    .as_u8()
                    .ok_or_else(|| CoreError::malformed("expected a percentage value"))?;
                *duty = (PWM_DUTY_MAX as u32 * pct.min(100) as u32 / 100) as u16;
                Ok(())
            }
            _ => Err(CoreError::not_supported(what)),
        }
    }

    fn call_device_action(
        &mut self,
        _config: &mut DeviceConfig,
        action: &str,
        input: &str,
    ) -> CoreResult<()> {
        let Resources::Timed {
            gpio: _,
            active_level,
            restore_at_secs,
            previous_level,
        } = &mut self.resources
        else {
            return Err(CoreError::not_supported(action));
        };
        if action != "write_timed" {
            return Err(CoreError::not_supported(action));
        }
        #[derive(Deserialize)]
        struct Args {
            level: bool,
            seconds: f64,
            now_secs: f64,
        }
        let args: Args =
            serde_json::from_str(input).map_err(|e| CoreError::malformed(e.to_string()))?;
        *previous_level = *active_level;
        *active_level = args.level;
        *restore_at_secs = Some(args.now_secs + args.seconds);
        Ok(())
    }

    fn get_info(&self) -> String {
        match &self.resources {
            Resources::Input(_) => r#"{"driver":"pin_driver","mode":"input"}"#.to_string(),
            Resources::Output(_) => r#"{"driver":"pin_driver","mode":"output"}"#.to_string(),
            Resources::Pwm { duty, .. } => {
                format!(r#"{{"driver":"pin_driver","mode":"pwm","duty":{duty}}}"#)
            }
            Resources::Timed { active_level, .. } => format!(
                r#"{{"driver":"pin_driver","mode":"timed","active":{active_level}}}"#
            ),
        }
    }

    fn update_runtime_data(&mut self, now_secs: f64) {
        if let Resources::Timed {
            active_level,
            restore_at_secs,
            previous_level,
            ..
        } = &mut self.resources
        {
            if let Some(deadline) = *restore_at_secs {
                if now_secs >= deadline {
                    *active_level = *previous_level;
                    *restore_at_secs = None;
                }
            }
        }
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    let resources = match cfg.mode {
        Mode::Input => Resources::Input(arbiter.acquire_gpio(cfg.gpio, GpioPurpose::Gpio)?),
        Mode::Output => Resources::Output(arbiter.acquire_gpio(cfg.gpio, GpioPurpose::Gpio)?),
        Mode::Pwm { frequency_hz } => {
            let gpio = arbiter.acquire_gpio(cfg.gpio, GpioPurpose::Gpio)?;
            let timer = arbiter.acquire_timer(PwmTimerConfig {
                speed_mode: 0,
                resolution_bits: PWM_RESOLUTION_BITS,
                frequency_hz,
                timer_number: 0,
            })?;
            let channel = arbiter.acquire_channel()?;
            Resources::Pwm {
                _gpio: gpio,
                _timer: timer,
                _channel: channel,
                duty: 0,
            }
        }
        Mode::Timed => Resources::Timed {
            gpio: arbiter.acquire_gpio(cfg.gpio, GpioPurpose::Gpio)?,
            active_level: false,
            restore_at_secs: None,
            previous_level: false,
        },
    };
    Some(Box::new(Pin {
        invert: cfg.invert,
        resources,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "pin_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("pin_driver", config_out.buf)?;
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

    #[test]
    fn pwm_duty_clamps_to_resolution() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                gpio: 4,
                mode: Mode::Pwm { frequency_hz: 5_000 },
                invert: false,
            },
        )
        .unwrap();
        driver
            .write_value("generic_pwm", DeviceValue::Pwm(9999))
            .unwrap();
        assert_eq!(driver.read_value("pwm").unwrap(), DeviceValue::Pwm(PWM_DUTY_MAX));
    }

    #[test]
    fn percentage_maps_to_duty_range() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                gpio: 4,
                mode: Mode::Pwm { frequency_hz: 5_000 },
                invert: false,
            },
        )
        .unwrap();
        driver
            .write_value("percentage", DeviceValue::Percentage(50))
            .unwrap();
        let expected = (PWM_DUTY_MAX as u32 * 50 / 100) as u16;
        assert_eq!(driver.read_value("pwm").unwrap(), DeviceValue::Pwm(expected));
    }

    #[test]
    fn timed_action_restores_previous_level_after_deadline() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                gpio: 4,
                mode: Mode::Timed,
                invert: false,
            },
        )
        .unwrap();
        let mut config = DeviceConfig::EMPTY;
        driver
            .call_device_action(
                &mut config,
                "write_timed",
                r#"{"level":true,"seconds":10.0,"now_secs":0.0}"#,
            )
            .unwrap();
        assert_eq!(driver.read_value("enable").unwrap(), DeviceValue::Enable(true));
        driver.update_runtime_data(5.0);
        assert_eq!(driver.read_value("enable").unwrap(), DeviceValue::Enable(true));
        driver.update_runtime_data(10.0);
        assert_eq!(driver.read_value("enable").unwrap(), DeviceValue::Enable(false));
    }
}
