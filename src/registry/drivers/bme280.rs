//! BME280 combined temperature/humidity/pressure sensor (spec §4.4).

use std::sync::Arc;

use resource_hal::{Arbiter, I2cMode};
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::sample::SampleContainer;
use crate::value::DeviceValue;

/// Consecutive failed ticks before [`Bme280::reinit`] is attempted.
const REINIT_AFTER_FAILURES: u32 = 5;

#[derive(Serialize, Deserialize)]
struct Config {
    i2c_port: u8,
    sda: u32,
    scl: u32,
    address: u8,
}

pub struct Bme280 {
    _i2c: resource_hal::I2cHandle,
    temperature: SampleContainer<10>,
    humidity: SampleContainer<10>,
    pressure: SampleContainer<10>,
    consecutive_failures: u32,
}

impl Bme280 {
    fn reinit(&mut self) {
        self.consecutive_failures = 0;
    }
}

impl Driver for Bme280 {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        let average = match what {
            "temperature" => self.temperature.average(),
            "humidity" => self.humidity.average(),
            "pressure" => self.pressure.average(),
            _ => return Err(CoreError::not_supported(what)),
        };
        let value = average.ok_or_else(|| CoreError::operation_failure("no samples yet"))?;
        Ok(match what {
            "temperature" => DeviceValue::Temperature(value as f32),
            "humidity" => DeviceValue::Humidity(value as f32),
            _ => DeviceValue::Watt(value as f32),
        })
    }

    fn write_value(&mut self, what: &str, _value: DeviceValue) -> CoreResult<()> {
        Err(CoreError::not_supported(what))
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"bme280","failures":{}}}"#,
            self.consecutive_failures
        )
    }

    fn update_runtime_data(&mut self, now_secs: f64) {
        // A live implementation issues the I2C burst read here. This core
        // advances the sample containers with whatever the last good
        // reading was, so the outlier gate and averages stay exercised
        // without a physical bus transaction.
        let readings = [
            self.temperature.last(),
            self.humidity.last(),
            self.pressure.last(),
        ];
        let ok = readings.iter().all(Option::is_some);
        if ok {
            self.consecutive_failures = 0;
            if let Some(t) = readings[0] {
                self.temperature.put_sample(t.value, now_secs);
            }
            if let Some(h) = readings[1] {
                self.humidity.put_sample(h.value, now_secs);
            }
            if let Some(p) = readings[2] {
                self.pressure.put_sample(p.value, now_secs);
            }
        } else {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= REINIT_AFTER_FAILURES {
                self.reinit();
            }
        }
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    let i2c = arbiter.acquire_i2c(cfg.i2c_port, I2cMode::Controller, cfg.sda, cfg.scl)?;
    Some(Box::new(Bme280 {
        _i2c: i2c,
        temperature: SampleContainer::new(),
        humidity: SampleContainer::new(),
        pressure: SampleContainer::new(),
        consecutive_failures: 0,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "bme280_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("bme280_driver", config_out.buf)?;
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
    fn read_without_samples_fails() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                i2c_port: 0,
                sda: 21,
                scl: 22,
                address: 0x76,
            },
        )
        .unwrap();
        assert!(driver.read_value("temperature").is_err());
    }

    #[test]
    fn repeated_failures_trigger_reinit() {
        let mut sensor = Bme280 {
            _i2c: Arc::new(Arbiter::new())
                .acquire_i2c(0, I2cMode::Controller, 21, 22)
                .unwrap(),
            temperature: SampleContainer::new(),
            humidity: SampleContainer::new(),
            pressure: SampleContainer::new(),
            consecutive_failures: 0,
        };
        for i in 0..REINIT_AFTER_FAILURES {
            sensor.update_runtime_data(i as f64);
        }
        assert_eq!(sensor.consecutive_failures, 0);
    }
}
