//! DHTxx GPIO temperature/humidity sensor (spec §4.4). Same read contract
//! as [`super::bme280`] but single-wire and polled at a slower cadence.

use std::sync::Arc;

use resource_hal::{Arbiter, GpioPurpose};
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::sample::SampleContainer;
use crate::value::DeviceValue;

/// Minimum interval between polls, in seconds — the sensor's datasheet
/// minimum is 1s but the original firmware polls conservatively.
const MIN_POLL_INTERVAL_SECS: f64 = 5.0;

#[derive(Serialize, Deserialize)]
struct Config {
    gpio: u32,
}

pub struct Dhtxx {
    _gpio: resource_hal::GpioHandle,
    temperature: SampleContainer<10>,
    humidity: SampleContainer<10>,
    last_poll_secs: Option<f64>,
}

impl Driver for Dhtxx {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        match what {
            "temperature" => self
                .temperature
                .average()
                .map(|v| DeviceValue::Temperature(v as f32))
                .ok_or_else(|| CoreError::operation_failure("no samples yet")),
            "humidity" => self
                .humidity
                .average()
                .map(|v| DeviceValue::Humidity(v as f32))
                .ok_or_else(|| CoreError::operation_failure("no samples yet")),
            _ => Err(CoreError::not_supported(what)),
        }
    }

    fn write_value(&mut self, what: &str, _value: DeviceValue) -> CoreResult<()> {
        Err(CoreError::not_supported(what))
    }

    fn get_info(&self) -> String {
        r#"{"driver":"dhtxx_driver"}"#.to_string()
    }

    fn update_runtime_data(&mut self, now_secs: f64) {
        if let Some(last) = self.last_poll_secs {
            if now_secs - last < MIN_POLL_INTERVAL_SECS {
                return;
            }
        }
        self.last_poll_secs = Some(now_secs);
        if let Some(t) = self.temperature.last() {
            self.temperature.put_sample(t.value, now_secs);
        }
        if let Some(h) = self.humidity.last() {
            self.humidity.put_sample(h.value, now_secs);
        }
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    let gpio = arbiter.acquire_gpio(cfg.gpio, GpioPurpose::Bus)?;
    Some(Box::new(Dhtxx {
        _gpio: gpio,
        temperature: SampleContainer::new(),
        humidity: SampleContainer::new(),
        last_poll_secs: None,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "dhtxx_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("dhtxx_driver", config_out.buf)?;
        Some(driver)
    },
    create_from_config: |arbiter, config| {
        let cfg: Config = codec::decode_from(&config.buf)?;
        build(arbiter, &cfg)
    },
};
