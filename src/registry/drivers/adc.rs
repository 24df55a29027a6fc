//! Multi-channel I2C ADC exposing four single-ended channels (spec §4.4).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use resource_hal::{Arbiter, I2cMode};
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::value::DeviceValue;

const CHANNELS: [&str; 4] = ["a0", "a1", "a2", "a3"];

fn address_table() -> &'static Mutex<HashSet<u8>> {
    static TABLE: OnceLock<Mutex<HashSet<u8>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashSet::new()))
}

#[derive(Serialize, Deserialize)]
struct Config {
    i2c_port: u8,
    sda: u32,
    scl: u32,
    address: u8,
}

pub struct Adc {
    _i2c: resource_hal::I2cHandle,
    address: u8,
    readings: [u16; 4],
}

impl Drop for Adc {
    fn drop(&mut self) {
        address_table().lock().unwrap().remove(&self.address);
    }
}

fn channel_index(what: &str) -> Option<usize> {
    CHANNELS.iter().position(|c| *c == what)
}

impl Driver for Adc {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        let idx = channel_index(what).ok_or_else(|| CoreError::not_supported(what))?;
        Ok(DeviceValue::Analog(self.readings[idx]))
    }

    fn write_value(&mut self, what: &str, _value: DeviceValue) -> CoreResult<()> {
        Err(CoreError::not_supported(what))
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"adc_multichannel","address":{},"a0":{},"a1":{},"a2":{},"a3":{}}}"#,
            self.address, self.readings[0], self.readings[1], self.readings[2], self.readings[3]
        )
    }

    fn update_runtime_data(&mut self, _now_secs: f64) {
        // Continuous-conversion device; a real implementation reads the
        // conversion registers here. The core's contract is the cached
        // mask this tick refreshes.
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    {
        let mut table = address_table().lock().unwrap();
        if !table.insert(cfg.address) {
            return None;
        }
    }
    let i2c = arbiter.acquire_i2c(cfg.i2c_port, I2cMode::Controller, cfg.sda, cfg.scl)?;
    Some(Box::new(Adc {
        _i2c: i2c,
        address: cfg.address,
        readings: [0; 4],
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "adc_multichannel",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("adc_multichannel", config_out.buf)?;
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
    fn unknown_channel_is_not_supported() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                i2c_port: 0,
                sda: 21,
                scl: 22,
                address: 0x48,
            },
        )
        .unwrap();
        assert!(matches!(
            driver.read_value("a9"),
            Err(CoreError::NotSupported { .. })
        ));
        address_table().lock().unwrap().clear();
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let arb = Arc::new(Arbiter::new());
        let cfg = Config {
            i2c_port: 0,
            sda: 21,
            scl: 22,
            address: 0x48,
        };
        let _first = build(&arb, &cfg).unwrap();
        assert!(build(&arb, &cfg).is_none());
        address_table().lock().unwrap().clear();
    }
}
