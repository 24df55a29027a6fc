//! 16-pin I2C GPIO expander (spec §4.4): writes set one bit in a cached
//! output mask and rewrite the whole port; reads return a cached polled
//! value so bits never addressed by a write stay untouched.

use std::sync::Arc;

use resource_hal::{Arbiter, I2cMode};
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::value::DeviceValue;

#[derive(Serialize, Deserialize)]
struct Config {
    i2c_port: u8,
    sda: u32,
    scl: u32,
    address: u8,
}

pub struct GpioExpander {
    _i2c: resource_hal::I2cHandle,
    output_mask: u16,
    input_cache: u16,
}

fn pin_index(what: &str) -> CoreResult<u8> {
    let idx: u8 = what
        .strip_prefix("pin")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| CoreError::not_supported(what))?;
    if idx >= 16 {
        return Err(CoreError::not_supported(what));
    }
    Ok(idx)
}

impl Driver for GpioExpander {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        let pin = pin_index(what)?;
        Ok(DeviceValue::Enable(self.input_cache & (1 << pin) != 0))
    }

    fn write_value(&mut self, what: &str, value: DeviceValue) -> CoreResult<()> {
        let pin = pin_index(what)?;
        let on = value
            .as_bool()
            .ok_or_else(|| CoreError::malformed("expected an enable value"))?;
        if on {
            self.output_mask |= 1 << pin;
        } else {
            self.output_mask &= !(1 << pin);
        }
        // A real driver writes self.output_mask to the expander's port
        // register here, leaving bits it doesn't own untouched because
        // only `output_mask`'s addressed bits changed.
        Ok(())
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"gpio_expander_16","output_mask":{},"input_cache":{}}}"#,
            self.output_mask, self.input_cache
        )
    }

    fn update_runtime_data(&mut self, _now_secs: f64) {
        // Refresh input_cache from the port's input register.
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    let i2c = arbiter.acquire_i2c(cfg.i2c_port, I2cMode::Controller, cfg.sda, cfg.scl)?;
    Some(Box::new(GpioExpander {
        _i2c: i2c,
        output_mask: 0,
        input_cache: 0,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "gpio_expander_16",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("gpio_expander_16", config_out.buf)?;
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
    fn write_only_affects_addressed_bit() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                i2c_port: 0,
                sda: 21,
                scl: 22,
                address: 0x20,
            },
        )
        .unwrap();
        driver.write_value("pin3", DeviceValue::Enable(true)).unwrap();
        driver.write_value("pin5", DeviceValue::Enable(true)).unwrap();
        driver.write_value("pin3", DeviceValue::Enable(false)).unwrap();
        let gpio_expander = driver
            .get_info();
        assert!(gpio_expander.contains("\"output_mask\":32"));
    }

    #[test]
    fn out_of_range_pin_is_not_supported() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                i2c_port: 0,
                sda: 21,
                scl: 22,
                address: 0x20,
            },
        )
        .unwrap();
        assert!(driver.read_value("pin16").is_err());
    }
}
