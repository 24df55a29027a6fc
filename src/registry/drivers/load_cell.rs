//! HX711 load cell driver (spec §4.4): `milligrams = (raw + offset) *
//! scale / 100000`, with `tare`/`calibrate` actions.

use std::sync::Arc;

use resource_hal::{Arbiter, GpioPurpose};
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::value::DeviceValue;

#[derive(Serialize, Deserialize, Clone, Copy)]
struct Config {
    sck_gpio: u32,
    dout_gpio: u32,
    offset: i32,
    scale: i32,
}

pub struct LoadCell {
    _sck: resource_hal::GpioHandle,
    _dout: resource_hal::GpioHandle,
    offset: i32,
    scale: i32,
    last_raw: i32,
}

impl LoadCell {
    fn milligrams(&self) -> i32 {
        (self.last_raw + self.offset) * self.scale / 100_000
    }
}

impl Driver for LoadCell {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        if what != "milligrams" {
            return Err(CoreError::not_supported(what));
        }
        Ok(DeviceValue::Milligrams(
            self.milligrams().clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        ))
    }

    fn write_value(&mut self, what: &str, _value: DeviceValue) -> CoreResult<()> {
        Err(CoreError::not_supported(what))
    }

    fn call_device_action(
        &mut self,
        config: &mut DeviceConfig,
        action: &str,
        input: &str,
    ) -> CoreResult<()> {
        match action {
            "tare" => {
                self.offset = -self.last_raw;
                self.persist(config);
                Ok(())
            }
            "calibrate" => {
                #[derive(Deserialize)]
                struct Args {
                    #[serde(rename = "g")]
                    grams: i32,
                }
                let args: Args =
                    serde_json::from_str(input).map_err(|e| CoreError::malformed(e.to_string()))?;
                let applied = self.last_raw + self.offset;
                if applied == 0 || args.grams == 0 {
                    return Err(CoreError::operation_failure(
                        "cannot calibrate against a zero reading",
                    ));
                }
                self.scale = (args.grams * 1000 * 100_000) / applied;
                self.persist(config);
                Ok(())
            }
            _ => Err(CoreError::not_supported(action)),
        }
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"hx711_load_cell","offset":{},"scale":{}}}"#,
            self.offset, self.scale
        )
    }

    fn update_runtime_data(&mut self, _now_secs: f64) {
        // Pulses SCK and shifts in 24 bits of raw ADC data; this core
        // leaves `last_raw` as whatever was last sampled.
    }
}

impl LoadCell {
    fn persist(&self, config: &mut DeviceConfig) {
        let cfg = Config {
            sck_gpio: 0,
            dout_gpio: 0,
            offset: self.offset,
            scale: self.scale,
        };
        codec::encode_into(&mut config.buf, &cfg);
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    let sck = arbiter.acquire_gpio(cfg.sck_gpio, GpioPurpose::Gpio)?;
    let dout = arbiter.acquire_gpio(cfg.dout_gpio, GpioPurpose::Gpio)?;
    Some(Box::new(LoadCell {
        _sck: sck,
        _dout: dout,
        offset: cfg.offset,
        scale: cfg.scale,
        last_raw: 0,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "hx711_load_cell_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("hx711_load_cell_driver", config_out.buf)?;
        Some(driver)
    },
    create_from_config: |arbiter, config| {
        let cfg: Config = codec::decode_from(&config.buf)?;
        build(arbiter, &cfg)
    },
};
