//! Pico companion driver (spec §4.4): an I2C peripheral exposing a memory
//! map of heterogeneous sub-devices keyed by a short tag (`FPWM`, `A`, …).

use std::sync::Arc;

use resource_hal::{Arbiter, I2cMode};
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::value::DeviceValue;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
enum SubKind {
    Pwm,
    Adc,
    Stepper,
    Output,
}

impl SubKind {
    fn width(self) -> usize {
        match self {
            SubKind::Pwm | SubKind::Adc => 2,
            SubKind::Stepper => 4,
            SubKind::Output => 1,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct SubDevice {
    tag: String,
    kind: SubKind,
    offset: usize,
}

#[derive(Serialize, Deserialize, Clone)]
struct Config {
    i2c_port: u8,
    sda: u32,
    scl: u32,
    address: u8,
    map: Vec<SubDevice>,
    map_len: usize,
}

pub struct Pico {
    _i2c: resource_hal::I2cHandle,
    address: u8,
    map: Vec<SubDevice>,
    memory: Vec<u8>,
}

impl Pico {
    fn find(&self, tag: &str) -> CoreResult<&SubDevice> {
        self.map
            .iter()
            .find(|s| s.tag == tag)
            .ok_or_else(|| CoreError::not_supported(tag))
    }

    fn decode(&self, sub: &SubDevice) -> DeviceValue {
        let bytes = &self.memory[sub.offset..sub.offset + sub.kind.width()];
        match sub.kind {
            SubKind::Pwm => DeviceValue::Pwm(u16::from_le_bytes([bytes[0], bytes[1]])),
            SubKind::Adc => DeviceValue::Analog(u16::from_le_bytes([bytes[0], bytes[1]])),
            SubKind::Stepper => {
                DeviceValue::UnsignedIntegral(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u16)
            }
            SubKind::Output => DeviceValue::Enable(bytes[0] != 0),
        }
    }

    fn encode(&mut self, sub: &SubDevice, value: DeviceValue) -> CoreResult<()> {
        let width = sub.kind.width();
        let bytes: Vec<u8> = match (sub.kind, value) {
            (SubKind::Pwm, DeviceValue::Pwm(v)) => v.to_le_bytes().to_vec(),
            (SubKind::Adc, DeviceValue::Analog(v)) => v.to_le_bytes().to_vec(),
            (SubKind::Stepper, DeviceValue::UnsignedIntegral(v)) => {
                (v as u32).to_le_bytes().to_vec()
            }
            (SubKind::Output, DeviceValue::Enable(v)) => vec![v as u8],
            _ => return Err(CoreError::malformed("value unit does not match sub-device kind")),
        };
        self.memory[sub.offset..sub.offset + width].copy_from_slice(&bytes);
        Ok(())
    }
}

impl Driver for Pico {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        // A real driver refreshes the full memory map over I2C here
        // before decoding; the core keeps `memory` as the last-known
        // image.
        let sub = self.find(what)?.clone();
        Ok(self.decode(&sub))
    }

    fn write_value(&mut self, what: &str, value: DeviceValue) -> CoreResult<()> {
        let sub = self.find(what)?.clone();
        self.encode(&sub, value)
        // A real driver writes back only `[sub.offset, sub.offset+width)`.
    }

    fn call_device_action(
        &mut self,
        _config: &mut DeviceConfig,
        action: &str,
        _input: &str,
    ) -> CoreResult<()> {
        match action {
            "dump" | "discover" => Ok(()),
            _ => Err(CoreError::not_supported(action)),
        }
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"pico_companion","address":{},"sub_devices":{}}}"#,
            self.address,
            self.map.len()
        )
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    let i2c = arbiter.acquire_i2c(cfg.i2c_port, I2cMode::Controller, cfg.sda, cfg.scl)?;
    Some(Box::new(Pico {
        _i2c: i2c,
        address: cfg.address,
        map: cfg.map.clone(),
        memory: vec![0; cfg.map_len],
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "pico_companion_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("pico_companion_driver", config_out.buf)?;
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
    fn write_then_read_round_trips_through_memory_map() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                i2c_port: 0,
                sda: 21,
                scl: 22,
                address: 0x10,
                map: vec![SubDevice {
                    tag: "FPWM".to_string(),
                    kind: SubKind::Pwm,
                    offset: 0,
                }],
                map_len: 2,
            },
        )
        .unwrap();
        driver.write_value("FPWM", DeviceValue::Pwm(777)).unwrap();
        assert_eq!(driver.read_value("FPWM").unwrap(), DeviceValue::Pwm(777));
    }

    #[test]
    fn unknown_tag_is_not_supported() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(
            &arb,
            &Config {
                i2c_port: 0,
                sda: 21,
                scl: 22,
                address: 0x10,
                map: vec![],
                map_len: 0,
            },
        )
        .unwrap();
        assert!(driver.read_value("ZZZZ").is_err());
    }
}
