//! Logical dosing pump (spec §4.4): converts a `milliliter` write into a
//! step count on a downstream stepper-enabled device.

use std::sync::Arc;

use resource_hal::Arbiter;
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::value::DeviceValue;

#[derive(Serialize, Deserialize, Clone, Copy)]
struct Config {
    target_index: usize,
    units_times_ten_per_ml: u16,
}

pub struct DosingPump {
    target_index: usize,
    units_times_ten_per_ml: u16,
    pending: Option<u16>,
}

impl DosingPump {
    fn ml_to_steps(&self, ml: f32) -> u16 {
        ((ml * self.units_times_ten_per_ml as f32) / 10.0).round().max(0.0) as u16
    }
}

impl Driver for DosingPump {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        Err(CoreError::not_supported(what))
    }

    fn write_value(&mut self, what: &str, value: DeviceValue) -> CoreResult<()> {
        if what != "milliliter" {
            return Err(CoreError::not_supported(what));
        }
        let ml = value
            .as_f32()
            .ok_or_else(|| CoreError::malformed("expected a milliliter value"))?;
        self.pending = Some(self.ml_to_steps(ml));
        Ok(())
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"dosing_pump","target_index":{},"calibration":{}}}"#,
            self.target_index, self.units_times_ten_per_ml
        )
    }

    fn drain_pending_writes(&mut self) -> Vec<(usize, String, DeviceValue)> {
        let Some(steps) = self.pending.take() else {
            return Vec::new();
        };
        vec![(
            self.target_index,
            "generic_unsigned_integral".to_string(),
            DeviceValue::UnsignedIntegral(steps),
        )]
    }
}

fn build(_arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    Some(Box::new(DosingPump {
        target_index: cfg.target_index,
        units_times_ten_per_ml: cfg.units_times_ten_per_ml,
        pending: None,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "dosing_pump_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("dosing_pump_driver", config_out.buf)?;
        Some(driver)
    },
    create_from_config: |arbiter, config| {
        let cfg: Config = codec::decode_from(&config.buf)?;
        build(arbiter, &cfg)
    },
};
