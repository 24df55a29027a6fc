//! Logical pH probe (spec §4.4): two calibration points `(analog, pH)`,
//! linearly interpolated against an upstream analog reading.

use std::sync::Arc;

use resource_hal::Arbiter;
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::value::DeviceValue;

#[derive(Serialize, Deserialize, Clone)]
struct Config {
    source_index: usize,
    source_what: String,
    lower_analog: f32,
    lower_ph: f32,
    higher_analog: f32,
    higher_ph: f32,
}

pub struct PhProbe {
    source_index: usize,
    source_what: String,
    lower: (f32, f32),
    higher: (f32, f32),
    last_analog: Option<f32>,
}

impl PhProbe {
    fn ph_for(&self, analog: f32) -> f32 {
        let (a0, p0) = self.lower;
        let (a1, p1) = self.higher;
        if (a1 - a0).abs() < f32::EPSILON {
            return p0;
        }
        p0 + (p1 - p0) * (analog - a0) / (a1 - a0)
    }
}

impl Driver for PhProbe {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        if what != "ph" {
            return Err(CoreError::not_supported(what));
        }
        let analog = self
            .last_analog
            .ok_or_else(|| CoreError::operation_failure("no upstream reading yet"))?;
        Ok(DeviceValue::Ph(self.ph_for(analog)))
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
        #[derive(Deserialize)]
        struct Args {
            ph: f32,
        }
        let args: Args =
            serde_json::from_str(input).map_err(|e| CoreError::malformed(e.to_string()))?;
        let analog = self
            .last_analog
            .ok_or_else(|| CoreError::operation_failure("no upstream reading yet"))?;
        match action {
            "calibrate-lower" => self.lower = (analog, args.ph),
            "calibrate-higher" => self.higher = (analog, args.ph),
            _ => return Err(CoreError::not_supported(action)),
        }
        self.persist(config);
        Ok(())
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"ph_probe","lower":{:?},"higher":{:?}}}"#,
            self.lower, self.higher
        )
    }

    fn upstream_read(&self) -> Option<(usize, String)> {
        Some((self.source_index, self.source_what.clone()))
    }

    fn receive_upstream(&mut self, value: DeviceValue) {
        if let Some(analog) = value.as_u16() {
            self.last_analog = Some(analog as f32);
        }
    }
}

impl PhProbe {
    fn persist(&self, config: &mut DeviceConfig) {
        let cfg = Config {
            source_index: self.source_index,
            source_what: self.source_what.clone(),
            lower_analog: self.lower.0,
            lower_ph: self.lower.1,
            higher_analog: self.higher.0,
            higher_ph: self.higher.1,
        };
        codec::encode_into(&mut config.buf, &cfg);
    }
}

fn build(_arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    Some(Box::new(PhProbe {
        source_index: cfg.source_index,
        source_what: cfg.source_what.clone(),
        lower: (cfg.lower_analog, cfg.lower_ph),
        higher: (cfg.higher_analog, cfg.higher_ph),
        last_analog: None,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "ph_probe_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("ph_probe_driver", config_out.buf)?;
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

    fn driver() -> PhProbe {
        PhProbe {
            source_index: 0,
            source_what: "a0".to_string(),
            lower: (100.0, 4.0),
            higher: (900.0, 10.0),
            last_analog: None,
        }
    }

    #[test]
    fn interpolates_between_calibration_points() {
        let mut probe = driver();
        probe.receive_upstream(DeviceValue::Analog(500));
        let DeviceValue::Ph(ph) = probe.read_value("ph").unwrap() else {
            panic!("expected ph value")
        };
        assert!((ph - 7.0).abs() < 0.01);
    }

    #[test]
    fn calibrate_lower_anchors_current_reading() {
        let mut probe = driver();
        probe.receive_upstream(DeviceValue::Analog(150));
        let mut config = DeviceConfig::EMPTY;
        probe
            .call_device_action(&mut config, "calibrate-lower", r#"{"ph":4.2}"#)
            .unwrap();
        assert_eq!(probe.lower, (150.0, 4.2));
    }

    #[test]
    fn read_without_upstream_reading_fails() {
        let mut probe = driver();
        assert!(probe.read_value("ph").is_err());
    }
}
