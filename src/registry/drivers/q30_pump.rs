//! Q30 composite lamp/fan driver, recovered from `original_source`'s
//! `q30_driver.*`: a lamp with per-channel intensities (driven by the
//! schedule engine through ordinary `WriteToDevice` calls) that derives a
//! cooling-fan speed from the sum of its channel values and forwards it,
//! plus an enable signal, to two downstream devices every tick.

use std::collections::BTreeMap;
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
    fan_device: usize,
    on_device: usize,
    channels: Vec<String>,
}

pub struct Q30Pump {
    fan_device: usize,
    on_device: usize,
    channel_values: BTreeMap<String, f32>,
    last_fan_speed: Option<u8>,
}

impl Q30Pump {
    fn fan_speed(&self) -> u8 {
        let total: f32 = self.channel_values.values().map(|v| v * 2.0).sum();
        total.round().clamp(0.0, 100.0) as u8
    }
}

impl Driver for Q30Pump {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        self.channel_values
            .get(what)
            .map(|v| DeviceValue::Percentage(v.round().clamp(0.0, 100.0) as u8))
            .ok_or_else(|| CoreError::not_supported(what))
    }

    fn write_value(&mut self, what: &str, value: DeviceValue) -> CoreResult<()> {
        if !self.channel_values.contains_key(what) {
            return Err(CoreError::not_supported(what));
        }
        let pct = value
            .as_u8()
            .ok_or_else(|| CoreError::malformed("expected a percentage value"))?;
        self.channel_values.insert(what.to_string(), pct as f32);
        Ok(())
    }

    fn get_info(&self) -> String {
        let channels: Vec<String> = self
            .channel_values
            .iter()
            .map(|(k, v)| format!(r#""{k}":{v}"#))
            .collect();
        format!(
            r#"{{"driver":"q30_driver","channels":{{{}}}}}"#,
            channels.join(",")
        )
    }

    fn update_runtime_data(&mut self, _now_secs: f64) {
        self.last_fan_speed = Some(self.fan_speed());
    }

    fn drain_pending_writes(&mut self) -> Vec<(usize, String, DeviceValue)> {
        let Some(speed) = self.last_fan_speed.take() else {
            return Vec::new();
        };
        vec![
            (
                self.fan_device,
                "percentage".to_string(),
                DeviceValue::Percentage(speed),
            ),
            (
                self.on_device,
                "enable".to_string(),
                DeviceValue::Enable(speed > 0),
            ),
        ]
    }
}

fn build(_arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    let channel_values = cfg.channels.iter().map(|c| (c.clone(), 0.0)).collect();
    Some(Box::new(Q30Pump {
        fan_device: cfg.fan_device,
        on_device: cfg.on_device,
        channel_values,
        last_fan_speed: None,
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "q30_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        if cfg.channels.is_empty() {
            return None;
        }
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("q30_driver", config_out.buf)?;
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

    fn driver() -> Q30Pump {
        Q30Pump {
            fan_device: 5,
            on_device: 6,
            channel_values: [("b".to_string(), 0.0), ("w".to_string(), 0.0)]
                .into_iter()
                .collect(),
            last_fan_speed: None,
        }
    }

    #[test]
    fn fan_speed_derives_from_channel_sum_and_forwards_to_both_targets() {
        let mut pump = driver();
        pump.write_value("b", DeviceValue::Percentage(10)).unwrap();
        pump.write_value("w", DeviceValue::Percentage(20)).unwrap();
        pump.update_runtime_data(0.0);
        let writes = pump.drain_pending_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], (5, "percentage".to_string(), DeviceValue::Percentage(60)));
        assert_eq!(writes[1], (6, "enable".to_string(), DeviceValue::Enable(true)));
    }

    #[test]
    fn fan_speed_clamps_at_100() {
        let mut pump = driver();
        pump.write_value("b", DeviceValue::Percentage(90)).unwrap();
        pump.write_value("w", DeviceValue::Percentage(90)).unwrap();
        pump.update_runtime_data(0.0);
        assert_eq!(pump.fan_speed(), 100);
    }

    #[test]
    fn unknown_channel_rejected() {
        let mut pump = driver();
        assert!(pump.write_value("r", DeviceValue::Percentage(5)).is_err());
    }
}
