//! Single-probe 1-wire temperature sensor (spec §4.4).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use resource_hal::{Arbiter, GpioPurpose};
use serde::{Deserialize, Serialize};

use super::codec;
use super::DriverFactory;
use crate::config::DeviceConfig;
use crate::error::{CoreError, CoreResult};
use crate::registry::Driver;
use crate::sample::SampleContainer;
use crate::value::DeviceValue;

fn address_table() -> &'static Mutex<HashSet<u64>> {
    static TABLE: OnceLock<Mutex<HashSet<u64>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashSet::new()))
}

#[derive(Serialize, Deserialize)]
struct Config {
    gpio: u32,
    address: u64,
}

pub struct TempProbe {
    _gpio: resource_hal::GpioHandle,
    address: u64,
    samples: SampleContainer<10>,
}

impl Drop for TempProbe {
    fn drop(&mut self) {
        address_table().lock().unwrap().remove(&self.address);
    }
}

impl Driver for TempProbe {
    fn read_value(&mut self, what: &str) -> CoreResult<DeviceValue> {
        if what != "temperature" {
            return Err(CoreError::not_supported(what));
        }
        self.samples
            .average()
            .map(|v| DeviceValue::Temperature(v as f32))
            .ok_or_else(|| CoreError::operation_failure("no samples yet"))
    }

    fn write_value(&mut self, what: &str, _value: DeviceValue) -> CoreResult<()> {
        Err(CoreError::not_supported(what))
    }

    fn get_info(&self) -> String {
        format!(
            r#"{{"driver":"ds18x20","address":{},"samples":{}}}"#,
            self.address,
            self.samples.size()
        )
    }

    fn update_runtime_data(&mut self, now_secs: f64) {
        // A real implementation issues a 1-wire convert+read; this core
        // models only the bookkeeping a completed conversion feeds.
        if let Some(last) = self.samples.last() {
            self.samples.put_sample(last.value, now_secs);
        }
    }
}

fn build(arbiter: &Arc<Arbiter>, cfg: &Config) -> Option<Box<dyn Driver>> {
    {
        let mut table = address_table().lock().unwrap();
        if !table.insert(cfg.address) {
            return None;
        }
    }
    let gpio = arbiter.acquire_gpio(cfg.gpio, GpioPurpose::Bus)?;
    Some(Box::new(TempProbe {
        _gpio: gpio,
        address: cfg.address,
        samples: SampleContainer::new(),
    }))
}

pub const FACTORY: DriverFactory = DriverFactory {
    name: "ds18x20_driver",
    create_from_json: |arbiter, input, config_out| {
        let cfg: Config = serde_json::from_str(input).ok()?;
        let driver = build(arbiter, &cfg)?;
        codec::encode_into(&mut config_out.buf, &cfg).then_some(())?;
        *config_out = DeviceConfig::new("ds18x20_driver", config_out.buf)?;
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
    use crate::value::Unit;

    #[test]
    fn duplicate_address_is_rejected() {
        let arb = Arc::new(Arbiter::new());
        let cfg_a = Config { gpio: 4, address: 1 };
        let cfg_b = Config { gpio: 5, address: 1 };
        let _first = build(&arb, &cfg_a).unwrap();
        assert!(build(&arb, &cfg_b).is_none());
        address_table().lock().unwrap().clear();
    }

    #[test]
    fn read_before_any_sample_fails() {
        let arb = Arc::new(Arbiter::new());
        let mut driver = build(&arb, &Config { gpio: 6, address: 99 }).unwrap();
        assert!(driver.read_value("temperature").is_err());
        address_table().lock().unwrap().clear();
    }

    #[test]
    fn unit_mismatch_is_rejected() {
        assert_eq!(Unit::Temperature.canonical_key(), "temperature");
    }
}
