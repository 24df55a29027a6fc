//! Closed-loop switch controller (spec §4.7): reads one device and drives
//! another to hold a target value within tolerance.

use crate::error::{CoreError, CoreResult};
use crate::value::DeviceValue;

/// Which value to fall back to on a read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchDefault {
    /// Command `low_value`.
    Low,
    /// Command `high_value`.
    High,
}

/// A switch's static configuration, validated once at creation.
pub struct SwitchConfig {
    /// Registry slot to read from.
    pub reading_device_id: usize,
    /// Selector passed to `read_value` on the reading device.
    pub reading_argument: String,
    /// Registry slot to write to.
    pub target_device_id: usize,
    /// Selector passed to `write_value` on the target device.
    pub target_argument: String,
    /// The value the reading device should hold.
    pub target_value: DeviceValue,
    /// Commanded when the reading is too high (spec §4.7 step 2).
    pub low_value: DeviceValue,
    /// Commanded when the reading is too low.
    pub high_value: DeviceValue,
    /// Maximum allowed deviation from `target_value` before acting.
    pub max_allowed_difference: DeviceValue,
    /// Commanded value on a failed read.
    pub default_value: SwitchDefault,
}

/// A switch controller instance: validated config plus the last value it
/// commanded, so it only writes on change (spec §4.7 step 4).
pub struct SwitchController {
    config: SwitchConfig,
    last_commanded: Option<DeviceValue>,
}

impl SwitchController {
    /// Validates `config` against the switch's own slot index (to prevent
    /// self-loops) and checks that `target`/`low`/`high`/`difference` share
    /// a unit, then builds the controller.
    pub fn new(config: SwitchConfig, own_index: usize) -> CoreResult<SwitchController> {
        if config.reading_device_id == own_index || config.target_device_id == own_index {
            return Err(CoreError::malformed("switch cannot reference its own slot"));
        }
        let unit = config.target_value.unit();
        if config.low_value.unit() != unit
            || config.high_value.unit() != unit
            || config.max_allowed_difference.unit() != unit
        {
            return Err(CoreError::malformed(
                "target/low/high/difference must share a unit",
            ));
        }
        Ok(SwitchController {
            config,
            last_commanded: None,
        })
    }

    /// The device slot to read from.
    pub fn reading_device_id(&self) -> usize {
        self.config.reading_device_id
    }

    /// The selector to pass to `read_value` on the reading device.
    pub fn reading_argument(&self) -> &str {
        &self.config.reading_argument
    }

    /// The device slot to write to.
    pub fn target_device_id(&self) -> usize {
        self.config.target_device_id
    }

    /// The selector to pass to `write_value` on the target device.
    pub fn target_argument(&self) -> &str {
        &self.config.target_argument
    }

    /// Evaluates one tick given the outcome of reading the configured
    /// device (`None` for a failed read). Returns the value to write if it
    /// differs from what was last commanded, else `None` (no-op tick).
    pub fn tick(&mut self, reading: Option<DeviceValue>) -> Option<DeviceValue> {
        let chosen = match reading {
            Some(current) => {
                let diff = self.config.target_value.difference(&current)?.as_f32()?;
                let allowed = self.config.max_allowed_difference.as_f32()?;
                if diff.abs() <= allowed.abs() {
                    return None;
                }
                if diff < 0.0 {
                    self.config.low_value
                } else {
                    self.config.high_value
                }
            }
            None => match self.config.default_value {
                SwitchDefault::Low => self.config.low_value,
                SwitchDefault::High => self.config.high_value,
            },
        };

        if self.last_commanded == Some(chosen) {
            return None;
        }
        self.last_commanded = Some(chosen);
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> SwitchController {
        SwitchController::new(
            SwitchConfig {
                reading_device_id: 2,
                reading_argument: "temperature".to_string(),
                target_device_id: 4,
                target_argument: "enable".to_string(),
                target_value: DeviceValue::Temperature(25.0),
                low_value: DeviceValue::Enable(false),
                high_value: DeviceValue::Enable(true),
                max_allowed_difference: DeviceValue::Temperature(0.5),
                default_value: SwitchDefault::Low,
            },
            0,
        )
        .unwrap()
    }

    #[test]
    fn creation_rejects_self_loop() {
        let err = SwitchController::new(
            SwitchConfig {
                reading_device_id: 0,
                reading_argument: String::new(),
                target_device_id: 1,
                target_argument: String::new(),
                target_value: DeviceValue::Temperature(1.0),
                low_value: DeviceValue::Temperature(0.0),
                high_value: DeviceValue::Temperature(2.0),
                max_allowed_difference: DeviceValue::Temperature(0.1),
                default_value: SwitchDefault::Low,
            },
            0,
        );
        assert!(err.is_err());
    }

    #[test]
    fn creation_rejects_mismatched_units() {
        let err = SwitchController::new(
            SwitchConfig {
                reading_device_id: 2,
                reading_argument: String::new(),
                target_device_id: 4,
                target_argument: String::new(),
                target_value: DeviceValue::Temperature(25.0),
                low_value: DeviceValue::Humidity(0.0),
                high_value: DeviceValue::Temperature(2.0),
                max_allowed_difference: DeviceValue::Temperature(0.1),
                default_value: SwitchDefault::Low,
            },
            0,
        );
        assert!(err.is_err());
    }

    #[test]
    fn reading_above_target_past_tolerance_commands_low() {
        let mut sw = controller();
        let value = sw.tick(Some(DeviceValue::Temperature(26.0)));
        assert_eq!(value, Some(DeviceValue::Enable(false)));
    }

    #[test]
    fn reading_below_target_past_tolerance_commands_high() {
        let mut sw = controller();
        let value = sw.tick(Some(DeviceValue::Temperature(24.0)));
        assert_eq!(value, Some(DeviceValue::Enable(true)));
    }

    #[test]
    fn reading_within_tolerance_issues_no_write() {
        let mut sw = controller();
        assert_eq!(sw.tick(Some(DeviceValue::Temperature(25.2))), None);
    }

    #[test]
    fn failed_read_commands_the_default_value() {
        let mut sw = controller();
        assert_eq!(sw.tick(None), Some(DeviceValue::Enable(false)));
    }

    #[test]
    fn unchanged_command_is_not_reissued() {
        let mut sw = controller();
        assert_eq!(sw.tick(Some(DeviceValue::Temperature(26.0))), Some(DeviceValue::Enable(false)));
        assert_eq!(sw.tick(Some(DeviceValue::Temperature(27.0))), None);
    }
}
