//! Tagged-union device value with unit (spec §3, wire vocabulary §6).
//!
//! Every reading and every write command in the core is a [`DeviceValue`]:
//! a unit tag paired with exactly the primitive that unit implies. `unit =
//! None` always means "invalid" — there is no separate validity flag.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};

/// The unit a [`DeviceValue`] is tagged with. Each variant maps to exactly
/// one primitive type, enforced by [`DeviceValue`] itself rather than by
/// this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// No value; the slot/reading is invalid.
    None,
    /// Degrees Celsius, `f32`.
    Temperature,
    /// pH, `f32`.
    Ph,
    /// Relative humidity percent, `f32`.
    Humidity,
    /// Volts, `f32`.
    Voltage,
    /// Amperes, `f32`.
    Ampere,
    /// Watts, `f32`.
    Watt,
    /// Total dissolved solids (ppm), `f32`.
    Tds,
    /// Raw ADC reading, `u16`.
    Analog,
    /// Raw PWM duty, `u16`.
    Pwm,
    /// Milligrams, `i16` (signed: load cells can read negative offsets).
    Milligrams,
    /// Milliliters, `f32`.
    Milliliter,
    /// Boolean enable/disable, `bool`.
    Enable,
    /// Percent, `u8`.
    Percentage,
    /// Seconds, `u16`.
    Seconds,
    /// Generic unsigned step/count value, `u16`.
    UnsignedIntegral,
}

impl Unit {
    /// The canonical wire alias for this unit — the first alias listed in
    /// spec §6, and the only form ever emitted.
    pub fn canonical_key(self) -> &'static str {
        match self {
            Unit::None => "none",
            Unit::Temperature => "temperature",
            Unit::Ph => "ph",
            Unit::Humidity => "humidity",
            Unit::Voltage => "voltage",
            Unit::Ampere => "ampere",
            Unit::Watt => "watt",
            Unit::Tds => "tds",
            Unit::Analog => "analog",
            Unit::Pwm => "pwm",
            Unit::Milligrams => "milligrams",
            Unit::Milliliter => "milliliter",
            Unit::Enable => "enable",
            Unit::Percentage => "percentage",
            Unit::Seconds => "seconds",
            Unit::UnsignedIntegral => "generic_unsigned_integral",
        }
    }

    /// Parses any accepted wire alias (spec §6) into a [`Unit`].
    pub fn from_key(key: &str) -> Option<Unit> {
        Some(match key {
            "none" => Unit::None,
            "temperature" | "degc" | "celsius" | "c" => Unit::Temperature,
            "ph" => Unit::Ph,
            "humidity" => Unit::Humidity,
            "voltage" | "v" | "volt" => Unit::Voltage,
            "ampere" | "a" | "amp" => Unit::Ampere,
            "watt" => Unit::Watt,
            "tds" => Unit::Tds,
            "analog" | "generic_analog" => Unit::Analog,
            "pwm" | "generic_pwm" => Unit::Pwm,
            "milligrams" | "mg" => Unit::Milligrams,
            "milliliter" | "ml" => Unit::Milliliter,
            "enable" | "bool" | "switch" => Unit::Enable,
            "percentage" | "%" => Unit::Percentage,
            "seconds" | "s" | "sec" => Unit::Seconds,
            "generic_unsigned_integral" => Unit::UnsignedIntegral,
            _ => return None,
        })
    }
}

/// A unit-tagged value. `None` carries no payload and is always invalid;
/// every other variant's payload is exactly the primitive its unit implies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceValue {
    /// Invalid / absent value.
    None,
    /// See [`Unit::Temperature`].
    Temperature(f32),
    /// See [`Unit::Ph`].
    Ph(f32),
    /// See [`Unit::Humidity`].
    Humidity(f32),
    /// See [`Unit::Voltage`].
    Voltage(f32),
    /// See [`Unit::Ampere`].
    Ampere(f32),
    /// See [`Unit::Watt`].
    Watt(f32),
    /// See [`Unit::Tds`].
    Tds(f32),
    /// See [`Unit::Analog`].
    Analog(u16),
    /// See [`Unit::Pwm`].
    Pwm(u16),
    /// See [`Unit::Milligrams`].
    Milligrams(i16),
    /// See [`Unit::Milliliter`].
    Milliliter(f32),
    /// See [`Unit::Enable`].
    Enable(bool),
    /// See [`Unit::Percentage`].
    Percentage(u8),
    /// See [`Unit::Seconds`].
    Seconds(u16),
    /// See [`Unit::UnsignedIntegral`].
    UnsignedIntegral(u16),
}

impl DeviceValue {
    /// The unit this value is tagged with.
    pub fn unit(&self) -> Unit {
        match self {
            DeviceValue::None => Unit::None,
            DeviceValue::Temperature(_) => Unit::Temperature,
            DeviceValue::Ph(_) => Unit::Ph,
            DeviceValue::Humidity(_) => Unit::Humidity,
            DeviceValue::Voltage(_) => Unit::Voltage,
            DeviceValue::Ampere(_) => Unit::Ampere,
            DeviceValue::Watt(_) => Unit::Watt,
            DeviceValue::Tds(_) => Unit::Tds,
            DeviceValue::Analog(_) => Unit::Analog,
            DeviceValue::Pwm(_) => Unit::Pwm,
            DeviceValue::Milligrams(_) => Unit::Milligrams,
            DeviceValue::Milliliter(_) => Unit::Milliliter,
            DeviceValue::Enable(_) => Unit::Enable,
            DeviceValue::Percentage(_) => Unit::Percentage,
            DeviceValue::Seconds(_) => Unit::Seconds,
            DeviceValue::UnsignedIntegral(_) => Unit::UnsignedIntegral,
        }
    }

    /// `true` for [`Unit::None`] — mirrors "unit none means invalid".
    pub fn is_valid(&self) -> bool {
        !matches!(self, DeviceValue::None)
    }

    /// Reads this value as `f32`, if its unit is float-backed.
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            DeviceValue::Temperature(v)
            | DeviceValue::Ph(v)
            | DeviceValue::Humidity(v)
            | DeviceValue::Voltage(v)
            | DeviceValue::Ampere(v)
            | DeviceValue::Watt(v)
            | DeviceValue::Tds(v)
            | DeviceValue::Milliliter(v) => Some(v),
            _ => None,
        }
    }

    /// Reads this value as `u16`, if its unit is `u16`-backed.
    pub fn as_u16(&self) -> Option<u16> {
        match *self {
            DeviceValue::Analog(v) | DeviceValue::Pwm(v) | DeviceValue::UnsignedIntegral(v) => {
                Some(v)
            }
            DeviceValue::Seconds(v) => Some(v),
            _ => None,
        }
    }

    /// Reads this value as `i16`, if its unit is `i16`-backed.
    pub fn as_i16(&self) -> Option<i16> {
        match *self {
            DeviceValue::Milligrams(v) => Some(v),
            _ => None,
        }
    }

    /// Reads this value as `u8`, if its unit is `u8`-backed.
    pub fn as_u8(&self) -> Option<u8> {
        match *self {
            DeviceValue::Percentage(v) => Some(v),
            _ => None,
        }
    }

    /// Reads this value as `bool`, if its unit is `bool`-backed.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            DeviceValue::Enable(v) => Some(v),
            _ => None,
        }
    }

    /// Builds a [`DeviceValue`] for `unit` from a raw `f32`, only when
    /// `unit`'s primitive is float-backed. Mirrors `create_from_unit` in
    /// spec §8 invariant 5; the matching read-back is [`DeviceValue::as_f32`].
    pub fn from_unit_f32(unit: Unit, raw: f32) -> Option<DeviceValue> {
        Some(match unit {
            Unit::Temperature => DeviceValue::Temperature(raw),
            Unit::Ph => DeviceValue::Ph(raw),
            Unit::Humidity => DeviceValue::Humidity(raw),
            Unit::Voltage => DeviceValue::Voltage(raw),
            Unit::Ampere => DeviceValue::Ampere(raw),
            Unit::Watt => DeviceValue::Watt(raw),
            Unit::Tds => DeviceValue::Tds(raw),
            Unit::Milliliter => DeviceValue::Milliliter(raw),
            _ => return None,
        })
    }

    /// The difference `self - other`, only defined when both values share a
    /// unit; `None` otherwise (spec §3).
    pub fn difference(&self, other: &DeviceValue) -> Option<DeviceValue> {
        if self.unit() != other.unit() {
            return None;
        }
        match (*self, *other) {
            (DeviceValue::Temperature(a), DeviceValue::Temperature(b)) => {
                Some(DeviceValue::Temperature(a - b))
            }
            (DeviceValue::Ph(a), DeviceValue::Ph(b)) => Some(DeviceValue::Ph(a - b)),
            (DeviceValue::Humidity(a), DeviceValue::Humidity(b)) => {
                Some(DeviceValue::Humidity(a - b))
            }
            (DeviceValue::Voltage(a), DeviceValue::Voltage(b)) => {
                Some(DeviceValue::Voltage(a - b))
            }
            (DeviceValue::Ampere(a), DeviceValue::Ampere(b)) => Some(DeviceValue::Ampere(a - b)),
            (DeviceValue::Watt(a), DeviceValue::Watt(b)) => Some(DeviceValue::Watt(a - b)),
            (DeviceValue::Tds(a), DeviceValue::Tds(b)) => Some(DeviceValue::Tds(a - b)),
            (DeviceValue::Analog(a), DeviceValue::Analog(b)) => {
                Some(DeviceValue::Analog(a.saturating_sub(b)))
            }
            (DeviceValue::Pwm(a), DeviceValue::Pwm(b)) => {
                Some(DeviceValue::Pwm(a.saturating_sub(b)))
            }
            (DeviceValue::Milligrams(a), DeviceValue::Milligrams(b)) => {
                Some(DeviceValue::Milligrams(a.saturating_sub(b)))
            }
            (DeviceValue::Milliliter(a), DeviceValue::Milliliter(b)) => {
                Some(DeviceValue::Milliliter(a - b))
            }
            (DeviceValue::Percentage(a), DeviceValue::Percentage(b)) => {
                Some(DeviceValue::Percentage(a.saturating_sub(b)))
            }
            (DeviceValue::Seconds(a), DeviceValue::Seconds(b)) => {
                Some(DeviceValue::Seconds(a.saturating_sub(b)))
            }
            (DeviceValue::UnsignedIntegral(a), DeviceValue::UnsignedIntegral(b)) => {
                Some(DeviceValue::UnsignedIntegral(a.saturating_sub(b)))
            }
            _ => None,
        }
    }

    /// The sum `self + other`, only defined when both values share a unit
    /// (spec §3).
    pub fn sum(&self, other: &DeviceValue) -> Option<DeviceValue> {
        if self.unit() != other.unit() {
            return None;
        }
        match (*self, *other) {
            (DeviceValue::Temperature(a), DeviceValue::Temperature(b)) => {
                Some(DeviceValue::Temperature(a + b))
            }
            (DeviceValue::Ph(a), DeviceValue::Ph(b)) => Some(DeviceValue::Ph(a + b)),
            (DeviceValue::Humidity(a), DeviceValue::Humidity(b)) => {
                Some(DeviceValue::Humidity(a + b))
            }
            (DeviceValue::Voltage(a), DeviceValue::Voltage(b)) => {
                Some(DeviceValue::Voltage(a + b))
            }
            (DeviceValue::Ampere(a), DeviceValue::Ampere(b)) => Some(DeviceValue::Ampere(a + b)),
            (DeviceValue::Watt(a), DeviceValue::Watt(b)) => Some(DeviceValue::Watt(a + b)),
            (DeviceValue::Tds(a), DeviceValue::Tds(b)) => Some(DeviceValue::Tds(a + b)),
            (DeviceValue::Analog(a), DeviceValue::Analog(b)) => {
                Some(DeviceValue::Analog(a.saturating_add(b)))
            }
            (DeviceValue::Pwm(a), DeviceValue::Pwm(b)) => {
                Some(DeviceValue::Pwm(a.saturating_add(b)))
            }
            (DeviceValue::Milligrams(a), DeviceValue::Milligrams(b)) => {
                Some(DeviceValue::Milligrams(a.saturating_add(b)))
            }
            (DeviceValue::Milliliter(a), DeviceValue::Milliliter(b)) => {
                Some(DeviceValue::Milliliter(a + b))
            }
            (DeviceValue::Percentage(a), DeviceValue::Percentage(b)) => {
                Some(DeviceValue::Percentage(a.saturating_add(b)))
            }
            (DeviceValue::Seconds(a), DeviceValue::Seconds(b)) => {
                Some(DeviceValue::Seconds(a.saturating_add(b)))
            }
            (DeviceValue::UnsignedIntegral(a), DeviceValue::UnsignedIntegral(b)) => {
                Some(DeviceValue::UnsignedIntegral(a.saturating_add(b)))
            }
            _ => None,
        }
    }
}

impl Serialize for DeviceValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = Map::new();
        let json_value = match *self {
            DeviceValue::None => return map.serialize(serializer),
            DeviceValue::Temperature(v) => Json::from(v),
            DeviceValue::Ph(v) => Json::from(v),
            DeviceValue::Humidity(v) => Json::from(v),
            DeviceValue::Voltage(v) => Json::from(v),
            DeviceValue::Ampere(v) => Json::from(v),
            DeviceValue::Watt(v) => Json::from(v),
            DeviceValue::Tds(v) => Json::from(v),
            DeviceValue::Analog(v) => Json::from(v),
            DeviceValue::Pwm(v) => Json::from(v),
            DeviceValue::Milligrams(v) => Json::from(v),
            DeviceValue::Milliliter(v) => Json::from(v),
            DeviceValue::Enable(v) => Json::from(v),
            DeviceValue::Percentage(v) => Json::from(v),
            DeviceValue::Seconds(v) => Json::from(v),
            DeviceValue::UnsignedIntegral(v) => Json::from(v),
        };
        map.insert(self.unit().canonical_key().to_string(), json_value);
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::deserialize(deserializer)?;
        let (key, value) = map
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("device value object must have one key"))?;
        let unit = Unit::from_key(&key)
            .ok_or_else(|| D::Error::custom(format!("unknown device value unit {key:?}")))?;

        let num = |v: &Json| v.as_f64().ok_or_else(|| D::Error::custom("expected a number"));

        Ok(match unit {
            Unit::None => DeviceValue::None,
            Unit::Temperature => DeviceValue::Temperature(num(&value)? as f32),
            Unit::Ph => DeviceValue::Ph(num(&value)? as f32),
            Unit::Humidity => DeviceValue::Humidity(num(&value)? as f32),
            Unit::Voltage => DeviceValue::Voltage(num(&value)? as f32),
            Unit::Ampere => DeviceValue::Ampere(num(&value)? as f32),
            Unit::Watt => DeviceValue::Watt(num(&value)? as f32),
            Unit::Tds => DeviceValue::Tds(num(&value)? as f32),
            Unit::Analog => DeviceValue::Analog(num(&value)? as u16),
            Unit::Pwm => DeviceValue::Pwm(num(&value)? as u16),
            Unit::Milligrams => DeviceValue::Milligrams(num(&value)? as i16),
            Unit::Milliliter => DeviceValue::Milliliter(num(&value)? as f32),
            Unit::Enable => DeviceValue::Enable(
                value
                    .as_bool()
                    .ok_or_else(|| D::Error::custom("expected a bool"))?,
            ),
            Unit::Percentage => DeviceValue::Percentage(num(&value)? as u8),
            Unit::Seconds => DeviceValue::Seconds(num(&value)? as u16),
            Unit::UnsignedIntegral => DeviceValue::UnsignedIntegral(num(&value)? as u16),
        })
    }
}
