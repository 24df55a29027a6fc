//! Concrete driver implementations (spec §4.4) and the recovered
//! `original_source` variants (SPEC_FULL §4.11). Each module exposes one
//! `FACTORY: DriverFactory`; [`ALL`] is the registry's open driver-name
//! space.

mod adc;
mod bme280;
pub mod codec;
mod dhtxx;
mod dosing_pump;
mod gpio_expander;
mod load_cell;
mod ph_probe;
mod pico;
mod pin;
mod q30_pump;
mod stepper;
mod temp_probe;

use super::DriverFactory;

/// Every driver factory known to the registry, matched by name against
/// `AddDevice`'s `driver_name`.
pub static ALL: &[DriverFactory] = &[
    temp_probe::FACTORY,
    adc::FACTORY,
    bme280::FACTORY,
    dhtxx::FACTORY,
    gpio_expander::FACTORY,
    pin::FACTORY,
    dosing_pump::FACTORY,
    stepper::FACTORY,
    load_cell::FACTORY,
    ph_probe::FACTORY,
    pico::FACTORY,
    q30_pump::FACTORY,
];
