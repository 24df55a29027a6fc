//! Resource arbitration for scarce hardware: GPIO pins, PWM timers and
//! channels, and I2C ports.
//!
//! Every driver that needs a pin, a timer, a PWM channel or an I2C bus goes
//! through the [`Arbiter`] rather than touching hardware addresses directly.
//! Handles are RAII: dropping a [`GpioHandle`]/[`TimerHandle`]/
//! [`ChannelHandle`]/[`I2cHandle`] releases the underlying share (or, for
//! the last holder, frees the resource) without physically resetting the
//! hardware — the next acquirer reprograms it from scratch.
//!
//! # Examples
//!
//! ```rust
//! use resource_hal::{Arbiter, GpioPurpose};
//!
//! let arbiter = Arbiter::new();
//! let handle = arbiter.acquire_gpio(4, GpioPurpose::Gpio).unwrap();
//! assert!(arbiter.acquire_gpio(4, GpioPurpose::Gpio).is_none());
//! drop(handle);
//! assert!(arbiter.acquire_gpio(4, GpioPurpose::Gpio).is_some());
//! ```

#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Number of LEDC-style PWM timer slots the arbiter manages.
pub const PWM_TIMER_SLOTS: usize = 4;
/// Number of LEDC-style PWM channel slots the arbiter manages.
pub const PWM_CHANNEL_SLOTS: usize = 8;

/// Ownership intent for a GPIO acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpioPurpose {
    /// Single-owner digital I/O. Only ever one outstanding handle.
    Gpio,
    /// Shared bus role (e.g. I2C SDA/SCL, 1-Wire). Any number of holders
    /// with the same purpose may share the pin.
    Bus,
}

/// Configuration tuple identifying a PWM timer's programmed state. Two
/// acquisitions with equal configs share the same underlying timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PwmTimerConfig {
    /// LEDC speed mode (high-speed vs low-speed on chips that have both).
    pub speed_mode: u8,
    /// Duty resolution, in bits.
    pub resolution_bits: u8,
    /// PWM frequency, in Hz.
    pub frequency_hz: u32,
    /// Timer number requested by the caller (a hint; the arbiter is free to
    /// reuse any slot whose programmed config matches).
    pub timer_number: u8,
}

/// I2C port operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum I2cMode {
    /// Bus controller (master).
    Controller,
    /// Bus peripheral (slave).
    Peripheral,
}

type ShareToken = Arc<()>;
type ShareMonitor = Weak<()>;

struct GpioSlot {
    purpose: GpioPurpose,
    monitor: ShareMonitor,
}

struct TimerSlot {
    config: PwmTimerConfig,
    monitor: ShareMonitor,
}

struct I2cSlot {
    mode: I2cMode,
    sda: u32,
    scl: u32,
    monitor: ShareMonitor,
}

/// Process-wide table of nominal hardware resources and their current
/// ownership records. See the module docs for the RAII release model.
pub struct Arbiter {
    gpios: Mutex<HashMap<u32, GpioSlot>>,
    timers: Mutex<[Option<TimerSlot>; PWM_TIMER_SLOTS]>,
    channels: Mutex<[Option<ShareMonitor>; PWM_CHANNEL_SLOTS]>,
    i2c_ports: Mutex<HashMap<u8, I2cSlot>>,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Arbiter {
    /// Creates an arbiter with no resources owned.
    pub fn new() -> Self {
        Arbiter {
            gpios: Mutex::new(HashMap::new()),
            timers: Mutex::new(Default::default()),
            channels: Mutex::new(Default::default()),
            i2c_ports: Mutex::new(HashMap::new()),
        }
    }

    fn gpio_is_free(slot: Option<&GpioSlot>) -> bool {
        match slot {
            None => true,
            Some(s) => s.monitor.upgrade().is_none(),
        }
    }

    /// Acquires `pin` for `purpose`. Returns `None` if the pin is already
    /// held with a different purpose, or held exclusively (`Gpio`) by
    /// anyone.
    pub fn acquire_gpio(&self, pin: u32, purpose: GpioPurpose) -> Option<GpioHandle> {
        let mut gpios = self.gpios.lock().unwrap();
        match gpios.get(&pin) {
            Some(slot) if !Self::gpio_is_free(Some(slot)) => {
                if slot.purpose == GpioPurpose::Bus && purpose == GpioPurpose::Bus {
                    let token = slot.monitor.upgrade()?;
                    Some(GpioHandle {
                        pin,
                        purpose,
                        _token: token,
                    })
                } else {
                    None
                }
            }
            _ => {
                let token: ShareToken = Arc::new(());
                gpios.insert(
                    pin,
                    GpioSlot {
                        purpose,
                        monitor: Arc::downgrade(&token),
                    },
                );
                Some(GpioHandle {
                    pin,
                    purpose,
                    _token: token,
                })
            }
        }
    }

    /// Finds a timer slot already programmed with `cfg` and shares it, or
    /// allocates and programs a free slot. Returns `None` if all slots are
    /// occupied with a different configuration.
    pub fn acquire_timer(&self, cfg: PwmTimerConfig) -> Option<TimerHandle> {
        let mut timers = self.timers.lock().unwrap();

        for (idx, slot) in timers.iter().enumerate() {
            if let Some(s) = slot {
                if let Some(token) = s.monitor.upgrade() {
                    if s.config == cfg {
                        return Some(TimerHandle {
                            slot: idx,
                            _token: token,
                        });
                    }
                }
            }
        }

        for (idx, slot) in timers.iter_mut().enumerate() {
            let free = match slot {
                None => true,
                Some(s) => s.monitor.upgrade().is_none(),
            };
            if free {
                let token: ShareToken = Arc::new(());
                *slot = Some(TimerSlot {
                    config: cfg,
                    monitor: Arc::downgrade(&token),
                });
                return Some(TimerHandle {
                    slot: idx,
                    _token: token,
                });
            }
        }
        None
    }

    /// Returns a handle to any free PWM channel.
    pub fn acquire_channel(&self) -> Option<ChannelHandle> {
        let mut channels = self.channels.lock().unwrap();
        for (idx, slot) in channels.iter_mut().enumerate() {
            let free = match slot {
                None => true,
                Some(monitor) => monitor.upgrade().is_none(),
            };
            if free {
                let token: ShareToken = Arc::new(());
                *slot = Some(Arc::downgrade(&token));
                return Some(ChannelHandle {
                    channel: idx as u8,
                    _token: token,
                });
            }
        }
        None
    }

    /// Returns the existing handle for `port` if live, otherwise acquires
    /// `sda`/`scl` in bus purpose and creates a new port handle.
    pub fn acquire_i2c(
        &self,
        port: u8,
        mode: I2cMode,
        sda: u32,
        scl: u32,
    ) -> Option<I2cHandle> {
        {
            let ports = self.i2c_ports.lock().unwrap();
            if let Some(slot) = ports.get(&port) {
                if let Some(token) = slot.monitor.upgrade() {
                    if slot.mode == mode && slot.sda == sda && slot.scl == scl {
                        return Some(I2cHandle {
                            port,
                            _sda: self.acquire_gpio(sda, GpioPurpose::Bus)?,
                            _scl: self.acquire_gpio(scl, GpioPurpose::Bus)?,
                            _token: token,
                        });
                    }
                    return None;
                }
            }
        }

        let sda_handle = self.acquire_gpio(sda, GpioPurpose::Bus)?;
        let scl_handle = self.acquire_gpio(scl, GpioPurpose::Bus)?;
        let token: ShareToken = Arc::new(());
        let mut ports = self.i2c_ports.lock().unwrap();
        ports.insert(
            port,
            I2cSlot {
                mode,
                sda,
                scl,
                monitor: Arc::downgrade(&token),
            },
        );
        Some(I2cHandle {
            port,
            _sda: sda_handle,
            _scl: scl_handle,
            _token: token,
        })
    }
}

/// Exclusive- or shared-ownership handle to a GPIO pin, per its acquisition
/// purpose. Dropping it releases the share.
pub struct GpioHandle {
    pin: u32,
    purpose: GpioPurpose,
    _token: ShareToken,
}

impl GpioHandle {
    /// The pin number this handle owns.
    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// The purpose this handle was acquired for.
    pub fn purpose(&self) -> GpioPurpose {
        self.purpose
    }
}

/// Shared handle to a programmed PWM timer slot.
pub struct TimerHandle {
    slot: usize,
    _token: ShareToken,
}

impl TimerHandle {
    /// Index of the underlying timer slot.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Exclusive handle to a PWM channel.
pub struct ChannelHandle {
    channel: u8,
    _token: ShareToken,
}

impl ChannelHandle {
    /// The channel number this handle owns.
    pub fn channel(&self) -> u8 {
        self.channel
    }
}

/// Handle to an I2C port, holding its SDA/SCL pins in bus mode for the
/// handle's lifetime.
pub struct I2cHandle {
    port: u8,
    _sda: GpioHandle,
    _scl: GpioHandle,
    _token: ShareToken,
}

impl I2cHandle {
    /// The I2C port number this handle owns.
    pub fn port(&self) -> u8 {
        self.port
    }
}
