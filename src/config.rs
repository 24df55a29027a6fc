//! Device configuration: a driver name paired with an opaque, fixed-size
//! byte buffer (spec §3). The buffer is the canonical persisted form; each
//! driver owns its own typed view over it.

/// Maximum length, in bytes, of a driver name.
pub const MAX_NAME_LEN: usize = 32;
/// Maximum length, in bytes, of a device's config name.
pub const MAX_DEVICE_NAME_LEN: usize = 32;
/// Size, in bytes, of a [`DeviceConfig`]'s opaque buffer.
pub const CONFIG_BUF_LEN: usize = 128;

/// A driver name plus its opaque, trivially-copyable configuration bytes.
/// This is the type persisted to `devices.bin`; drivers parse/write their
/// own section of `buf` and leave the rest untouched.
#[derive(Clone, Copy)]
pub struct DeviceConfig {
    driver_name: [u8; MAX_NAME_LEN],
    driver_name_len: u8,
    /// Opaque, driver-defined configuration bytes.
    pub buf: [u8; CONFIG_BUF_LEN],
}

impl DeviceConfig {
    /// An empty config: no driver name, zeroed buffer — the state of an
    /// uninitialized slot.
    pub const EMPTY: DeviceConfig = DeviceConfig {
        driver_name: [0; MAX_NAME_LEN],
        driver_name_len: 0,
        buf: [0; CONFIG_BUF_LEN],
    };

    /// Builds a config for `driver_name` with `buf` as its opaque payload.
    /// Returns `None` if `driver_name` exceeds [`MAX_NAME_LEN`].
    pub fn new(driver_name: &str, buf: [u8; CONFIG_BUF_LEN]) -> Option<DeviceConfig> {
        let bytes = driver_name.as_bytes();
        if bytes.len() > MAX_NAME_LEN {
            return None;
        }
        let mut name = [0u8; MAX_NAME_LEN];
        name[..bytes.len()].copy_from_slice(bytes);
        Some(DeviceConfig {
            driver_name: name,
            driver_name_len: bytes.len() as u8,
            buf,
        })
    }

    /// The driver-name portion of this config.
    pub fn driver_name(&self) -> &str {
        std::str::from_utf8(&self.driver_name[..self.driver_name_len as usize])
            .unwrap_or_default()
    }

    /// `true` for the zeroed, nameless config an uninitialized slot holds.
    pub fn is_empty(&self) -> bool {
        self.driver_name_len == 0
    }

    /// Total size, in bytes, of [`Self::to_raw`]'s output.
    pub const RAW_LEN: usize = MAX_NAME_LEN + 1 + CONFIG_BUF_LEN;

    /// Flattens this config to its on-disk byte form: driver name bytes,
    /// its length, then the opaque buffer. This is the record the event
    /// store persists per slot, independent of the device's own `buf`
    /// encoding.
    pub fn to_raw(&self) -> [u8; Self::RAW_LEN] {
        let mut out = [0u8; Self::RAW_LEN];
        out[..MAX_NAME_LEN].copy_from_slice(&self.driver_name);
        out[MAX_NAME_LEN] = self.driver_name_len;
        out[MAX_NAME_LEN + 1..].copy_from_slice(&self.buf);
        out
    }

    /// Inverse of [`Self::to_raw`].
    pub fn from_raw(raw: &[u8]) -> Option<DeviceConfig> {
        if raw.len() != Self::RAW_LEN {
            return None;
        }
        let mut driver_name = [0u8; MAX_NAME_LEN];
        driver_name.copy_from_slice(&raw[..MAX_NAME_LEN]);
        let driver_name_len = raw[MAX_NAME_LEN];
        if driver_name_len as usize > MAX_NAME_LEN {
            return None;
        }
        let mut buf = [0u8; CONFIG_BUF_LEN];
        buf.copy_from_slice(&raw[MAX_NAME_LEN + 1..]);
        Some(DeviceConfig {
            driver_name,
            driver_name_len,
            buf,
        })
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::EMPTY
    }
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("driver_name", &self.driver_name())
            .field("buf_len", &self.buf.len())
            .finish()
    }
}
