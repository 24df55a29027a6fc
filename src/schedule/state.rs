//! Per-instance schedule state persistence (spec §4.6, §4.9): loads/saves
//! through the persistence protocol using paths derived from a creation id.

use std::path::Path;

use persistence::{load_file_into, safe_write};

use super::MAX_CHANNELS;

/// Per-channel seconds-since-week-beginning at which the channel last fired
/// (Action mode only). Defaults to all-zero when no state file exists yet.
#[derive(Clone, Copy, Default)]
pub struct ScheduleState {
    /// `channel_last_fired_secs[i]` is 0 until channel `i` has fired once.
    pub channel_last_fired_secs: [u32; MAX_CHANNELS],
}

const STATE_LEN: usize = MAX_CHANNELS * 4;

impl ScheduleState {
    fn to_bytes(self) -> [u8; STATE_LEN] {
        let mut out = [0u8; STATE_LEN];
        for (i, v) in self.channel_last_fired_secs.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<ScheduleState> {
        if bytes.len() != STATE_LEN {
            return None;
        }
        let mut state = ScheduleState::default();
        for i in 0..MAX_CHANNELS {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            state.channel_last_fired_secs[i] = u32::from_le_bytes(word);
        }
        Some(state)
    }

    /// Path for a schedule instance's state file: `<creation_id>.state`.
    pub fn path_for(mount_point: &Path, creation_id: u32) -> std::path::PathBuf {
        mount_point.join(format!("{creation_id}.state"))
    }

    /// Loads state from `path`, defaulting to all-zero if the file is
    /// missing or unreadable (spec §4.6 "State storage").
    pub fn load(path: &Path) -> ScheduleState {
        let mut buf = [0u8; STATE_LEN];
        match load_file_into(path, &mut buf) {
            Ok(n) => ScheduleState::from_bytes(&buf[..n]).unwrap_or_default(),
            Err(_) => ScheduleState::default(),
        }
    }

    /// Persists this state atomically via the write-temp/rename protocol.
    pub fn save(&self, path: &Path) -> Result<(), persistence::PersistError> {
        safe_write(path, ".tmp", &self.to_bytes())
    }
}
