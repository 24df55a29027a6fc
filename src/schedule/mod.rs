//! Week schedule driver (spec §4.6): interpolation and action modes over a
//! per-weekday sequence of time points, with per-channel last-fired state.

mod parse;
mod state;

pub use state::ScheduleState;

use crate::value::Unit;

/// Number of channels a schedule instance can drive.
pub const MAX_CHANNELS: usize = 4;
/// Maximum time points stored per weekday.
pub const TIME_POINTS_PER_DAY: usize = 12;
/// Maximum length of a channel's human-readable name.
pub const MAX_CHANNEL_NAME_LEN: usize = 8;

/// Schedule driving mode (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Linearly interpolates between the surrounding time points every tick.
    Interpolate,
    /// Fires each time point at most once, gated by last-fired state.
    Action,
    /// Like `Action`, but re-asserts the current value every tick (no gate).
    ActionHold,
}

/// A single schedule channel: a symbolic name bound to a target device and
/// the unit its values are emitted as.
#[derive(Clone)]
pub struct Channel {
    /// Channel name as it appears in schedule text (`r`, `c`, ...).
    pub name: heapless::String<MAX_CHANNEL_NAME_LEN>,
    /// Registry slot index this channel writes to.
    pub device_index: usize,
    /// Unit the channel's numeric value is wrapped in before writing.
    pub unit: Unit,
}

/// One `(time_of_day, per-channel values)` entry.
#[derive(Clone, Copy)]
pub struct TimePoint {
    /// Seconds since midnight, local time.
    pub time_of_day_secs: u32,
    /// Per-channel value, `None` when this time point doesn't set that
    /// channel.
    pub values: [Option<f32>; MAX_CHANNELS],
}

/// A weekday's ordered sequence of time points, sorted by time of day.
#[derive(Clone, Default)]
pub struct DaySchedule {
    /// Time points, kept sorted ascending by `time_of_day_secs`.
    pub points: Vec<TimePoint>,
}

/// The full week: index 0 = Monday ... 6 = Sunday.
#[derive(Clone, Default)]
pub struct WeekSchedule {
    /// Per-weekday schedule.
    pub days: [DaySchedule; 7],
}

impl WeekSchedule {
    /// Applies `text` as the `repeating` schedule: every day gets the same
    /// parsed day schedule (spec §4.6 "Parsing" — `repeating` key).
    pub fn set_repeating(&mut self, text: &str, channel_index: impl Fn(&str) -> Option<usize>) {
        if let Some(day) = parse::parse_day_schedule(text, |n| channel_index(n)) {
            for d in &mut self.days {
                *d = day.clone();
            }
        }
    }

    /// Applies `text` to a single weekday (`mon..sun` keys).
    pub fn set_day(
        &mut self,
        weekday: usize,
        text: &str,
        channel_index: impl Fn(&str) -> Option<usize>,
    ) {
        if weekday >= 7 {
            return;
        }
        if let Some(day) = parse::parse_day_schedule(text, |n| channel_index(n)) {
            self.days[weekday] = day;
        }
    }
}

/// A point in the week, used both to evaluate the schedule and to key
/// persisted last-fired state.
#[derive(Clone, Copy)]
pub struct WeekClock {
    /// 0 = Monday ... 6 = Sunday.
    pub weekday: u8,
    /// Seconds since local midnight.
    pub time_of_day_secs: u32,
}

impl WeekClock {
    /// Seconds since the start of the week (Monday 00:00).
    pub fn since_week_begin_secs(&self) -> u32 {
        self.weekday as u32 * 86_400 + self.time_of_day_secs
    }
}

/// A downstream write a schedule tick wants issued, e.g. through
/// `Registry::write_to_device`.
pub struct ScheduleWrite {
    /// Target device slot.
    pub device_index: usize,
    /// Value to write, already tagged with the channel's unit.
    pub value: crate::value::DeviceValue,
}

/// The schedule driver (spec §4.6): channels, the parsed week, live state,
/// and the persistence identity (`creation_id`) used to name its files.
pub struct Schedule {
    /// Up to [`MAX_CHANNELS`] channels; `None` for unbound slots.
    pub channels: [Option<Channel>; MAX_CHANNELS],
    /// Interpolate / Action / ActionHold.
    pub kind: ScheduleKind,
    /// Identifier used to derive `<creation_id>.json` / `.state` paths.
    pub creation_id: u32,
    /// The parsed week of time points.
    pub week: WeekSchedule,
    /// Per-channel last-fired state (Action mode).
    pub state: ScheduleState,
}

impl Schedule {
    /// Index of the channel named `name`, if bound.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels
            .iter()
            .position(|c| c.as_ref().is_some_and(|c| c.name.as_str() == name))
    }

    /// Clamps an interpolated/held value to the sane range for `unit`. Spec
    /// §9's open question on end-of-day interpolation asks implementations
    /// to clamp rather than let a near-zero time delta blow the value up;
    /// this is that clamp, applied to every unit the schedule can target.
    fn clamp_for_unit(unit: Unit, value: f32) -> f32 {
        match unit {
            Unit::Percentage => value.clamp(0.0, 100.0),
            Unit::Pwm | Unit::Analog | Unit::UnsignedIntegral | Unit::Seconds => {
                value.clamp(0.0, u16::MAX as f32)
            }
            _ => value,
        }
    }

    fn day_for(&self, weekday: u8) -> &DaySchedule {
        &self.week.days[weekday as usize % 7]
    }

    /// Finds the latest time point at-or-before `clock.time_of_day_secs` in
    /// today's schedule that sets `channel`, per [`ScheduleKind::Interpolate`]
    /// (same-day only — see `DESIGN.md` for why this doesn't cross midnight).
    fn find_current_today(&self, channel: usize, clock: WeekClock) -> Option<TimePoint> {
        self.day_for(clock.weekday)
            .points
            .iter()
            .rev()
            .find(|p| p.time_of_day_secs <= clock.time_of_day_secs && p.values[channel].is_some())
            .copied()
    }

    /// Finds the earliest time point strictly after `clock.time_of_day_secs`
    /// in today's schedule that sets `channel`.
    fn find_next_today(&self, channel: usize, clock: WeekClock) -> Option<TimePoint> {
        self.day_for(clock.weekday)
            .points
            .iter()
            .find(|p| p.time_of_day_secs > clock.time_of_day_secs && p.values[channel].is_some())
            .copied()
    }

    /// Finds the most recent time point at-or-before `clock`, searching
    /// backward across the week (spec §4.6 Action mode's "all-days search").
    /// Returns the point's value and its seconds-since-week-beginning.
    fn find_current_all_days(&self, channel: usize, clock: WeekClock) -> Option<(u32, f32)> {
        if let Some(p) = self.find_current_today(channel, clock) {
            let since = clock.weekday as u32 * 86_400 + p.time_of_day_secs;
            return Some((since, p.values[channel].unwrap()));
        }
        for back in 1..7u8 {
            let weekday = (clock.weekday + 7 - back) % 7;
            if let Some(p) = self
                .day_for(weekday)
                .points
                .iter()
                .rev()
                .find(|p| p.values[channel].is_some())
            {
                // A point found more than one week back in time is already
                // overdue; 1 keeps it strictly after the zeroed initial
                // last-fired value so it still fires once.
                let since = if back as u32 <= clock.weekday as u32 {
                    weekday as u32 * 86_400 + p.time_of_day_secs
                } else {
                    1
                };
                return Some((since, p.values[channel].unwrap()));
            }
        }
        None
    }

    /// Evaluates every bound channel for the current tick and returns the
    /// downstream writes to issue. Also updates `self.state` for
    /// [`ScheduleKind::Action`] — callers must persist it via
    /// [`ScheduleState::save`] after a non-empty return.
    pub fn tick(&mut self, clock: WeekClock) -> Vec<ScheduleWrite> {
        match self.kind {
            ScheduleKind::Interpolate => self.tick_interpolate(clock),
            ScheduleKind::Action => self.tick_action(clock),
            ScheduleKind::ActionHold => self.tick_action_hold(clock),
        }
    }

    fn tick_interpolate(&self, clock: WeekClock) -> Vec<ScheduleWrite> {
        let mut writes = Vec::new();
        for (i, channel) in self.channels.iter().enumerate() {
            let Some(channel) = channel else { continue };
            let Some(current) = self.find_current_today(i, clock) else {
                continue;
            };
            let current_value = current.values[i].unwrap();

            let value = match self.find_next_today(i, clock) {
                Some(next) => {
                    let next_value = next.values[i].unwrap();
                    let mut dt = next.time_of_day_secs as i64 - current.time_of_day_secs as i64;
                    if dt.unsigned_abs() < 1 {
                        dt = 1;
                    }
                    let elapsed =
                        clock.time_of_day_secs as i64 - current.time_of_day_secs as i64;
                    let factor = (elapsed as f32 / dt as f32).abs();
                    current_value + (next_value - current_value) * factor
                }
                None => current_value,
            };

            writes.push(ScheduleWrite {
                device_index: channel.device_index,
                value: crate::value::DeviceValue::from_unit_f32(
                    channel.unit,
                    Schedule::clamp_for_unit(channel.unit, value),
                )
                .unwrap_or(crate::value::DeviceValue::None),
            });
        }
        writes
    }

    fn tick_action(&mut self, clock: WeekClock) -> Vec<ScheduleWrite> {
        let since_week_begin = clock.since_week_begin_secs();
        let mut writes = Vec::new();

        for i in 0..MAX_CHANNELS {
            let Some(channel) = self.channels[i].clone() else { continue };

            let last_fired = self.state.channel_last_fired_secs[i];
            if last_fired > since_week_begin {
                // Stale state from a previous week; reset so a point that
                // already passed this week is free to fire again.
                self.state.channel_last_fired_secs[i] = 0;
            }
            let last_fired = self.state.channel_last_fired_secs[i];

            let Some((current_since, value)) = self.find_current_all_days(i, clock) else {
                continue;
            };
            if last_fired >= current_since {
                continue;
            }

            self.state.channel_last_fired_secs[i] = current_since;
            writes.push(ScheduleWrite {
                device_index: channel.device_index,
                value: crate::value::DeviceValue::from_unit_f32(
                    channel.unit,
                    Schedule::clamp_for_unit(channel.unit, value),
                )
                .unwrap_or(crate::value::DeviceValue::None),
            });
        }
        writes
    }

    fn tick_action_hold(&self, clock: WeekClock) -> Vec<ScheduleWrite> {
        let mut writes = Vec::new();
        for (i, channel) in self.channels.iter().enumerate() {
            let Some(channel) = channel else { continue };
            let Some((_, value)) = self.find_current_all_days(i, clock) else {
                continue;
            };
            writes.push(ScheduleWrite {
                device_index: channel.device_index,
                value: crate::value::DeviceValue::from_unit_f32(
                    channel.unit,
                    Schedule::clamp_for_unit(channel.unit, value),
                )
                .unwrap_or(crate::value::DeviceValue::None),
            });
        }
        writes
    }
}
