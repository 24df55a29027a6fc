//! Compact schedule text parsing (spec §4.6): `HH-MM:name=val,name=val;...`.

use super::{DaySchedule, TimePoint, MAX_CHANNELS, TIME_POINTS_PER_DAY};

/// Parses one day's schedule text, resolving channel names to indices via
/// `channel_index`. Malformed or out-of-range time points are skipped;
/// unknown channel names inside a time point are logged and skipped rather
/// than failing the whole parse. Returns `None` if the text contained no
/// usable time point at all.
pub fn parse_day_schedule(
    text: &str,
    mut channel_index: impl FnMut(&str) -> Option<usize>,
) -> Option<DaySchedule> {
    let mut day = DaySchedule::default();
    let mut any = false;

    for record in text.split(';') {
        let record = record.trim();
        if record.is_empty() {
            continue;
        }
        let Some((time_part, vars_part)) = record.split_once(':') else {
            tracing::warn!(record, "schedule record missing ':'");
            continue;
        };
        let Some((hh, mm)) = time_part.split_once('-') else {
            tracing::warn!(record, "schedule time missing '-'");
            continue;
        };
        let (Ok(hh), Ok(mm)) = (hh.parse::<u32>(), mm.parse::<u32>()) else {
            tracing::warn!(record, "schedule time is not numeric");
            continue;
        };
        if hh > 23 || mm > 59 {
            tracing::warn!(record, "schedule time out of range");
            continue;
        }
        let time_of_day_secs = hh * 3600 + mm * 60;

        let mut values: [Option<f32>; MAX_CHANNELS] = [None; MAX_CHANNELS];
        let mut record_has_data = false;
        for var in vars_part.split(',') {
            let var = var.trim();
            if var.is_empty() {
                continue;
            }
            let Some((name, val)) = var.split_once('=') else {
                tracing::warn!(var, "schedule entry missing '='");
                continue;
            };
            let Ok(val) = val.parse::<f32>() else {
                tracing::warn!(var, "schedule value is not numeric");
                continue;
            };
            match channel_index(name) {
                Some(idx) if idx < MAX_CHANNELS => {
                    values[idx] = Some(val);
                    record_has_data = true;
                }
                _ => tracing::warn!(channel = name, "unknown schedule channel"),
            }
        }

        if record_has_data {
            any = true;
            if day.points.len() < TIME_POINTS_PER_DAY {
                let point = TimePoint {
                    time_of_day_secs,
                    values,
                };
                let insert_at = day
                    .points
                    .iter()
                    .position(|p| p.time_of_day_secs > time_of_day_secs)
                    .unwrap_or(day.points.len());
                day.points.insert(insert_at, point);
            } else {
                tracing::warn!(record, "day schedule is at capacity, dropping time point");
            }
        } else {
            tracing::warn!(record, "time point had no parseable channel data");
        }
    }

    any.then_some(day)
}
