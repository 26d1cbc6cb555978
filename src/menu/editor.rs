//! Field editors for octets, the calendar date and the clock time.
//!
//! All adjustments wrap within the field's range. An adjustment that would
//! produce an impossible date (Feb 30, Feb 29 of a common year) is skipped.

use super::{
    screen::{EditorKind, OctetField},
    state::NavigatorState,
};
use crate::types::{Octets, StaticNetwork};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use log::debug;

/// Step of a hold or hold repeat
pub const FAST_STEP: i32 = 10;

pub fn field_count(kind: EditorKind, format_24h: bool) -> usize {
    match kind {
        EditorKind::Octets(_) => 4,
        EditorKind::Date => 3,
        EditorKind::Time if format_24h => 3,
        EditorKind::Time => 4,
    }
}

pub fn wrap_octet(value: u8, step: i32) -> u8 {
    (i32::from(value) + step).rem_euclid(256) as u8
}

fn wrap(value: u32, step: i32, modulus: u32) -> u32 {
    (i64::from(value) + i64::from(step)).rem_euclid(i64::from(modulus)) as u32
}

fn octets_mut(network: &mut StaticNetwork, field: OctetField) -> &mut Octets {
    match field {
        OctetField::Ip => &mut network.ip,
        OctetField::SubnetMask => &mut network.subnet_mask,
        OctetField::Gateway => &mut network.gateway,
    }
}

pub fn octets(network: &StaticNetwork, field: OctetField) -> &Octets {
    match field {
        OctetField::Ip => &network.ip,
        OctetField::SubnetMask => &network.subnet_mask,
        OctetField::Gateway => &network.gateway,
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(28, |d| d.day())
}

/// Date fields: 0 month, 1 day, 2 year
pub fn adjust_date(dt: NaiveDateTime, field: usize, step: i32) -> Option<NaiveDateTime> {
    match field {
        0 => dt.with_month(wrap(dt.month0(), step, 12) + 1),
        1 => dt.with_day(wrap(dt.day0(), step, days_in_month(dt.year(), dt.month())) + 1),
        2 => dt.with_year(dt.year().checked_add(step)?),
        _ => None,
    }
}

/// Time fields: 1 hour, 2 minute, 3 AM/PM; field 0 (format) is not a time value
pub fn adjust_time(dt: NaiveDateTime, format_24h: bool, field: usize, step: i32) -> Option<NaiveDateTime> {
    match field {
        1 if format_24h => dt.with_hour(wrap(dt.hour(), step, 24)),
        1 => {
            let afternoon = if dt.hour() >= 12 { 12 } else { 0 };
            dt.with_hour(wrap(dt.hour() % 12, step, 12) + afternoon)
        }
        2 => dt.with_minute(wrap(dt.minute(), step, 60)),
        3 if !format_24h => dt.with_hour((dt.hour() + 12) % 24),
        _ => None,
    }
}

/// Adjust the field under the cursor by `step`
pub fn adjust(state: &mut NavigatorState, kind: EditorKind, step: i32) {
    let cursor = state.edit_cursor;

    match kind {
        EditorKind::Octets(field) => {
            let octets = octets_mut(&mut state.draft_network, field);
            if let Some(value) = octets.get_mut(cursor) {
                *value = wrap_octet(*value, step);
            }
        }
        EditorKind::Date => match adjust_date(state.draft_datetime, cursor, step) {
            Some(dt) => state.draft_datetime = dt,
            None => debug!("skip invalid date adjustment of field {cursor}"),
        },
        EditorKind::Time if cursor == 0 => {
            state.draft_time_format_24h = !state.draft_time_format_24h;
            state.edit_cursor = cursor.min(field_count(kind, state.draft_time_format_24h) - 1);
        }
        EditorKind::Time => {
            match adjust_time(state.draft_datetime, state.draft_time_format_24h, cursor, step) {
                Some(dt) => state.draft_datetime = dt,
                None => debug!("skip invalid time adjustment of field {cursor}"),
            }
        }
    }
}

/// Move the cursor by `delta` fields, wrapping at both ends
pub fn move_cursor(state: &mut NavigatorState, kind: EditorKind, delta: i32) {
    let count = field_count(kind, state.draft_time_format_24h) as i64;
    state.edit_cursor = (state.edit_cursor as i64 + i64::from(delta)).rem_euclid(count) as usize;
}
