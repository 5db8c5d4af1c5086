use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};

use super::button::{ButtonPress, SimpleButton};
use super::tab::TabState;
use super::text::TextData;

/// Name shared by every picker button, for `Keyboard::remove_buttons`.
pub const DATE_TIME_BUTTON: &str = "date_time_button";
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATE_TIME_FIELD: &str = "date_time";
const SHOW_DATE: &str = "dt_show_date";
const SHOW_TIME: &str = "dt_show_time";

/// A step of the picker. Years and months are fixed spans, not calendar units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeUnit {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DateTimeUnit {
    const DATE: [DateTimeUnit; 3] = [DateTimeUnit::Year, DateTimeUnit::Month, DateTimeUnit::Day];
    const TIME: [DateTimeUnit; 3] = [
        DateTimeUnit::Hour,
        DateTimeUnit::Minute,
        DateTimeUnit::Second,
    ];

    fn seconds(self) -> i64 {
        match self {
            DateTimeUnit::Year => 365 * 86_400,
            DateTimeUnit::Month => 30 * 86_400,
            DateTimeUnit::Day => 86_400,
            DateTimeUnit::Hour => 3_600,
            DateTimeUnit::Minute => 60,
            DateTimeUnit::Second => 1,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DateTimeUnit::Year => "y",
            DateTimeUnit::Month => "mo",
            DateTimeUnit::Day => "d",
            DateTimeUnit::Hour => "h",
            DateTimeUnit::Minute => "min",
            DateTimeUnit::Second => "s",
        }
    }

    fn callback(self) -> &'static str {
        match self {
            DateTimeUnit::Year => "dt_year",
            DateTimeUnit::Month => "dt_month",
            DateTimeUnit::Day => "dt_day",
            DateTimeUnit::Hour => "dt_hour",
            DateTimeUnit::Minute => "dt_minute",
            DateTimeUnit::Second => "dt_second",
        }
    }

    fn from_callback(callback: &str) -> Option<DateTimeUnit> {
        DateTimeUnit::DATE
            .into_iter()
            .chain(DateTimeUnit::TIME)
            .find(|unit| unit.callback() == callback)
    }
}

/// Moves `value` by `steps` units.
pub fn shift(value: DateTime<Utc>, unit: DateTimeUnit, steps: i64) -> Result<DateTime<Utc>> {
    let seconds = unit
        .seconds()
        .checked_mul(steps)
        .ok_or_else(|| anyhow!("date shift of {} {:?} overflows", steps, unit))?;
    value
        .checked_add_signed(Duration::seconds(seconds))
        .ok_or_else(|| anyhow!("date shift of {} {:?} is out of range", steps, unit))
}

/// Value held by the picker, or now when nothing was picked yet.
pub fn date_time(tab: &TabState) -> Result<DateTime<Utc>> {
    Ok(tab.field(DATE_TIME_FIELD)?.unwrap_or_else(Utc::now))
}

pub fn set_date_time(tab: &mut TabState, value: DateTime<Utc>) -> Result<()> {
    tab.set_field(DATE_TIME_FIELD, value)
}

/// `{date_time}` for the tab text.
pub fn text_data(tab: &TabState) -> Result<TextData> {
    let mut data = TextData::new();
    data.insert(
        DATE_TIME_FIELD.to_string(),
        date_time(tab)?.format(DATE_TIME_FORMAT).to_string(),
    );
    Ok(data)
}

fn show_units(tab: &mut TabState, units: [DateTimeUnit; 3], switch: (&str, &str)) {
    tab.keyboard.remove_buttons(DATE_TIME_BUTTON);
    for (index, unit) in units.into_iter().enumerate() {
        let button = |sign: &str, steps: i64| {
            SimpleButton::new(format!("{}{}", sign, unit.label()), unit.callback(), steps)
                .named(DATE_TIME_BUTTON)
        };
        tab.keyboard.insert_row(index, [button("-", -1), button("+", 1)]);
    }
    let (label, callback) = switch;
    tab.keyboard.insert_row(
        units.len(),
        [SimpleButton::new(label, callback, "").named(DATE_TIME_BUTTON)],
    );
}

/// Puts year, month and day steppers above the tab's own buttons.
pub fn show_date_buttons(tab: &mut TabState) {
    show_units(tab, DateTimeUnit::DATE, ("Pick time", SHOW_TIME));
}

/// Puts hour, minute and second steppers above the tab's own buttons.
pub fn show_time_buttons(tab: &mut TabState) {
    show_units(tab, DateTimeUnit::TIME, ("Pick date", SHOW_DATE));
}

/// Handles a picker button. Returns false for any other press.
pub fn on_date_time_press(tab: &mut TabState, press: &ButtonPress) -> Result<bool> {
    match press.callback.as_str() {
        SHOW_DATE => show_date_buttons(tab),
        SHOW_TIME => show_time_buttons(tab),
        callback => {
            let Some(unit) = DateTimeUnit::from_callback(callback) else {
                return Ok(false);
            };
            let steps: i64 = press.arg.parse()?;
            let value = shift(date_time(tab)?, unit, steps)?;
            set_date_time(tab, value)?;
        }
    }
    Ok(true)
}
