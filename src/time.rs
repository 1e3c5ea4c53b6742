use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static PARTIAL_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").expect("partial date pattern to compile")
});

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A genealogical date that may only be known to the year or month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PartialDate {
    /// Accepts `YYYY`, `YYYY-MM` and `YYYY-MM-DD`; full dates must exist on the calendar.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = PARTIAL_DATE.captures(raw.trim())?;
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let month: Option<u32> = match caps.get(2) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };
        let day: Option<u32> = match caps.get(3) {
            Some(d) => Some(d.as_str().parse().ok()?),
            None => None,
        };
        if let Some(m) = month {
            if !(1..=12).contains(&m) {
                return None;
            }
        }
        if let (Some(m), Some(d)) = (month, day) {
            NaiveDate::from_ymd_opt(year, m, d)?;
        }
        Some(Self { year, month, day })
    }
}

/// Year component of a stored birth/death date, tolerating trailing free text.
pub fn year_of(raw: &str) -> Option<i32> {
    if let Some(date) = PartialDate::parse(raw) {
        return Some(date.year);
    }
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Age at the census, estimated from the birth year only.
pub fn estimate_age(birth_date: Option<&str>, census_year: i64) -> Option<i64> {
    let year = i64::from(year_of(birth_date?)?);
    if year > census_year {
        None
    } else {
        Some(census_year - year)
    }
}
