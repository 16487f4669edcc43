// src/scheduling.rs
//
// Clock arithmetic for booking: service durations, clinic hours, doctor
// working blocks and slot conflicts. Times are handled as minutes since
// midnight so nothing wraps past 24:00.

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

pub const SLOT_STEP_MIN: i32 = 30;
pub const DEFAULT_DURATION_MIN: i32 = 30;
/// Longest chair time a service may declare: one full day.
pub const MAX_DURATION_MIN: i32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum DayOfWeek {
    Monday = 0,
    Tuesday = 1,
    Wednesday = 2,
    Thursday = 3,
    Friday = 4,
    Saturday = 5,
    Sunday = 6,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn of(date: NaiveDate) -> Self {
        Self::ALL[date.weekday().num_days_from_monday() as usize]
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(raw))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayOfWeek::Monday => "Monday",
            DayOfWeek::Tuesday => "Tuesday",
            DayOfWeek::Wednesday => "Wednesday",
            DayOfWeek::Thursday => "Thursday",
            DayOfWeek::Friday => "Friday",
            DayOfWeek::Saturday => "Saturday",
            DayOfWeek::Sunday => "Sunday",
        }
    }
}

pub fn minutes_of(t: NaiveTime) -> i32 {
    (t.hour() * 60 + t.minute()) as i32
}

pub fn time_of(minutes: i32) -> Option<NaiveTime> {
    if !(0..24 * 60).contains(&minutes) {
        return None;
    }
    NaiveTime::from_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0)
}

/* ============================================================
   Service durations
   ============================================================ */

static DURATION_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|minutes?|mins?|m)\b")
        .expect("duration pattern compiles")
});

static CLOCK_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{1,2})$").expect("clock pattern compiles")
});

/// Parses free-form durations such as `"45"`, `"1:30"`, `"1 hour 30 minutes"` or `"2h"`.
pub fn parse_duration_text(raw: &str) -> Option<i32> {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    if let Some(c) = CLOCK_FORMAT.captures(&text) {
        let h: i32 = c[1].parse().ok()?;
        let m: i32 = c[2].parse().ok()?;
        return within_duration_bounds((h * 60 + m) as f64);
    }

    let mut total = 0.0_f64;
    for c in DURATION_PART.captures_iter(&text) {
        let Ok(value) = c[1].parse::<f64>() else { continue };
        if c[2].starts_with('h') {
            total += value * 60.0;
        } else {
            total += value;
        }
    }
    if total > 0.0 {
        return within_duration_bounds(total);
    }

    text.parse::<f64>().ok().and_then(within_duration_bounds)
}

fn within_duration_bounds(minutes: f64) -> Option<i32> {
    let rounded = minutes.round();
    (1.0..=MAX_DURATION_MIN as f64)
        .contains(&rounded)
        .then_some(rounded as i32)
}

/// Rough chair time for a service when the catalog carries no explicit duration.
pub fn estimate_duration_from_name(name: &str) -> i32 {
    let n = name.to_lowercase();
    let has = |s: &str| n.contains(s);

    if has("braces installation") {
        60
    } else if has("adjustment") && has("cleaning") {
        30
    } else if has("adjustment") {
        15
    } else if has("cleaning") {
        30
    } else if has("odontect") || has("oral surgery") || has("wisdom tooth") {
        120
    } else if has("root canal") || has("veneer") {
        90
    } else if has("crown") || has("jacket") {
        45
    } else if has("whitening") || has("denture") || has("braces") {
        60
    } else if has("x-ray") || has("xray") {
        15
    } else {
        DEFAULT_DURATION_MIN
    }
}

pub fn service_duration(duration_min: Option<i32>, name: &str) -> i32 {
    match duration_min {
        Some(d) if d > 0 => d,
        _ => estimate_duration_from_name(name),
    }
}

/* ============================================================
   Clinic hours
   ============================================================ */

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClinicDay {
    pub day_of_week: DayOfWeek,
    pub is_open: bool,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub break_start_time: Option<NaiveTime>,
    pub break_end_time: Option<NaiveTime>,
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl ClinicDay {
    /// Mon-Sat 09:00-18:00 with a 12:00-13:00 break, Sunday closed.
    pub fn default_for(day: DayOfWeek) -> Self {
        ClinicDay {
            day_of_week: day,
            is_open: day != DayOfWeek::Sunday,
            start_time: hm(9, 0),
            end_time: hm(18, 0),
            break_start_time: Some(hm(12, 0)),
            break_end_time: Some(hm(13, 0)),
        }
    }

    pub fn break_window(&self) -> Option<(i32, i32)> {
        match (self.break_start_time, self.break_end_time) {
            (Some(s), Some(e)) => Some((minutes_of(s), minutes_of(e))),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.end_time <= self.start_time {
            return Err(ApiError::validation("end_time must be after start_time"));
        }
        match (self.break_start_time, self.break_end_time) {
            (None, None) => Ok(()),
            (Some(bs), Some(be)) => {
                if be <= bs {
                    return Err(ApiError::validation("break_end_time must be after break_start_time"));
                }
                if bs < self.start_time || be > self.end_time {
                    return Err(ApiError::validation("break must fall within opening hours"));
                }
                Ok(())
            }
            _ => Err(ApiError::validation(
                "break_start_time and break_end_time must be set together",
            )),
        }
    }
}

/// Fills missing weekdays with defaults and returns Monday..Sunday.
pub fn full_week(stored: Vec<ClinicDay>) -> Vec<ClinicDay> {
    DayOfWeek::ALL
        .into_iter()
        .map(|day| {
            stored
                .iter()
                .find(|d| d.day_of_week == day)
                .cloned()
                .unwrap_or_else(|| ClinicDay::default_for(day))
        })
        .collect()
}

/// Inclusive at both ends: a slot ending exactly when the break starts, or
/// starting exactly when it ends, still counts as touching it.
pub fn overlaps_break(slot_start: i32, slot_end: i32, brk: Option<(i32, i32)>) -> bool {
    match brk {
        Some((bs, be)) => slot_start <= be && slot_end >= bs,
        None => false,
    }
}

/* ============================================================
   Doctor blocks and conflicts
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBlock {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeBlock {
    pub fn overlaps(&self, other: &TimeBlock) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn contains(&self, start: i32, end: i32) -> bool {
        minutes_of(self.start) <= start && end <= minutes_of(self.end)
    }
}

/// An existing booking occupying a doctor.
#[derive(Debug, Clone, Copy)]
pub struct Busy {
    pub start: NaiveTime,
    pub duration_min: i32,
}

impl Busy {
    pub fn overlaps(&self, start: i32, end: i32) -> bool {
        let b_start = minutes_of(self.start);
        let b_end = b_start.saturating_add(self.duration_min);
        start < b_end && end > b_start
    }
}

/// Everything known about one doctor on one date.
#[derive(Debug, Clone)]
pub struct DoctorDay {
    pub doctor_id: Uuid,
    /// `None` when the doctor has no schedule rows at all; such doctors work clinic hours.
    pub blocks: Option<Vec<TimeBlock>>,
    pub busy: Vec<Busy>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("the clinic is closed on {0}")]
    ClinicClosed(&'static str),
    #[error("the appointment must fall within clinic hours")]
    OutsideClinicHours,
    #[error("the selected time overlaps the clinic break")]
    DuringBreak,
    #[error("the doctor is not working at the selected time")]
    OutsideDoctorHours,
    #[error("this time slot conflicts with an existing appointment")]
    SlotTaken,
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        let msg = e.to_string();
        match e {
            BookingError::ClinicClosed(_) => ApiError::BadRequest("CLINIC_CLOSED", msg),
            BookingError::OutsideClinicHours => ApiError::BadRequest("OUTSIDE_CLINIC_HOURS", msg),
            BookingError::DuringBreak => ApiError::BadRequest("DURING_BREAK", msg),
            BookingError::OutsideDoctorHours => ApiError::BadRequest("DOCTOR_UNAVAILABLE", msg),
            BookingError::SlotTaken => ApiError::Conflict("SLOT_TAKEN", msg),
        }
    }
}

pub fn check_slot(
    clinic: &ClinicDay,
    doctor: &DoctorDay,
    start: NaiveTime,
    duration_min: i32,
) -> Result<(), BookingError> {
    if !clinic.is_open {
        return Err(BookingError::ClinicClosed(clinic.day_of_week.as_str()));
    }
    let s = minutes_of(start);
    let e = s.saturating_add(duration_min.max(1));
    if s < minutes_of(clinic.start_time) || e > minutes_of(clinic.end_time) {
        return Err(BookingError::OutsideClinicHours);
    }
    if overlaps_break(s, e, clinic.break_window()) {
        return Err(BookingError::DuringBreak);
    }
    if let Some(blocks) = &doctor.blocks {
        if !blocks.iter().any(|b| b.contains(s, e)) {
            return Err(BookingError::OutsideDoctorHours);
        }
    }
    if doctor.busy.iter().any(|b| b.overlaps(s, e)) {
        return Err(BookingError::SlotTaken);
    }
    Ok(())
}

/// Slot starts every `step` minutes from `start` while before `end`.
pub fn generate_time_slots(start: NaiveTime, end: NaiveTime, step: i32) -> Vec<NaiveTime> {
    let step = step.max(1);
    let end = minutes_of(end);
    (minutes_of(start)..end)
        .step_by(step as usize)
        .filter_map(time_of)
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlotView {
    pub time: NaiveTime,
    pub available: bool,
    /// First doctor free for the whole service at this time.
    pub doctor_id: Option<Uuid>,
}

/// Bookable slots for a date. Slots that overrun closing time or touch the
/// break are left out; the rest carry the first free doctor, if any.
pub fn day_slots(clinic: &ClinicDay, doctors: &[DoctorDay], duration_min: i32) -> Vec<SlotView> {
    if !clinic.is_open {
        return Vec::new();
    }
    let close = minutes_of(clinic.end_time);
    generate_time_slots(clinic.start_time, clinic.end_time, SLOT_STEP_MIN)
        .into_iter()
        .filter(|t| {
            let s = minutes_of(*t);
            let e = s.saturating_add(duration_min);
            e <= close && !overlaps_break(s, e, clinic.break_window())
        })
        .map(|time| {
            let doctor_id = doctors
                .iter()
                .find(|d| check_slot(clinic, d, time, duration_min).is_ok())
                .map(|d| d.doctor_id);
            SlotView {
                time,
                available: doctor_id.is_some(),
                doctor_id,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn free_doctor() -> DoctorDay {
        DoctorDay { doctor_id: Uuid::new_v4(), blocks: None, busy: vec![] }
    }

    #[test]
    fn test_day_of_week() {
        // 2025-01-06 is a Monday
        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert_eq!(DayOfWeek::of(monday), DayOfWeek::Monday);
        assert_eq!(DayOfWeek::of(monday + chrono::Duration::days(6)), DayOfWeek::Sunday);
        assert_eq!(DayOfWeek::parse("friday"), Some(DayOfWeek::Friday));
        assert_eq!(DayOfWeek::parse("Funday"), None);
        assert_eq!(serde_json::to_string(&DayOfWeek::Tuesday).unwrap(), "\"Tuesday\"");
    }

    #[test]
    fn test_parse_duration_text() {
        assert_eq!(parse_duration_text("45"), Some(45));
        assert_eq!(parse_duration_text("1:30"), Some(90));
        assert_eq!(parse_duration_text("1 hour 30 minutes"), Some(90));
        assert_eq!(parse_duration_text("2h"), Some(120));
        assert_eq!(parse_duration_text("1.5 hours"), Some(90));
        assert_eq!(parse_duration_text(""), None);
        assert_eq!(parse_duration_text("soon"), None);
    }

    #[test]
    fn test_parse_duration_text_bounds() {
        assert_eq!(parse_duration_text("24 hours"), Some(MAX_DURATION_MIN));
        assert_eq!(parse_duration_text("1441"), None);
        assert_eq!(parse_duration_text("99999999999 hours"), None);
        assert_eq!(parse_duration_text("0.2"), None);
    }

    #[test]
    fn test_huge_duration_does_not_overflow() {
        let clinic = ClinicDay::default_for(DayOfWeek::Monday);
        assert_eq!(
            check_slot(&clinic, &free_doctor(), t(10, 0), i32::MAX),
            Err(BookingError::OutsideClinicHours)
        );

        let mut doc = free_doctor();
        doc.busy.push(Busy { start: t(9, 0), duration_min: i32::MAX });
        assert!(doc.busy[0].overlaps(minutes_of(t(16, 0)), minutes_of(t(16, 30))));
        assert!(day_slots(&clinic, &[free_doctor()], i32::MAX).is_empty());
    }

    #[test]
    fn test_duration_from_name() {
        assert_eq!(estimate_duration_from_name("Root Canal Treatment"), 90);
        assert_eq!(estimate_duration_from_name("Teeth Whitening"), 60);
        assert_eq!(estimate_duration_from_name("Panoramic X-Ray"), 15);
        assert_eq!(estimate_duration_from_name("Porcelain Crown"), 45);
        assert_eq!(estimate_duration_from_name("Wisdom Tooth Extraction"), 120);
        assert_eq!(estimate_duration_from_name("Braces Installation"), 60);
        assert_eq!(estimate_duration_from_name("Braces Adjustment"), 15);
        assert_eq!(estimate_duration_from_name("Adjustment with Cleaning"), 30);
        assert_eq!(estimate_duration_from_name("Consultation"), 30);
        assert_eq!(service_duration(Some(50), "Root Canal"), 50);
        assert_eq!(service_duration(None, "Root Canal"), 90);
        assert_eq!(service_duration(Some(0), "Something"), 30);
    }

    #[test]
    fn test_clinic_defaults_and_week() {
        let sunday = ClinicDay::default_for(DayOfWeek::Sunday);
        assert!(!sunday.is_open);
        let mut wed = ClinicDay::default_for(DayOfWeek::Wednesday);
        wed.start_time = t(10, 0);
        let week = full_week(vec![wed]);
        assert_eq!(week.len(), 7);
        assert_eq!(week[0].day_of_week, DayOfWeek::Monday);
        assert_eq!(week[2].start_time, t(10, 0));
        assert_eq!(week[3].start_time, t(9, 0));
    }

    #[test]
    fn test_clinic_day_validation() {
        let mut d = ClinicDay::default_for(DayOfWeek::Monday);
        assert!(d.validate().is_ok());
        d.break_end_time = None;
        assert!(d.validate().is_err());
        d.break_start_time = None;
        assert!(d.validate().is_ok());
        d.end_time = t(8, 0);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_break_overlap_is_inclusive() {
        let brk = Some((12 * 60, 13 * 60));
        assert!(overlaps_break(11 * 60 + 30, 12 * 60, brk));
        assert!(overlaps_break(13 * 60, 13 * 60 + 30, brk));
        assert!(!overlaps_break(11 * 60, 11 * 60 + 30, brk));
        assert!(!overlaps_break(13 * 60 + 30, 14 * 60, None));
    }

    #[test]
    fn test_generate_time_slots() {
        let slots = generate_time_slots(t(9, 0), t(10, 30), 30);
        assert_eq!(slots, vec![t(9, 0), t(9, 30), t(10, 0)]);
        assert!(generate_time_slots(t(10, 0), t(10, 0), 30).is_empty());
    }

    #[test]
    fn test_check_slot_conflicts() {
        let clinic = ClinicDay::default_for(DayOfWeek::Monday);
        let mut doc = free_doctor();
        doc.busy.push(Busy { start: t(9, 0), duration_min: 90 });

        assert_eq!(check_slot(&clinic, &doc, t(10, 0), 30), Err(BookingError::SlotTaken));
        assert_eq!(check_slot(&clinic, &doc, t(10, 30), 30), Ok(()));
        assert_eq!(check_slot(&clinic, &doc, t(8, 30), 30), Err(BookingError::OutsideClinicHours));
        assert_eq!(check_slot(&clinic, &doc, t(11, 30), 30), Err(BookingError::DuringBreak));
        assert_eq!(check_slot(&clinic, &doc, t(17, 30), 60), Err(BookingError::OutsideClinicHours));

        let closed = ClinicDay::default_for(DayOfWeek::Sunday);
        assert_eq!(
            check_slot(&closed, &doc, t(10, 30), 30),
            Err(BookingError::ClinicClosed("Sunday"))
        );
    }

    #[test]
    fn test_check_slot_doctor_blocks() {
        let clinic = ClinicDay::default_for(DayOfWeek::Monday);
        let doc = DoctorDay {
            doctor_id: Uuid::new_v4(),
            blocks: Some(vec![TimeBlock { start: t(14, 0), end: t(17, 0) }]),
            busy: vec![],
        };
        assert_eq!(check_slot(&clinic, &doc, t(9, 0), 30), Err(BookingError::OutsideDoctorHours));
        assert_eq!(check_slot(&clinic, &doc, t(16, 30), 30), Ok(()));
        assert_eq!(check_slot(&clinic, &doc, t(16, 30), 60), Err(BookingError::OutsideDoctorHours));

        let off = DoctorDay { blocks: Some(vec![]), ..doc };
        assert_eq!(check_slot(&clinic, &off, t(16, 30), 30), Err(BookingError::OutsideDoctorHours));
    }

    #[test]
    fn test_time_block_overlap() {
        let a = TimeBlock { start: t(9, 0), end: t(12, 0) };
        assert!(a.overlaps(&TimeBlock { start: t(11, 0), end: t(13, 0) }));
        assert!(!a.overlaps(&TimeBlock { start: t(12, 0), end: t(13, 0) }));
    }

    #[test]
    fn test_day_slots_suggests_free_doctor() {
        let clinic = ClinicDay::default_for(DayOfWeek::Monday);
        let mut busy = free_doctor();
        busy.busy.push(Busy { start: t(9, 0), duration_min: 30 });
        let free = free_doctor();

        let slots = day_slots(&clinic, &[busy.clone(), free.clone()], 30);
        // 09:00..17:30 minus 11:30, 12:00, 12:30, 13:00 touching the break
        assert_eq!(slots.len(), 18 - 4);
        assert_eq!(slots[0].time, t(9, 0));
        assert_eq!(slots[0].doctor_id, Some(free.doctor_id));
        assert_eq!(slots[1].doctor_id, Some(busy.doctor_id));
        assert!(slots.iter().all(|s| s.time != t(12, 0)));

        let only_busy = day_slots(&clinic, &[busy], 30);
        assert!(!only_busy[0].available);
        assert_eq!(only_busy[0].doctor_id, None);

        let sunday = ClinicDay::default_for(DayOfWeek::Sunday);
        assert!(day_slots(&sunday, &[free], 30).is_empty());
    }
}
