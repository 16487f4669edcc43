// src/reports.rs
//
// Aggregations behind the reports and dashboard screens. Everything here is
// pure: routes load rows, convert timestamps to clinic-local dates and hand
// the slices in.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AppointmentStatus;

/// One appointment as the aggregations see it.
#[derive(Debug, Clone)]
pub struct ReportAppointment {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub service_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub reschedule_requested: bool,
    pub payment_amount_cents: Option<i64>,
    /// Sum of the service line prices, or the primary service price.
    pub services_price_cents: i64,
    pub created_on: NaiveDate,
    pub updated_on: NaiveDate,
    pub completed_on: Option<NaiveDate>,
}

impl ReportAppointment {
    /// Amount paid when recorded, otherwise the list price of the services.
    pub fn revenue_cents(&self) -> i64 {
        self.payment_amount_cents.unwrap_or(self.services_price_cents)
    }

    /// Day revenue is attributed to the completion stamp, else the last
    /// update. `None` unless completed.
    pub fn completion_date(&self) -> Option<NaiveDate> {
        if self.status != AppointmentStatus::Completed {
            return None;
        }
        Some(self.completed_on.unwrap_or(self.updated_on))
    }

    fn is_no_show(&self, today: NaiveDate) -> bool {
        self.status == AppointmentStatus::Pending && self.date < today
    }
}

#[derive(Debug, Clone)]
pub struct ReportPatient {
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReportDoctor {
    pub doctor_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NameValue {
    pub name: String,
    pub value: u32,
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}

/* ============================================================
   Shared building blocks
   ============================================================ */

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusCounts {
    pub scheduled: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub no_show: usize,
    pub no_show_rate: f64,
}

pub fn status_counts(appts: &[&ReportAppointment], today: NaiveDate) -> StatusCounts {
    let scheduled = appts.len();
    let count = |s: AppointmentStatus| appts.iter().filter(|a| a.status == s).count();
    let no_show = appts.iter().filter(|a| a.is_no_show(today)).count();
    StatusCounts {
        scheduled,
        completed: count(AppointmentStatus::Completed),
        cancelled: count(AppointmentStatus::Cancelled),
        no_show,
        no_show_rate: pct(no_show, scheduled),
    }
}

/// Patients seen once in `appts` count as new, more than once as returning.
pub fn new_vs_returning(appts: &[&ReportAppointment]) -> (usize, usize) {
    let mut per_patient: HashMap<Uuid, usize> = HashMap::new();
    for a in appts {
        *per_patient.entry(a.patient_id).or_default() += 1;
    }
    let new = per_patient.values().filter(|c| **c == 1).count();
    (new, per_patient.len() - new)
}

pub fn active_patients(appts: &[&ReportAppointment]) -> usize {
    appts.iter().map(|a| a.patient_id).collect::<HashSet<_>>().len()
}

/// Most booked services, ties broken by name.
pub fn popular_procedures(appts: &[&ReportAppointment], limit: usize) -> Vec<NameValue> {
    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    for a in appts {
        *counts.entry(a.service_name.as_str()).or_default() += 1;
    }
    let mut out: Vec<NameValue> = counts
        .into_iter()
        .map(|(name, value)| NameValue { name: name.to_string(), value })
        .collect();
    out.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
    out.truncate(limit);
    out
}

pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Demographics {
    pub age_groups: Vec<NameValue>,
    pub genders: Vec<NameValue>,
}

const AGE_BUCKETS: [(&str, i32); 5] = [("0-18", 18), ("19-35", 35), ("36-50", 50), ("51-65", 65), ("65+", i32::MAX)];

pub fn demographics(patients: &[ReportPatient], today: NaiveDate) -> Demographics {
    let mut ages = [0u32; 5];
    let mut genders = [0u32; 3];

    for p in patients {
        if let Some(dob) = p.date_of_birth {
            let age = age_on(dob, today);
            if let Some(idx) = AGE_BUCKETS.iter().position(|(_, max)| age <= *max) {
                ages[idx] += 1;
            }
        }
        if let Some(g) = p.gender.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            let idx = match g.to_ascii_lowercase().as_str() {
                "male" => 0,
                "female" => 1,
                _ => 2,
            };
            genders[idx] += 1;
        }
    }

    Demographics {
        age_groups: AGE_BUCKETS
            .iter()
            .zip(ages)
            .map(|((name, _), value)| NameValue { name: name.to_string(), value })
            .collect(),
        genders: ["Male", "Female", "Other"]
            .iter()
            .zip(genders)
            .map(|(name, value)| NameValue { name: name.to_string(), value })
            .collect(),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChangeRates {
    pub cancellation_rate: f64,
    pub rescheduling_rate: f64,
}

/// Pending cancellation requests count as cancellations.
pub fn change_rates(appts: &[&ReportAppointment]) -> ChangeRates {
    let cancelled = appts
        .iter()
        .filter(|a| {
            matches!(
                a.status,
                AppointmentStatus::Cancelled | AppointmentStatus::CancellationRequested
            )
        })
        .count();
    let rescheduled = appts.iter().filter(|a| a.reschedule_requested).count();
    ChangeRates {
        cancellation_rate: pct(cancelled, appts.len()),
        rescheduling_rate: pct(rescheduled, appts.len()),
    }
}

fn revenue_on(appts: &[&ReportAppointment], matches: impl Fn(NaiveDate) -> bool) -> i64 {
    appts
        .iter()
        .filter(|a| a.completion_date().is_some_and(&matches))
        .map(|a| a.revenue_cents())
        .sum()
}

fn day_label(d: NaiveDate) -> String {
    d.format("%b %-d").to_string()
}

/* ============================================================
   Reports
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportRange {
    Week,
    #[default]
    Month,
    Year,
}

impl ReportRange {
    /// Inclusive window looking both back and ahead of `today`.
    pub fn window(self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            ReportRange::Week => (today - Duration::days(6), today + Duration::days(7)),
            ReportRange::Month => (today - Duration::days(29), today + Duration::days(30)),
            ReportRange::Year => {
                let start = first_of_month(today.year() - 1, today.month());
                let end = last_of_month(today.year() + 1, today.month());
                (start, end)
            }
        }
    }

    /// Bookable slots per doctor assumed for utilization.
    pub fn total_slots(self) -> usize {
        match self {
            ReportRange::Week => 140,
            ReportRange::Month => 600,
            ReportRange::Year => 7200,
        }
    }
}

pub fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

pub fn last_of_month(year: i32, month: u32) -> NaiveDate {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    first_of_month(ny, nm) - Duration::days(1)
}

/// `today` shifted back `months` whole months, pinned to the 1st.
fn months_back(today: NaiveDate, months: u32) -> NaiveDate {
    let total = today.year() * 12 + today.month0() as i32 - months as i32;
    first_of_month(total.div_euclid(12), total.rem_euclid(12) as u32 + 1)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PeriodRevenue {
    pub period: String,
    pub start: NaiveDate,
    pub revenue_cents: i64,
}

pub fn revenue_by_period(
    appts: &[&ReportAppointment],
    range: ReportRange,
    today: NaiveDate,
) -> Vec<PeriodRevenue> {
    match range {
        ReportRange::Week | ReportRange::Month => {
            let days = if range == ReportRange::Week { 7 } else { 30 };
            (0..days)
                .rev()
                .map(|i| {
                    let day = today - Duration::days(i);
                    PeriodRevenue {
                        period: day_label(day),
                        start: day,
                        revenue_cents: revenue_on(appts, |d| d == day),
                    }
                })
                .collect()
        }
        ReportRange::Year => (0..12)
            .rev()
            .map(|i| {
                let month = months_back(today, i);
                PeriodRevenue {
                    period: month.format("%b %Y").to_string(),
                    start: month,
                    revenue_cents: revenue_on(appts, |d| {
                        d.year() == month.year() && d.month() == month.month()
                    }),
                }
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderProductivity {
    pub doctor_id: Uuid,
    pub name: String,
    pub appointments: usize,
    pub completed: usize,
    pub utilization: f64,
    pub productivity: f64,
}

pub fn provider_productivity(
    appts: &[&ReportAppointment],
    doctors: &[ReportDoctor],
    total_slots: usize,
) -> Vec<ProviderProductivity> {
    doctors
        .iter()
        .map(|doc| {
            let mine: Vec<&&ReportAppointment> =
                appts.iter().filter(|a| a.doctor_id == doc.doctor_id).collect();
            let completed = mine
                .iter()
                .filter(|a| a.status == AppointmentStatus::Completed)
                .count();
            ProviderProductivity {
                doctor_id: doc.doctor_id,
                name: doc.name.clone(),
                appointments: mine.len(),
                completed,
                utilization: pct(mine.len(), total_slots),
                productivity: pct(completed, mine.len()),
            }
        })
        .collect()
}

/// Mean days between booking and the appointment date.
pub fn avg_lead_time_days(appts: &[&ReportAppointment]) -> f64 {
    if appts.is_empty() {
        return 0.0;
    }
    let total: i64 = appts.iter().map(|a| (a.date - a.created_on).num_days()).sum();
    (total as f64 / appts.len() as f64 * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportSummary {
    pub range: ReportRange,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status_counts: StatusCounts,
    pub new_patients: usize,
    pub returning_patients: usize,
    /// Doctors with at least one appointment in the window.
    pub provider_volume: Vec<ProviderProductivity>,
    pub revenue_by_period: Vec<PeriodRevenue>,
    pub demographics: Demographics,
    pub provider_productivity: Vec<ProviderProductivity>,
    pub avg_lead_time_days: f64,
    pub rates: ChangeRates,
    pub popular_procedures: Vec<NameValue>,
    pub active_patients: usize,
}

pub fn report_summary(
    appts: &[ReportAppointment],
    patients: &[ReportPatient],
    doctors: &[ReportDoctor],
    range: ReportRange,
    today: NaiveDate,
) -> ReportSummary {
    let (start_date, end_date) = range.window(today);
    let in_range: Vec<&ReportAppointment> = appts
        .iter()
        .filter(|a| a.date >= start_date && a.date <= end_date)
        .collect();

    let (new_patients, returning_patients) = new_vs_returning(&in_range);
    let productivity = provider_productivity(&in_range, doctors, range.total_slots());

    ReportSummary {
        range,
        start_date,
        end_date,
        status_counts: status_counts(&in_range, today),
        new_patients,
        returning_patients,
        provider_volume: productivity
            .iter()
            .filter(|p| p.appointments > 0)
            .cloned()
            .collect(),
        revenue_by_period: revenue_by_period(&in_range, range, today),
        demographics: demographics(patients, today),
        provider_productivity: productivity,
        avg_lead_time_days: avg_lead_time_days(&in_range),
        rates: change_rates(&in_range),
        popular_procedures: popular_procedures(&in_range, 10),
        active_patients: active_patients(&in_range),
    }
}

/* ============================================================
   Dashboard
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DashboardPeriod {
    #[default]
    Today,
    Week,
    Month,
}

impl DashboardPeriod {
    /// Week starts on Sunday; every window ends today.
    pub fn window(self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = match self {
            DashboardPeriod::Today => today,
            DashboardPeriod::Week => {
                today - Duration::days(today.weekday().num_days_from_sunday() as i64)
            }
            DashboardPeriod::Month => first_of_month(today.year(), today.month()),
        };
        (start, today)
    }
}

/// Daily slots assumed per doctor over a 30 day month.
const DASHBOARD_SLOTS: usize = 20 * 30;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub label: String,
    pub scheduled: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PeriodRevenueTotals {
    pub collected_cents: i64,
    pub outstanding_cents: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpcomingAppointment {
    pub appointment_id: Uuid,
    pub patient_name: String,
    pub doctor_name: String,
    pub service_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Dashboard {
    pub period: DashboardPeriod,
    pub today: StatusCounts,
    pub week: StatusCounts,
    pub month: StatusCounts,
    pub current: StatusCounts,
    pub active_patients: usize,
    pub new_patients: usize,
    pub returning_patients: usize,
    pub provider_stats: Vec<ProviderProductivity>,
    pub popular_services: Vec<NameValue>,
    pub trend: Vec<TrendPoint>,
    pub demographics: Demographics,
    pub rates: ChangeRates,
    pub revenue: PeriodRevenueTotals,
    pub upcoming: Vec<UpcomingAppointment>,
}

fn dated_between(appts: &[ReportAppointment], (start, end): (NaiveDate, NaiveDate)) -> Vec<&ReportAppointment> {
    appts.iter().filter(|a| a.date >= start && a.date <= end).collect()
}

pub fn dashboard(
    appts: &[ReportAppointment],
    patients: &[ReportPatient],
    doctors: &[ReportDoctor],
    period: DashboardPeriod,
    today: NaiveDate,
) -> Dashboard {
    let all: Vec<&ReportAppointment> = appts.iter().collect();

    let today_kpis = status_counts(&dated_between(appts, DashboardPeriod::Today.window(today)), today);
    let week_kpis = status_counts(&dated_between(appts, DashboardPeriod::Week.window(today)), today);
    let month_kpis = status_counts(&dated_between(appts, DashboardPeriod::Month.window(today)), today);
    let current = match period {
        DashboardPeriod::Today => today_kpis.clone(),
        DashboardPeriod::Week => week_kpis.clone(),
        DashboardPeriod::Month => month_kpis.clone(),
    };

    let trend = (0..7)
        .rev()
        .map(|i| {
            let day = today - Duration::days(i);
            let on_day: Vec<&&ReportAppointment> = all.iter().filter(|a| a.date == day).collect();
            let count = |s: AppointmentStatus| on_day.iter().filter(|a| a.status == s).count();
            TrendPoint {
                date: day,
                label: day_label(day),
                scheduled: on_day.len(),
                completed: count(AppointmentStatus::Completed),
                cancelled: count(AppointmentStatus::Cancelled),
                revenue_cents: revenue_on(&all, |d| d == day),
            }
        })
        .collect();

    let in_period = dated_between(appts, period.window(today));
    let revenue = PeriodRevenueTotals {
        collected_cents: in_period
            .iter()
            .filter(|a| a.status == AppointmentStatus::Completed)
            .map(|a| a.revenue_cents())
            .sum(),
        outstanding_cents: in_period
            .iter()
            .filter(|a| {
                matches!(a.status, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
            })
            .map(|a| a.services_price_cents)
            .sum(),
    };

    let horizon = today + Duration::days(7);
    let mut upcoming: Vec<&ReportAppointment> = appts
        .iter()
        .filter(|a| a.date >= today && a.date <= horizon && a.status.is_active())
        .collect();
    upcoming.sort_by_key(|a| (a.date, a.time));
    let upcoming = upcoming
        .into_iter()
        .take(10)
        .map(|a| UpcomingAppointment {
            appointment_id: a.appointment_id,
            patient_name: a.patient_name.clone(),
            doctor_name: a.doctor_name.clone(),
            service_name: a.service_name.clone(),
            date: a.date,
            time: a.time,
            status: a.status,
        })
        .collect();

    let (new_patients, returning_patients) = new_vs_returning(&all);

    Dashboard {
        period,
        today: today_kpis,
        week: week_kpis,
        month: month_kpis,
        current,
        active_patients: active_patients(&all),
        new_patients,
        returning_patients,
        provider_stats: provider_productivity(&all, doctors, DASHBOARD_SLOTS),
        popular_services: popular_procedures(&all, 10),
        trend,
        demographics: demographics(patients, today),
        rates: change_rates(&all),
        revenue,
        upcoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct Fixture {
        doctor_a: Uuid,
        doctor_b: Uuid,
        patient_x: Uuid,
        patient_y: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                doctor_a: Uuid::new_v4(),
                doctor_b: Uuid::new_v4(),
                patient_x: Uuid::new_v4(),
                patient_y: Uuid::new_v4(),
            }
        }

        fn appt(&self, date: NaiveDate, status: AppointmentStatus) -> ReportAppointment {
            ReportAppointment {
                appointment_id: Uuid::new_v4(),
                patient_id: self.patient_x,
                patient_name: "Ana Reyes".into(),
                doctor_id: self.doctor_a,
                doctor_name: "Dr. Cruz".into(),
                service_name: "Cleaning".into(),
                date,
                time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                status,
                reschedule_requested: false,
                payment_amount_cents: None,
                services_price_cents: 50_000,
                created_on: date - Duration::days(4),
                updated_on: date,
                completed_on: None,
            }
        }

        fn doctors(&self) -> Vec<ReportDoctor> {
            vec![
                ReportDoctor { doctor_id: self.doctor_a, name: "Dr. Cruz".into() },
                ReportDoctor { doctor_id: self.doctor_b, name: "Dr. Lim".into() },
            ]
        }
    }

    #[test]
    fn test_revenue_and_completion_date() {
        let f = Fixture::new();
        let mut a = f.appt(d(2025, 3, 10), AppointmentStatus::Completed);
        assert_eq!(a.revenue_cents(), 50_000);
        assert_eq!(a.completion_date(), Some(d(2025, 3, 10)));
        a.payment_amount_cents = Some(42_000);
        a.completed_on = Some(d(2025, 3, 11));
        assert_eq!(a.revenue_cents(), 42_000);
        assert_eq!(a.completion_date(), Some(d(2025, 3, 11)));
        a.completed_on = None;
        a.updated_on = d(2025, 3, 12);
        assert_eq!(a.completion_date(), Some(d(2025, 3, 12)));
        let pending = f.appt(d(2025, 3, 10), AppointmentStatus::Pending);
        assert_eq!(pending.completion_date(), None);
    }

    #[test]
    fn test_windows() {
        let today = d(2025, 3, 15);
        assert_eq!(ReportRange::Week.window(today), (d(2025, 3, 9), d(2025, 3, 22)));
        assert_eq!(ReportRange::Month.window(today), (d(2025, 2, 14), d(2025, 4, 14)));
        assert_eq!(ReportRange::Year.window(today), (d(2024, 3, 1), d(2026, 3, 31)));
        assert_eq!(ReportRange::Year.window(d(2025, 12, 5)).1, d(2026, 12, 31));

        // 2025-03-15 is a Saturday
        assert_eq!(DashboardPeriod::Week.window(today), (d(2025, 3, 9), today));
        assert_eq!(DashboardPeriod::Month.window(today), (d(2025, 3, 1), today));
        assert_eq!(DashboardPeriod::Today.window(today), (today, today));
    }

    #[test]
    fn test_months_back_crosses_year() {
        assert_eq!(months_back(d(2025, 2, 20), 0), d(2025, 2, 1));
        assert_eq!(months_back(d(2025, 2, 20), 3), d(2024, 11, 1));
        assert_eq!(months_back(d(2025, 2, 20), 11), d(2024, 3, 1));
    }

    #[test]
    fn test_status_counts_and_no_show() {
        let f = Fixture::new();
        let today = d(2025, 3, 15);
        let appts = [
            f.appt(d(2025, 3, 10), AppointmentStatus::Pending),
            f.appt(d(2025, 3, 16), AppointmentStatus::Pending),
            f.appt(d(2025, 3, 11), AppointmentStatus::Completed),
            f.appt(d(2025, 3, 12), AppointmentStatus::Cancelled),
        ];
        let refs: Vec<&ReportAppointment> = appts.iter().collect();
        let c = status_counts(&refs, today);
        assert_eq!(c.scheduled, 4);
        assert_eq!(c.completed, 1);
        assert_eq!(c.cancelled, 1);
        assert_eq!(c.no_show, 1);
        assert_eq!(c.no_show_rate, 25.0);
        assert_eq!(status_counts(&[], today).no_show_rate, 0.0);
    }

    #[test]
    fn test_new_vs_returning() {
        let f = Fixture::new();
        let mut y = f.appt(d(2025, 3, 10), AppointmentStatus::Pending);
        y.patient_id = f.patient_y;
        let appts = [
            f.appt(d(2025, 3, 10), AppointmentStatus::Pending),
            f.appt(d(2025, 3, 11), AppointmentStatus::Pending),
            y,
        ];
        let refs: Vec<&ReportAppointment> = appts.iter().collect();
        assert_eq!(new_vs_returning(&refs), (1, 1));
        assert_eq!(active_patients(&refs), 2);
    }

    #[test]
    fn test_demographics() {
        let today = d(2025, 6, 1);
        let patients = vec![
            ReportPatient { date_of_birth: Some(d(2007, 6, 2)), gender: Some("Female".into()) },
            ReportPatient { date_of_birth: Some(d(2007, 6, 1)), gender: Some("male".into()) },
            ReportPatient { date_of_birth: Some(d(1950, 1, 1)), gender: Some("Prefer not to say".into()) },
            ReportPatient { date_of_birth: None, gender: None },
        ];
        let demo = demographics(&patients, today);
        // 17 (birthday tomorrow) and 18 both land in 0-18
        assert_eq!(demo.age_groups[0], NameValue { name: "0-18".into(), value: 2 });
        assert_eq!(demo.age_groups[4].value, 1);
        assert_eq!(
            demo.genders,
            vec![
                NameValue { name: "Male".into(), value: 1 },
                NameValue { name: "Female".into(), value: 1 },
                NameValue { name: "Other".into(), value: 1 },
            ]
        );
    }

    #[test]
    fn test_revenue_by_period_uses_completion_date() {
        let f = Fixture::new();
        let today = d(2025, 3, 15);
        let mut done = f.appt(d(2025, 3, 10), AppointmentStatus::Completed);
        done.completed_on = Some(d(2025, 3, 14));
        done.payment_amount_cents = Some(30_000);
        let pending = f.appt(d(2025, 3, 14), AppointmentStatus::Pending);
        let appts = [done, pending];
        let refs: Vec<&ReportAppointment> = appts.iter().collect();

        let week = revenue_by_period(&refs, ReportRange::Week, today);
        assert_eq!(week.len(), 7);
        assert_eq!(week[6].start, today);
        assert_eq!(week[5].period, "Mar 14");
        assert_eq!(week[5].revenue_cents, 30_000);
        assert_eq!(week.iter().map(|p| p.revenue_cents).sum::<i64>(), 30_000);

        let year = revenue_by_period(&refs, ReportRange::Year, today);
        assert_eq!(year.len(), 12);
        assert_eq!(year[11].period, "Mar 2025");
        assert_eq!(year[11].revenue_cents, 30_000);
        assert_eq!(year[0].start, d(2024, 4, 1));
    }

    #[test]
    fn test_report_summary() {
        let f = Fixture::new();
        let today = d(2025, 3, 15);
        let mut b = f.appt(d(2025, 3, 14), AppointmentStatus::CancellationRequested);
        b.doctor_id = f.doctor_b;
        b.service_name = "Root Canal".into();
        b.reschedule_requested = true;
        let appts = vec![
            f.appt(d(2025, 3, 12), AppointmentStatus::Completed),
            f.appt(d(2025, 3, 13), AppointmentStatus::Confirmed),
            b,
            // outside the week window
            f.appt(d(2025, 1, 1), AppointmentStatus::Completed),
        ];
        let s = report_summary(&appts, &[], &f.doctors(), ReportRange::Week, today);
        assert_eq!(s.status_counts.scheduled, 3);
        assert_eq!(s.provider_productivity.len(), 2);
        assert_eq!(s.provider_volume.len(), 2);
        let cruz = &s.provider_productivity[0];
        assert_eq!((cruz.appointments, cruz.completed), (2, 1));
        assert_eq!(cruz.productivity, 50.0);
        assert_eq!(cruz.utilization, 1.4);
        assert_eq!(s.rates.cancellation_rate, 33.3);
        assert_eq!(s.rates.rescheduling_rate, 33.3);
        assert_eq!(s.popular_procedures[0], NameValue { name: "Cleaning".into(), value: 2 });
        assert_eq!(s.avg_lead_time_days, 4.0);
        assert_eq!(s.active_patients, 1);
    }

    #[test]
    fn test_dashboard() {
        let f = Fixture::new();
        let today = d(2025, 3, 15);
        let mut done = f.appt(today, AppointmentStatus::Completed);
        done.payment_amount_cents = Some(20_000);
        done.completed_on = Some(today);
        let appts = vec![
            done,
            f.appt(today, AppointmentStatus::Confirmed),
            f.appt(d(2025, 3, 3), AppointmentStatus::Pending),
            f.appt(d(2025, 3, 18), AppointmentStatus::Pending),
            f.appt(d(2025, 3, 17), AppointmentStatus::Cancelled),
            f.appt(d(2025, 3, 30), AppointmentStatus::Pending),
        ];
        let dash = dashboard(&appts, &[], &f.doctors(), DashboardPeriod::Today, today);

        assert_eq!(dash.today.scheduled, 2);
        assert_eq!(dash.week.scheduled, 2);
        assert_eq!(dash.month.scheduled, 3);
        assert_eq!(dash.month.no_show, 1);
        assert_eq!(dash.current, dash.today);
        assert_eq!(dash.revenue.collected_cents, 20_000);
        assert_eq!(dash.revenue.outstanding_cents, 50_000);
        assert_eq!(dash.trend.len(), 7);
        assert_eq!(dash.trend[6].scheduled, 2);
        assert_eq!(dash.trend[6].revenue_cents, 20_000);
        assert_eq!(dash.provider_stats[0].utilization, 1.0);

        let upcoming: Vec<NaiveDate> = dash.upcoming.iter().map(|u| u.date).collect();
        assert_eq!(upcoming, vec![today, d(2025, 3, 18)]);
    }
}
