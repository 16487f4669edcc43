// src/appointment_flow.rs
//
// Pure rules around appointment changes: which audit action a change maps
// to, who gets notified, and which shortcut steps a status allows.

use chrono::{NaiveDate, NaiveTime};

use crate::audit::AuditAction;
use crate::error::ApiError;
use crate::models::AppointmentStatus;
use crate::notify::{Audience, Notice, NotificationKind};

/// The fields of an appointment that drive audit and notification rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub status: AppointmentStatus,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub reschedule_requested: bool,
    pub reschedule_date: Option<NaiveDate>,
    pub reschedule_time: Option<NaiveTime>,
}

impl Snapshot {
    fn same_slot(&self, other: &Snapshot) -> bool {
        self.date == other.date && self.time == other.time
    }
}

/// Names used in notification text.
#[derive(Debug, Clone, Copy)]
pub struct NoticeContext<'a> {
    pub patient_name: &'a str,
    pub doctor_name: &'a str,
    pub service_name: &'a str,
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn audit_action(before: &Snapshot, after: &Snapshot) -> AuditAction {
    use AppointmentStatus::*;

    if before.status != after.status {
        return match (before.status, after.status) {
            (CancellationRequested, Cancelled) => AuditAction::CancellationApproved,
            (CancellationRequested, _) => AuditAction::CancellationRejected,
            (_, Cancelled) => AuditAction::AppointmentCancelled,
            (_, Completed) => AuditAction::AppointmentCompleted,
            (_, Confirmed) => AuditAction::AppointmentConfirmed,
            (_, CancellationRequested) => AuditAction::CancellationRequested,
            (_, Pending) => AuditAction::AppointmentUpdated,
        };
    }

    match (before.reschedule_requested, after.reschedule_requested) {
        (false, true) => AuditAction::RescheduleRequested,
        (true, false) if before.same_slot(after) => AuditAction::RescheduleRejected,
        (true, false) => AuditAction::RescheduleApproved,
        _ => AuditAction::AppointmentUpdated,
    }
}

/// Notifications owed for a change from `before` to `after`.
pub fn change_notices(before: &Snapshot, after: &Snapshot, ctx: NoticeContext<'_>) -> Vec<Notice> {
    use AppointmentStatus::*;

    let mut out = Vec::new();
    let new_date = fmt_date(after.date);
    let new_time = fmt_time(after.time);

    if after.status == Confirmed
        && before.status != Confirmed
        && before.status != CancellationRequested
    {
        out.push(Notice {
            audience: Audience::Patient,
            kind: NotificationKind::AppointmentConfirmed,
            title: "Appointment Confirmed".into(),
            message: format!(
                "Your appointment for {} with {} on {new_date} at {new_time} has been confirmed.",
                ctx.service_name, ctx.doctor_name
            ),
        });
    }

    if after.status == CancellationRequested && before.status != CancellationRequested {
        out.push(Notice {
            audience: Audience::AllStaff,
            kind: NotificationKind::CancellationRequest,
            title: "Cancellation Request".into(),
            message: format!(
                "{} has requested to cancel their appointment for {} on {new_date} at {new_time}.",
                ctx.patient_name, ctx.service_name
            ),
        });
    }

    if before.status == CancellationRequested && after.status == Cancelled {
        out.push(Notice {
            audience: Audience::Patient,
            kind: NotificationKind::CancellationApproved,
            title: "Cancellation Approved".into(),
            message: format!(
                "Your cancellation request for the appointment on {new_date} at {new_time} has been approved."
            ),
        });
    }

    if before.status == CancellationRequested
        && after.status != Cancelled
        && after.status != CancellationRequested
    {
        out.push(Notice {
            audience: Audience::Patient,
            kind: NotificationKind::CancellationRejected,
            title: "Cancellation Request Rejected".into(),
            message: format!(
                "Your cancellation request for the appointment on {new_date} at {new_time} has been rejected. Your appointment remains scheduled."
            ),
        });
    }

    if after.reschedule_requested && !before.reschedule_requested {
        let wanted_date = after.reschedule_date.map(fmt_date).unwrap_or_else(|| "new date".into());
        let wanted_time = after.reschedule_time.map(fmt_time).unwrap_or_else(|| "new time".into());
        out.push(Notice {
            audience: Audience::AllStaff,
            kind: NotificationKind::RescheduleRequest,
            title: "Reschedule Request".into(),
            message: format!(
                "{} has requested to reschedule their appointment for {} from {} {} to {wanted_date} {wanted_time}.",
                ctx.patient_name,
                ctx.service_name,
                fmt_date(before.date),
                fmt_time(before.time)
            ),
        });
    }

    let moved = !before.same_slot(after);

    if before.reschedule_requested && !after.reschedule_requested {
        if moved {
            out.push(Notice {
                audience: Audience::Patient,
                kind: NotificationKind::RescheduleApproved,
                title: "Reschedule Approved".into(),
                message: format!(
                    "Your reschedule request has been approved. Your appointment has been rescheduled to {new_date} at {new_time}."
                ),
            });
        } else {
            out.push(Notice {
                audience: Audience::Patient,
                kind: NotificationKind::RescheduleRejected,
                title: "Reschedule Request Rejected".into(),
                message: format!(
                    "Your reschedule request has been rejected. Your appointment remains scheduled for {new_date} at {new_time}."
                ),
            });
        }
    }

    if moved
        && !before.reschedule_requested
        && !after.reschedule_requested
        && before.status != Cancelled
        && after.status != Cancelled
    {
        out.push(Notice {
            audience: Audience::Patient,
            kind: NotificationKind::AppointmentRescheduled,
            title: "Appointment Rescheduled".into(),
            message: format!(
                "Your appointment has been rescheduled from {} at {} to {new_date} at {new_time}.",
                fmt_date(before.date),
                fmt_time(before.time)
            ),
        });
    }

    out
}

pub fn creation_notice(ctx: NoticeContext<'_>, date: NaiveDate, time: NaiveTime) -> Notice {
    Notice {
        audience: Audience::AllStaff,
        kind: NotificationKind::NewAppointment,
        title: "New Appointment".into(),
        message: format!(
            "{} has a new appointment for {} with {} on {} at {}.",
            ctx.patient_name,
            ctx.service_name,
            ctx.doctor_name,
            fmt_date(date),
            fmt_time(time)
        ),
    }
}

/// Shortcut endpoints that move an appointment along its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Confirm,
    Complete,
    Cancel,
    RequestCancellation,
    ApproveCancellation,
    RejectCancellation,
    RequestReschedule,
    ApproveReschedule,
    RejectReschedule,
}

impl Step {
    fn verb(self) -> &'static str {
        match self {
            Step::Confirm => "confirm",
            Step::Complete => "complete",
            Step::Cancel => "cancel",
            Step::RequestCancellation => "request cancellation of",
            Step::ApproveCancellation => "approve cancellation of",
            Step::RejectCancellation => "reject cancellation of",
            Step::RequestReschedule => "request a reschedule of",
            Step::ApproveReschedule => "approve the reschedule of",
            Step::RejectReschedule => "reject the reschedule of",
        }
    }

    /// Only the clinic may take these steps; patients may request.
    pub fn patient_allowed(self) -> bool {
        matches!(self, Step::RequestCancellation | Step::RequestReschedule)
    }
}

pub fn check_step(step: Step, current: &Snapshot) -> Result<(), ApiError> {
    use AppointmentStatus::*;

    let ok = match step {
        Step::Confirm => current.status == Pending,
        Step::Complete => matches!(current.status, Pending | Confirmed),
        Step::Cancel => current.status.is_active(),
        Step::RequestCancellation => matches!(current.status, Pending | Confirmed),
        Step::ApproveCancellation | Step::RejectCancellation => {
            current.status == CancellationRequested
        }
        Step::RequestReschedule => {
            matches!(current.status, Pending | Confirmed) && !current.reschedule_requested
        }
        Step::ApproveReschedule | Step::RejectReschedule => {
            current.status.is_active() && current.reschedule_requested
        }
    };

    if ok {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "INVALID_TRANSITION",
            format!(
                "cannot {} an appointment that is {}{}",
                step.verb(),
                current.status.as_str(),
                if current.reschedule_requested { " (reschedule requested)" } else { "" }
            ),
        ))
    }
}

/// Completed and cancelled appointments keep their slot, doctor and services.
pub fn ensure_slot_editable(status: AppointmentStatus) -> Result<(), ApiError> {
    if status.is_active() {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "APPOINTMENT_LOCKED",
            "Cannot edit date, time, doctor, or service for completed or cancelled appointments. Only notes can be modified.".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    fn snap(status: AppointmentStatus) -> Snapshot {
        Snapshot {
            status,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            reschedule_requested: false,
            reschedule_date: None,
            reschedule_time: None,
        }
    }

    const CTX: NoticeContext<'static> = NoticeContext {
        patient_name: "Ana Reyes",
        doctor_name: "Dr. Cruz",
        service_name: "Cleaning",
    };

    fn kinds(notices: &[Notice]) -> Vec<(Audience, NotificationKind)> {
        notices.iter().map(|n| (n.audience, n.kind)).collect()
    }

    #[test]
    fn test_confirmation_notifies_patient() {
        let n = change_notices(&snap(Pending), &snap(Confirmed), CTX);
        assert_eq!(kinds(&n), vec![(Audience::Patient, NotificationKind::AppointmentConfirmed)]);
        assert!(n[0].message.contains("Cleaning with Dr. Cruz on 2025-03-10 at 10:00"));
        assert_eq!(audit_action(&snap(Pending), &snap(Confirmed)), AuditAction::AppointmentConfirmed);
    }

    #[test]
    fn test_cancellation_request_flow() {
        let n = change_notices(&snap(Confirmed), &snap(CancellationRequested), CTX);
        assert_eq!(kinds(&n), vec![(Audience::AllStaff, NotificationKind::CancellationRequest)]);
        assert!(n[0].message.starts_with("Ana Reyes has requested to cancel"));

        let approved = change_notices(&snap(CancellationRequested), &snap(Cancelled), CTX);
        assert_eq!(kinds(&approved), vec![(Audience::Patient, NotificationKind::CancellationApproved)]);
        assert_eq!(
            audit_action(&snap(CancellationRequested), &snap(Cancelled)),
            AuditAction::CancellationApproved
        );

        let rejected = change_notices(&snap(CancellationRequested), &snap(Confirmed), CTX);
        assert_eq!(kinds(&rejected), vec![(Audience::Patient, NotificationKind::CancellationRejected)]);
        assert_eq!(
            audit_action(&snap(CancellationRequested), &snap(Confirmed)),
            AuditAction::CancellationRejected
        );
    }

    #[test]
    fn test_reschedule_request_notifies_staff() {
        let mut after = snap(Confirmed);
        after.reschedule_requested = true;
        after.reschedule_date = NaiveDate::from_ymd_opt(2025, 3, 12);
        after.reschedule_time = NaiveTime::from_hms_opt(14, 30, 0);
        let n = change_notices(&snap(Confirmed), &after, CTX);
        assert_eq!(kinds(&n), vec![(Audience::AllStaff, NotificationKind::RescheduleRequest)]);
        assert!(n[0].message.contains("from 2025-03-10 10:00 to 2025-03-12 14:30"));
        assert_eq!(audit_action(&snap(Confirmed), &after), AuditAction::RescheduleRequested);
    }

    #[test]
    fn test_reschedule_approve_and_reject() {
        let mut before = snap(Confirmed);
        before.reschedule_requested = true;

        let mut moved = snap(Confirmed);
        moved.date = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
        let n = change_notices(&before, &moved, CTX);
        assert_eq!(kinds(&n), vec![(Audience::Patient, NotificationKind::RescheduleApproved)]);
        assert_eq!(audit_action(&before, &moved), AuditAction::RescheduleApproved);

        let kept = snap(Confirmed);
        let n = change_notices(&before, &kept, CTX);
        assert_eq!(kinds(&n), vec![(Audience::Patient, NotificationKind::RescheduleRejected)]);
        assert_eq!(audit_action(&before, &kept), AuditAction::RescheduleRejected);
    }

    #[test]
    fn test_staff_move_notifies_patient_once() {
        let mut moved = snap(Pending);
        moved.time = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let n = change_notices(&snap(Pending), &moved, CTX);
        assert_eq!(kinds(&n), vec![(Audience::Patient, NotificationKind::AppointmentRescheduled)]);
        assert!(n[0].message.contains("from 2025-03-10 at 10:00 to 2025-03-10 at 11:00"));

        // unchanged slot, nothing to say
        assert!(change_notices(&snap(Pending), &snap(Pending), CTX).is_empty());
        assert_eq!(audit_action(&snap(Pending), &snap(Pending)), AuditAction::AppointmentUpdated);

        // moving a cancelled appointment is silent
        let mut cancelled_move = snap(Cancelled);
        cancelled_move.time = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        assert!(change_notices(&snap(Cancelled), &cancelled_move, CTX).is_empty());
    }

    #[test]
    fn test_completion_is_silent() {
        assert!(change_notices(&snap(Confirmed), &snap(Completed), CTX).is_empty());
        assert_eq!(audit_action(&snap(Confirmed), &snap(Completed)), AuditAction::AppointmentCompleted);
        assert_eq!(audit_action(&snap(Confirmed), &snap(Cancelled)), AuditAction::AppointmentCancelled);
    }

    #[test]
    fn test_creation_notice() {
        let n = creation_notice(CTX, snap(Pending).date, snap(Pending).time);
        assert_eq!(n.audience, Audience::AllStaff);
        assert_eq!(n.kind, NotificationKind::NewAppointment);
        assert_eq!(
            n.message,
            "Ana Reyes has a new appointment for Cleaning with Dr. Cruz on 2025-03-10 at 10:00."
        );
    }

    #[test]
    fn test_check_step() {
        assert!(check_step(Step::Confirm, &snap(Pending)).is_ok());
        assert!(check_step(Step::Confirm, &snap(Confirmed)).is_err());
        assert!(check_step(Step::Complete, &snap(Confirmed)).is_ok());
        assert!(check_step(Step::Complete, &snap(Cancelled)).is_err());
        assert!(check_step(Step::Cancel, &snap(CancellationRequested)).is_ok());
        assert!(check_step(Step::Cancel, &snap(Completed)).is_err());
        assert!(check_step(Step::ApproveCancellation, &snap(CancellationRequested)).is_ok());
        assert!(check_step(Step::RejectCancellation, &snap(Confirmed)).is_err());

        let mut requested = snap(Confirmed);
        assert!(check_step(Step::ApproveReschedule, &requested).is_err());
        requested.reschedule_requested = true;
        assert!(check_step(Step::RequestReschedule, &requested).is_err());
        assert!(check_step(Step::ApproveReschedule, &requested).is_ok());
        assert!(check_step(Step::RejectReschedule, &requested).is_ok());

        assert!(Step::RequestCancellation.patient_allowed());
        assert!(!Step::ApproveCancellation.patient_allowed());
    }

    #[test]
    fn test_slot_lock() {
        assert!(ensure_slot_editable(Pending).is_ok());
        assert!(ensure_slot_editable(CancellationRequested).is_ok());
        assert!(ensure_slot_editable(Completed).is_err());
        assert!(ensure_slot_editable(Cancelled).is_err());
    }
}
