//! Ticket lifecycle rules: the allowed-transition table, SLA thresholds
//! and the knowledge-article promotion gate. Everything here is pure so the
//! rules stay testable without a database.

use crate::shared::error::AppError;
use crate::shared::models::{Ticket, TicketPriority, TicketStatus};

/// Minutes from creation to resolution an URGENT_ON_AIR ticket may take
/// and still count as SLA-compliant.
pub const SLA_URGENT_MINUTES: i64 = 15;
/// Threshold for NORMAL and HIGH priority tickets.
pub const SLA_STANDARD_MINUTES: i64 = 480;

pub fn sla_threshold_minutes(priority: TicketPriority) -> i64 {
    match priority {
        TicketPriority::UrgentOnAir => SLA_URGENT_MINUTES,
        TicketPriority::Normal | TicketPriority::High => SLA_STANDARD_MINUTES,
    }
}

/// Explicit transition table. CLOSED is terminal; RESOLVED can only move
/// to CLOSED. HANDOVER returns to IN_PROGRESS when a staff member acts.
pub fn transition_allowed(from: TicketStatus, to: TicketStatus) -> bool {
    use TicketStatus::*;
    matches!(
        (from, to),
        (Open, InProgress)
            | (Open, Handover)
            | (Open, Resolved)
            | (Open, Closed)
            | (InProgress, Handover)
            | (InProgress, Resolved)
            | (InProgress, Closed)
            | (Handover, InProgress)
            | (Handover, Resolved)
            | (Handover, Closed)
            | (Resolved, Closed)
    )
}

pub fn guard_transition(from: TicketStatus, to: TicketStatus) -> Result<(), AppError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "cannot move ticket from {from} to {to}"
        )))
    }
}

/// Whether a staff action on a ticket in this status counts as the first
/// response (and therefore may stamp `first_response_at`).
pub fn counts_as_first_response(status: TicketStatus) -> bool {
    status == TicketStatus::Open
}

/// Status a ticket lands in after a staff reply. Replies pull OPEN and
/// HANDOVER tickets back into IN_PROGRESS; otherwise the status is kept.
pub fn status_after_staff_reply(status: TicketStatus) -> TicketStatus {
    match status {
        TicketStatus::Open | TicketStatus::Handover => TicketStatus::InProgress,
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionEligibility {
    /// Resolved, has a solution, not yet converted.
    Eligible,
    /// Flag already set; promotion and dismissal are idempotent no-ops.
    AlreadyConverted,
}

/// Gate for ticket-to-article promotion and for dismissing a candidate.
pub fn promotion_eligibility(ticket: &Ticket) -> Result<PromotionEligibility, AppError> {
    if ticket.is_converted_to_article {
        return Ok(PromotionEligibility::AlreadyConverted);
    }
    if ticket.status != TicketStatus::Resolved {
        return Err(AppError::Conflict(
            "only resolved tickets can be promoted".to_string(),
        ));
    }
    match &ticket.solution {
        Some(s) if !s.trim().is_empty() => Ok(PromotionEligibility::Eligible),
        _ => Err(AppError::Validation(
            "ticket has no solution to promote".to_string(),
        )),
    }
}

pub fn validate_solution(solution: &str) -> Result<(), AppError> {
    if solution.trim().is_empty() {
        Err(AppError::Validation(
            "a non-empty solution is required to resolve a ticket".to_string(),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn ticket(status: TicketStatus, solution: Option<&str>, converted: bool) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            ticket_number: 1,
            location: crate::shared::models::Location::Studio1,
            priority: TicketPriority::Normal,
            category: "AUDIO".to_string(),
            subject: "Mic 2 dead".to_string(),
            description: "No signal on channel 2".to_string(),
            solution: solution.map(str::to_string),
            proof_image_url: None,
            requester_id: Uuid::new_v4(),
            status,
            created_at: Utc::now(),
            first_response_at: None,
            resolved_at: None,
            closed_at: None,
            is_handover: false,
            is_converted_to_article: converted,
        }
    }

    #[test]
    fn legal_edges_accepted() {
        use TicketStatus::*;
        for (from, to) in [
            (Open, InProgress),
            (Open, Handover),
            (InProgress, Resolved),
            (Handover, InProgress),
            (Handover, Resolved),
            (Resolved, Closed),
            (Open, Closed),
            (InProgress, Closed),
            (Handover, Closed),
        ] {
            assert!(guard_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn closed_is_terminal_and_resolved_cannot_reopen() {
        use TicketStatus::*;
        for to in [Open, InProgress, Handover, Resolved] {
            assert!(guard_transition(Closed, to).is_err());
        }
        assert!(guard_transition(Resolved, Open).is_err());
        assert!(guard_transition(Resolved, InProgress).is_err());
        assert!(guard_transition(InProgress, Open).is_err());
    }

    #[test]
    fn first_response_only_from_open() {
        assert!(counts_as_first_response(TicketStatus::Open));
        assert!(!counts_as_first_response(TicketStatus::InProgress));
        assert!(!counts_as_first_response(TicketStatus::Handover));
    }

    #[test]
    fn staff_reply_pulls_handover_back_in_progress() {
        assert_eq!(
            status_after_staff_reply(TicketStatus::Handover),
            TicketStatus::InProgress
        );
        assert_eq!(
            status_after_staff_reply(TicketStatus::Open),
            TicketStatus::InProgress
        );
        assert_eq!(
            status_after_staff_reply(TicketStatus::Resolved),
            TicketStatus::Resolved
        );
    }

    #[test]
    fn sla_thresholds_per_priority() {
        assert_eq!(sla_threshold_minutes(TicketPriority::UrgentOnAir), 15);
        assert_eq!(sla_threshold_minutes(TicketPriority::Normal), 480);
        assert_eq!(sla_threshold_minutes(TicketPriority::High), 480);
    }

    #[test]
    fn promotion_gate() {
        let ok = ticket(TicketStatus::Resolved, Some("Swapped the XLR cable"), false);
        assert_eq!(
            promotion_eligibility(&ok).unwrap(),
            PromotionEligibility::Eligible
        );

        let already = ticket(TicketStatus::Resolved, Some("x"), true);
        assert_eq!(
            promotion_eligibility(&already).unwrap(),
            PromotionEligibility::AlreadyConverted
        );

        let open = ticket(TicketStatus::Open, Some("x"), false);
        assert!(promotion_eligibility(&open).is_err());

        let blank = ticket(TicketStatus::Resolved, Some("   "), false);
        assert!(promotion_eligibility(&blank).is_err());

        let none = ticket(TicketStatus::Resolved, None, false);
        assert!(promotion_eligibility(&none).is_err());
    }

    #[test]
    fn unresolved_ticket_cannot_be_dismissed_from_the_queue() {
        // Dismissal shares this gate. Flagging an OPEN ticket as converted
        // would bar it from ever becoming a candidate once resolved.
        let open = ticket(TicketStatus::Open, Some("x"), false);
        assert!(matches!(
            promotion_eligibility(&open),
            Err(AppError::Conflict(_))
        ));
        let in_progress = ticket(TicketStatus::InProgress, None, false);
        assert!(promotion_eligibility(&in_progress).is_err());
    }

    #[test]
    fn empty_solution_rejected() {
        assert!(validate_solution("").is_err());
        assert!(validate_solution("  \n").is_err());
        assert!(validate_solution("Re-patched MCR feed").is_ok());
    }
}
