//! Pure KPI math over ticket and activity sets. Handlers load rows and
//! hand them here, so every figure is recomputable (and testable) from
//! the tickets and their activity log alone.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::shared::models::{ActivityKind, Ticket, TicketActivity, TicketPriority, TicketStatus};
use crate::tickets::lifecycle::sla_threshold_minutes;

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// "12.3" or "N/A" when the underlying set is empty.
pub fn fmt_minutes(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}"),
        None => "N/A".to_string(),
    }
}

/// Tickets created inside `[start, end)`. Loads are deliberately wider
/// than the reporting window (older tickets resolved inside it feed the
/// resolved series and staff attribution); the summary and category
/// figures must only see tickets the window actually owns.
pub fn created_in_window(
    tickets: &[Ticket],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Ticket> {
    tickets
        .iter()
        .filter(|t| t.created_at >= start && t.created_at < end)
        .cloned()
        .collect()
}

#[derive(Debug, Serialize)]
pub struct KpiSummary {
    pub total_tickets: i64,
    pub open_tickets: i64,
    pub resolved_tickets: i64,
    /// Mean minutes from creation to first staff response.
    pub mtta_minutes: Option<f64>,
    /// Mean minutes from creation to resolution.
    pub mttr_minutes: Option<f64>,
    /// Percentage of resolved tickets that never went through handover.
    /// 0.0 when nothing resolved, never a division error.
    pub fcr_percent: f64,
    /// Compliance per priority class.
    pub sla: Vec<SlaClassRate>,
}

#[derive(Debug, Serialize)]
pub struct SlaClassRate {
    pub class: &'static str,
    pub total: i64,
    pub compliant: i64,
    pub percent: f64,
}

/// Compliance over finished tickets (RESOLVED or CLOSED, with a
/// resolution time), split into the urgent class and everything else.
fn sla_class_rates(tickets: &[Ticket]) -> Vec<SlaClassRate> {
    let mut urgent = (0i64, 0i64);
    let mut standard = (0i64, 0i64);
    for t in tickets {
        if !matches!(t.status, TicketStatus::Resolved | TicketStatus::Closed) {
            continue;
        }
        let Some(resolved_at) = t.resolved_at else {
            continue;
        };
        let compliant = minutes_between(t.created_at, resolved_at)
            <= sla_threshold_minutes(t.priority) as f64;
        let bucket = match t.priority {
            TicketPriority::UrgentOnAir => &mut urgent,
            TicketPriority::Normal | TicketPriority::High => &mut standard,
        };
        bucket.0 += 1;
        if compliant {
            bucket.1 += 1;
        }
    }

    let rate = |(total, compliant): (i64, i64), class: &'static str| SlaClassRate {
        class,
        total,
        compliant,
        percent: if total == 0 {
            0.0
        } else {
            100.0 * compliant as f64 / total as f64
        },
    };
    vec![rate(urgent, "URGENT_ON_AIR"), rate(standard, "STANDARD")]
}

pub fn summarize(tickets: &[Ticket]) -> KpiSummary {
    let total_tickets = tickets.len() as i64;
    let open_tickets = tickets
        .iter()
        .filter(|t| {
            matches!(
                t.status,
                TicketStatus::Open | TicketStatus::InProgress | TicketStatus::Handover
            )
        })
        .count() as i64;

    let mtta: Vec<f64> = tickets
        .iter()
        .filter_map(|t| t.first_response_at.map(|fr| minutes_between(t.created_at, fr)))
        .collect();

    let resolved: Vec<&Ticket> = tickets
        .iter()
        .filter(|t| t.resolved_at.is_some())
        .collect();
    let mttr: Vec<f64> = resolved
        .iter()
        .filter_map(|t| t.resolved_at.map(|r| minutes_between(t.created_at, r)))
        .collect();

    let fcr_percent = if resolved.is_empty() {
        0.0
    } else {
        let first_contact = resolved.iter().filter(|t| !t.is_handover).count();
        100.0 * first_contact as f64 / resolved.len() as f64
    };

    KpiSummary {
        total_tickets,
        open_tickets,
        resolved_tickets: resolved.len() as i64,
        mtta_minutes: average(&mtta),
        mttr_minutes: average(&mttr),
        fcr_percent,
        sla: sla_class_rates(tickets),
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub created: i64,
    pub resolved: i64,
}

/// Created/resolved counts per calendar day in the reporting timezone,
/// inclusive of both endpoint days. Days without traffic appear as zeros.
pub fn daily_series(
    tickets: &[Ticket],
    from: NaiveDate,
    to: NaiveDate,
    tz: FixedOffset,
) -> Vec<DayBucket> {
    let mut buckets: Vec<DayBucket> = Vec::new();
    let mut day = from;
    while day <= to {
        buckets.push(DayBucket {
            date: day,
            created: 0,
            resolved: 0,
        });
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    let mut index: HashMap<NaiveDate, usize> = HashMap::new();
    for (i, b) in buckets.iter().enumerate() {
        index.insert(b.date, i);
    }

    for t in tickets {
        let created_day = t.created_at.with_timezone(&tz).date_naive();
        if let Some(&i) = index.get(&created_day) {
            buckets[i].created += 1;
        }
        if let Some(resolved_at) = t.resolved_at {
            let resolved_day = resolved_at.with_timezone(&tz).date_naive();
            if let Some(&i) = index.get(&resolved_day) {
                buckets[i].resolved += 1;
            }
        }
    }

    buckets
}

#[derive(Debug, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

pub fn category_breakdown(tickets: &[Ticket]) -> Vec<CategoryCount> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for t in tickets {
        *counts.entry(t.category.as_str()).or_insert(0) += 1;
    }
    let mut out: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount {
            category: category.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));
    out
}

#[derive(Debug, Serialize)]
pub struct StaffStat {
    pub user_id: Uuid,
    pub full_name: String,
    pub responded: i64,
    pub resolved: i64,
    pub mtta_minutes: Option<f64>,
    pub mttr_minutes: Option<f64>,
    /// Display forms; "N/A" for staff with no samples.
    pub mtta_display: String,
    pub mttr_display: String,
}

/// Per-staff response and resolution figures, attributed through the
/// activity log: the author of a ticket's first non-CREATED activity owns
/// the response, the author of its RESOLVE activity owns the resolution.
pub fn staff_stats(
    tickets: &[Ticket],
    activities: &[TicketActivity],
    staff: &[(Uuid, String)],
) -> Vec<StaffStat> {
    let by_id: HashMap<Uuid, &Ticket> = tickets.iter().map(|t| (t.id, t)).collect();

    let mut sorted: Vec<&TicketActivity> = activities
        .iter()
        .filter(|a| a.kind != ActivityKind::Created)
        .collect();
    sorted.sort_by_key(|a| a.created_at);

    let mut first_responder: HashMap<Uuid, &TicketActivity> = HashMap::new();
    let mut resolver: HashMap<Uuid, &TicketActivity> = HashMap::new();
    for act in sorted {
        first_responder.entry(act.ticket_id).or_insert(act);
        if act.kind == ActivityKind::Resolve {
            resolver.insert(act.ticket_id, act);
        }
    }

    let mut mtta: HashMap<Uuid, Vec<f64>> = HashMap::new();
    let mut mttr: HashMap<Uuid, Vec<f64>> = HashMap::new();
    for (ticket_id, act) in &first_responder {
        if let Some(ticket) = by_id.get(ticket_id) {
            mtta.entry(act.actor_id)
                .or_default()
                .push(minutes_between(ticket.created_at, act.created_at));
        }
    }
    for (ticket_id, act) in &resolver {
        if let Some(ticket) = by_id.get(ticket_id) {
            if let Some(resolved_at) = ticket.resolved_at {
                mttr.entry(act.actor_id)
                    .or_default()
                    .push(minutes_between(ticket.created_at, resolved_at));
            }
        }
    }

    staff
        .iter()
        .map(|(user_id, full_name)| {
            let response_samples = mtta.get(user_id).map(Vec::as_slice).unwrap_or(&[]);
            let resolve_samples = mttr.get(user_id).map(Vec::as_slice).unwrap_or(&[]);
            let mtta_minutes = average(response_samples);
            let mttr_minutes = average(resolve_samples);
            StaffStat {
                user_id: *user_id,
                full_name: full_name.clone(),
                responded: response_samples.len() as i64,
                resolved: resolve_samples.len() as i64,
                mtta_display: fmt_minutes(mtta_minutes),
                mttr_display: fmt_minutes(mttr_minutes),
                mtta_minutes,
                mttr_minutes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{Location, TicketPriority};
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn ticket(
        created: i64,
        first_response: Option<i64>,
        resolved: Option<i64>,
        priority: TicketPriority,
        handover: bool,
    ) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            ticket_number: 1,
            location: Location::Mcr,
            priority,
            category: "VIDEO".to_string(),
            subject: "s".to_string(),
            description: "d".to_string(),
            solution: resolved.map(|_| "fixed".to_string()),
            proof_image_url: None,
            requester_id: Uuid::new_v4(),
            status: if resolved.is_some() {
                TicketStatus::Resolved
            } else {
                TicketStatus::Open
            },
            created_at: at(created),
            first_response_at: first_response.map(at),
            resolved_at: resolved.map(at),
            closed_at: None,
            is_handover: handover,
            is_converted_to_article: false,
        }
    }

    fn activity(ticket_id: Uuid, actor_id: Uuid, kind: ActivityKind, minute: i64) -> TicketActivity {
        TicketActivity {
            id: Uuid::new_v4(),
            ticket_id,
            actor_id,
            kind,
            note: String::new(),
            previous_value: None,
            new_value: None,
            created_at: at(minute),
        }
    }

    #[test]
    fn summary_over_mixed_set() {
        let tickets = vec![
            ticket(0, Some(10), Some(30), TicketPriority::Normal, false),
            ticket(0, Some(5), Some(20), TicketPriority::UrgentOnAir, true),
            ticket(0, None, None, TicketPriority::Normal, false),
        ];
        let s = summarize(&tickets);
        assert_eq!(s.total_tickets, 3);
        assert_eq!(s.open_tickets, 1);
        assert_eq!(s.resolved_tickets, 2);
        assert_eq!(s.mtta_minutes, Some(7.5));
        assert_eq!(s.mttr_minutes, Some(25.0));
        // One of two resolved tickets skipped handover.
        assert_eq!(s.fcr_percent, 50.0);
        // Urgent at 20min misses the 15min bar; normal at 30min is inside 480.
        assert_eq!(s.sla[0].class, "URGENT_ON_AIR");
        assert_eq!((s.sla[0].total, s.sla[0].compliant), (1, 0));
        assert_eq!(s.sla[0].percent, 0.0);
        assert_eq!(s.sla[1].class, "STANDARD");
        assert_eq!((s.sla[1].total, s.sla[1].compliant), (1, 1));
        assert_eq!(s.sla[1].percent, 100.0);
    }

    #[test]
    fn summary_with_no_resolved_is_defined() {
        let tickets = vec![ticket(0, None, None, TicketPriority::Normal, false)];
        let s = summarize(&tickets);
        assert_eq!(s.mtta_minutes, None);
        assert_eq!(s.mttr_minutes, None);
        assert_eq!(s.fcr_percent, 0.0);
        assert_eq!(s.sla[0].percent, 0.0);
        assert_eq!(s.sla[1].percent, 0.0);
        assert_eq!(fmt_minutes(s.mttr_minutes), "N/A");
    }

    #[test]
    fn window_restriction_excludes_old_tickets_from_summary() {
        // Created well before the window, resolved inside it. The loaders
        // include it so its resolution lands in the series, but it must
        // not contribute to the summary or category totals.
        let mut old = ticket(0, Some(10), Some(120), TicketPriority::Normal, false);
        old.created_at = at(0) - Duration::days(60);
        let fresh = ticket(60, Some(70), Some(90), TicketPriority::Normal, false);

        let start = at(0);
        let end = at(24 * 60);
        let rows = vec![old.clone(), fresh.clone()];
        let windowed = created_in_window(&rows, start, end);
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].id, fresh.id);

        let s = summarize(&windowed);
        assert_eq!(s.total_tickets, 1);
        assert_eq!(s.mttr_minutes, Some(30.0));

        // Resolution day of the old ticket still counts in the series.
        let tz = FixedOffset::east_opt(0).unwrap();
        let day = at(0).date_naive();
        let series = daily_series(&rows, day, day.succ_opt().unwrap(), tz);
        assert_eq!(series[0].created + series[1].created, 1);
        assert_eq!(series[0].resolved + series[1].resolved, 2);
    }

    #[test]
    fn daily_series_buckets_in_report_tz() {
        // 23:30 UTC on June 1 is already June 2 at UTC+7.
        let t = Ticket {
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 23, 30, 0).unwrap(),
            ..ticket(0, None, None, TicketPriority::Normal, false)
        };
        let tz = FixedOffset::east_opt(7 * 3600).unwrap();
        let from = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let series = daily_series(&[t], from, to, tz);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].created, 0);
        assert_eq!(series[1].created, 1);
    }

    #[test]
    fn staff_attribution_through_activity_log() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let t = ticket(0, Some(10), Some(40), TicketPriority::Normal, true);
        let acts = vec![
            activity(t.id, alice, ActivityKind::Reply, 10),
            activity(t.id, alice, ActivityKind::Handover, 20),
            activity(t.id, bob, ActivityKind::Resolve, 40),
        ];
        let staff = vec![
            (alice, "Alice".to_string()),
            (bob, "Bob".to_string()),
            (Uuid::new_v4(), "Idle".to_string()),
        ];
        let stats = staff_stats(&[t], &acts, &staff);

        assert_eq!(stats[0].responded, 1);
        assert_eq!(stats[0].mtta_minutes, Some(10.0));
        assert_eq!(stats[0].resolved, 0);

        assert_eq!(stats[1].resolved, 1);
        assert_eq!(stats[1].mttr_minutes, Some(40.0));
        assert_eq!(stats[1].responded, 0);

        assert_eq!(stats[2].mtta_display, "N/A");
        assert_eq!(stats[2].mttr_display, "N/A");
    }

    #[test]
    fn category_breakdown_sorted_by_count() {
        let mut a = ticket(0, None, None, TicketPriority::Normal, false);
        a.category = "AUDIO".to_string();
        let b = ticket(0, None, None, TicketPriority::Normal, false);
        let c = ticket(0, None, None, TicketPriority::Normal, false);
        let out = category_breakdown(&[a, b, c]);
        assert_eq!(out[0].category, "VIDEO");
        assert_eq!(out[0].count, 2);
        assert_eq!(out[1].category, "AUDIO");
    }
}
