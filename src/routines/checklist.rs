//! Checklist state handling for routine instances. Template items are a
//! JSON array of labels; instance state is a JSON object mapping each
//! label to a done flag. Both are validated here so instances can never
//! drift from their template.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::shared::error::AppError;
use crate::shared::models::RoutineStatus;

/// Parses a template's item list. Empty lists and non-string entries are
/// rejected at template creation time.
pub fn items_from_template(value: &Value) -> Result<Vec<String>, AppError> {
    let arr = value
        .as_array()
        .ok_or_else(|| AppError::Validation("checklist items must be an array".to_string()))?;
    if arr.is_empty() {
        return Err(AppError::Validation(
            "checklist needs at least one item".to_string(),
        ));
    }
    let mut items = Vec::with_capacity(arr.len());
    for entry in arr {
        let label = entry
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::Validation("checklist items must be non-empty strings".to_string())
            })?;
        if items.iter().any(|existing| existing == label) {
            return Err(AppError::Validation(format!(
                "duplicate checklist item: {label}"
            )));
        }
        items.push(label.to_string());
    }
    Ok(items)
}

/// Fresh state for a new instance: every template item unchecked.
pub fn initial_state(items: &[String]) -> Value {
    let map: Map<String, Value> = items
        .iter()
        .map(|item| (item.clone(), Value::Bool(false)))
        .collect();
    Value::Object(map)
}

fn parse_state(state: &Value) -> Result<BTreeMap<String, bool>, AppError> {
    let obj = state
        .as_object()
        .ok_or_else(|| AppError::Database("corrupt checklist state".to_string()))?;
    obj.iter()
        .map(|(k, v)| {
            v.as_bool()
                .map(|b| (k.clone(), b))
                .ok_or_else(|| AppError::Database("corrupt checklist state".to_string()))
        })
        .collect()
}

pub struct ToggleOutcome {
    pub state: Value,
    pub all_done: bool,
}

/// Sets one item's flag. The item must exist in the template's list;
/// anything else is rejected rather than silently inserted.
pub fn toggle(
    state: &Value,
    template_items: &[String],
    item: &str,
    done: bool,
) -> Result<ToggleOutcome, AppError> {
    if !template_items.iter().any(|i| i == item) {
        return Err(AppError::Validation(format!(
            "unknown checklist item: {item}"
        )));
    }

    let mut map = parse_state(state)?;
    map.insert(item.to_string(), done);

    let all_done = template_items.iter().all(|i| map.get(i).copied().unwrap_or(false));
    let obj: Map<String, Value> = map.into_iter().map(|(k, v)| (k, Value::Bool(v))).collect();
    Ok(ToggleOutcome {
        state: Value::Object(obj),
        all_done,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub struct CompletionUpdate {
    pub status: RoutineStatus,
    /// True exactly when `completed_at` should be stamped now.
    pub stamp_completed: bool,
}

/// Next status and completion stamp after a toggle. Completion is
/// sticky: an instance that reached COMPLETED stays there, and the
/// completion time is stamped at most once, even if items are later
/// unchecked and re-checked.
pub fn completion_after_toggle(
    current: RoutineStatus,
    completed_at: Option<DateTime<Utc>>,
    all_done: bool,
) -> CompletionUpdate {
    if current == RoutineStatus::Completed {
        return CompletionUpdate {
            status: RoutineStatus::Completed,
            stamp_completed: false,
        };
    }
    if all_done {
        CompletionUpdate {
            status: RoutineStatus::Completed,
            stamp_completed: completed_at.is_none(),
        }
    } else {
        CompletionUpdate {
            status: RoutineStatus::Pending,
            stamp_completed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items() -> Vec<String> {
        vec!["Check mics".to_string(), "Check lights".to_string()]
    }

    #[test]
    fn template_items_parse_and_reject() {
        assert_eq!(
            items_from_template(&json!(["a", "b"])).unwrap(),
            vec!["a", "b"]
        );
        assert!(items_from_template(&json!([])).is_err());
        assert!(items_from_template(&json!(["a", 3])).is_err());
        assert!(items_from_template(&json!({"a": true})).is_err());
        assert!(items_from_template(&json!(["a", "a"])).is_err());
        assert!(items_from_template(&json!(["  "])).is_err());
    }

    #[test]
    fn initial_state_unchecked() {
        let state = initial_state(&items());
        assert_eq!(state, json!({"Check mics": false, "Check lights": false}));
    }

    #[test]
    fn toggle_known_item() {
        let state = initial_state(&items());
        let out = toggle(&state, &items(), "Check mics", true).unwrap();
        assert_eq!(out.state["Check mics"], json!(true));
        assert!(!out.all_done);

        let out = toggle(&out.state, &items(), "Check lights", true).unwrap();
        assert!(out.all_done);
    }

    #[test]
    fn toggle_back_off() {
        let state = json!({"Check mics": true, "Check lights": true});
        let out = toggle(&state, &items(), "Check mics", false).unwrap();
        assert!(!out.all_done);
        assert_eq!(out.state["Check mics"], json!(false));
    }

    #[test]
    fn unknown_item_rejected() {
        let state = initial_state(&items());
        assert!(toggle(&state, &items(), "Water plants", true).is_err());
    }

    #[test]
    fn completion_is_reached_exactly_once() {
        // Walking every item to true flips a PENDING instance to
        // COMPLETED with a single stamp.
        let update = completion_after_toggle(RoutineStatus::Pending, None, true);
        assert_eq!(update.status, RoutineStatus::Completed);
        assert!(update.stamp_completed);

        // A repeat of the same transition (concurrent toggler, retried
        // request) must not stamp again.
        let update =
            completion_after_toggle(RoutineStatus::Pending, Some(Utc::now()), true);
        assert_eq!(update.status, RoutineStatus::Completed);
        assert!(!update.stamp_completed);
    }

    #[test]
    fn unchecking_after_completion_keeps_status_and_stamp() {
        let update =
            completion_after_toggle(RoutineStatus::Completed, Some(Utc::now()), false);
        assert_eq!(update.status, RoutineStatus::Completed);
        assert!(!update.stamp_completed);

        // Re-checking the item changes nothing either.
        let update =
            completion_after_toggle(RoutineStatus::Completed, Some(Utc::now()), true);
        assert_eq!(update.status, RoutineStatus::Completed);
        assert!(!update.stamp_completed);
    }

    #[test]
    fn partial_checklist_stays_pending() {
        let update = completion_after_toggle(RoutineStatus::Pending, None, false);
        assert_eq!(update.status, RoutineStatus::Pending);
        assert!(!update.stamp_completed);
    }
}
