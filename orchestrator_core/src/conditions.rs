//! Condition management on a [`ClusterStatus`].
//!
//! Conditions are unique per type. Re-setting a condition with the same
//! status, reason, severity and message keeps its transition time; any change
//! refreshes it. After every mutation the set is sorted with `ClusterReady`
//! first and the remaining types in lexicographic order.

use std::cmp::Ordering;

use chrono::Utc;
use cluster_shared_types::{Condition, ConditionStatus, ConditionType, ClusterStatus, Severity};

/// Mutations of the condition set.
pub trait Conditions {
    fn mark_true(&mut self, condition_type: ConditionType);

    fn mark_false(
        &mut self,
        condition_type: ConditionType,
        reason: &str,
        severity: Severity,
        message: &str,
    );

    fn mark_unknown(&mut self, condition_type: ConditionType, reason: &str, message: &str);

    fn delete_condition(&mut self, condition_type: ConditionType);

    fn delete_all_conditions(&mut self);
}

impl Conditions for ClusterStatus {
    fn mark_true(&mut self, condition_type: ConditionType) {
        set(
            self,
            condition_type,
            ConditionStatus::True,
            "",
            Severity::None,
            "",
        );
    }

    fn mark_false(
        &mut self,
        condition_type: ConditionType,
        reason: &str,
        severity: Severity,
        message: &str,
    ) {
        set(
            self,
            condition_type,
            ConditionStatus::False,
            reason,
            severity,
            message,
        );
    }

    fn mark_unknown(&mut self, condition_type: ConditionType, reason: &str, message: &str) {
        set(
            self,
            condition_type,
            ConditionStatus::Unknown,
            reason,
            Severity::None,
            message,
        );
    }

    fn delete_condition(&mut self, condition_type: ConditionType) {
        self.conditions
            .retain(|c| c.condition_type != condition_type);
    }

    fn delete_all_conditions(&mut self) {
        self.conditions.clear();
    }
}

fn set(
    status: &mut ClusterStatus,
    condition_type: ConditionType,
    condition_status: ConditionStatus,
    reason: &str,
    severity: Severity,
    message: &str,
) {
    let mut condition = Condition {
        condition_type,
        status: condition_status,
        reason: reason.to_string(),
        severity,
        message: message.to_string(),
        last_transition_time: Utc::now(),
    };

    match status
        .conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(existing) => {
            if has_same_state(existing, &condition) {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => status.conditions.push(condition),
    }

    status.conditions.sort_by(display_order);
}

fn has_same_state(a: &Condition, b: &Condition) -> bool {
    a.status == b.status && a.reason == b.reason && a.severity == b.severity && a.message == b.message
}

fn display_order(a: &Condition, b: &Condition) -> Ordering {
    let ready = ConditionType::ClusterReady;
    match (a.condition_type == ready, b.condition_type == ready) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.condition_type.as_str().cmp(b.condition_type.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn empty_status() -> ClusterStatus {
        let mut status = ClusterStatus::default();
        status.delete_all_conditions();
        status
    }

    #[test]
    fn test_mark_true_adds_condition() {
        let mut status = empty_status();
        status.mark_true(ConditionType::NodeReady);

        let condition = status.condition(ConditionType::NodeReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.severity, Severity::None);
        assert!(condition.reason.is_empty());
    }

    #[test]
    fn test_identical_state_keeps_transition_time() {
        let mut status = empty_status();
        status.mark_false(
            ConditionType::NodeReady,
            "Node is not in ready state",
            Severity::Error,
            "Node is not in ready status",
        );
        let earlier = Utc::now() - Duration::hours(1);
        status.conditions[0].last_transition_time = earlier;

        status.mark_false(
            ConditionType::NodeReady,
            "Node is not in ready state",
            Severity::Error,
            "Node is not in ready status",
        );
        assert_eq!(status.conditions[0].last_transition_time, earlier);
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_any_changed_field_refreshes_transition_time() {
        let earlier = Utc::now() - Duration::hours(1);
        let base = |status: &mut ClusterStatus| {
            status.mark_false(ConditionType::UpgradeSuccess, "r", Severity::Warning, "m");
            status.conditions[0].last_transition_time = earlier;
        };

        let mut status = empty_status();
        base(&mut status);
        status.mark_false(ConditionType::UpgradeSuccess, "other", Severity::Warning, "m");
        assert!(status.conditions[0].last_transition_time > earlier);

        let mut status = empty_status();
        base(&mut status);
        status.mark_false(ConditionType::UpgradeSuccess, "r", Severity::Error, "m");
        assert!(status.conditions[0].last_transition_time > earlier);

        let mut status = empty_status();
        base(&mut status);
        status.mark_false(ConditionType::UpgradeSuccess, "r", Severity::Warning, "other");
        assert!(status.conditions[0].last_transition_time > earlier);

        let mut status = empty_status();
        base(&mut status);
        status.mark_true(ConditionType::UpgradeSuccess);
        assert!(status.conditions[0].last_transition_time > earlier);
    }

    #[test]
    fn test_cluster_ready_sorts_first() {
        let mut status = empty_status();
        status.mark_true(ConditionType::PackageReady);
        status.mark_true(ConditionType::NodeReady);
        status.mark_unknown(ConditionType::ClusterReady, "probing", "");
        status.mark_true(ConditionType::ControlPlaneReady);

        let order: Vec<&str> = status
            .conditions
            .iter()
            .map(|c| c.condition_type.as_str())
            .collect();
        assert_eq!(
            order,
            vec!["ClusterReady", "ControlPlaneReady", "NodeReady", "PackageReady"]
        );
    }

    #[test]
    fn test_delete() {
        let mut status = ClusterStatus::default();
        status.delete_condition(ConditionType::NodeReady);
        assert!(status.condition(ConditionType::NodeReady).is_none());
        assert_eq!(status.conditions.len(), 2);

        status.delete_all_conditions();
        assert!(status.conditions.is_empty());
    }
}
