//! Action scheduling.
//!
//! Splits a fired rule's actions into inline executions and deferred
//! entries. Stored action order is preserved for the inline batch; a
//! delayed action's offset is measured from the firing time, not from
//! completion of earlier actions.

use chrono::{DateTime, Duration, Utc};

use vigil_core::{EscalationAction, EscalationRule};

/// When a planned action executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// Execute inline, within the current evaluation.
    Immediate,
    /// Persist to the deferred queue and execute at the given time.
    Deferred(DateTime<Utc>),
}

/// One action with its execution decision.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub action: EscalationAction,
    pub execution: Execution,
}

/// Plan every action of a fired rule at `now`.
pub fn plan(rule: &EscalationRule, now: DateTime<Utc>) -> Vec<PlannedAction> {
    rule.actions
        .iter()
        .map(|action| {
            let execution = match action.delay_seconds {
                None | Some(0) => Execution::Immediate,
                Some(delay) => Execution::Deferred(now + Duration::seconds(delay as i64)),
            };
            PlannedAction {
                action: action.clone(),
                execution,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{ActionTarget, Channel};

    fn notify(user: &str) -> EscalationAction {
        EscalationAction::notify(
            ActionTarget::User(user.into()),
            vec![Channel::Email],
            "incident_escalation",
        )
    }

    #[test]
    fn test_order_preserved() {
        let rule = EscalationRule::new("Ordered", 1)
            .with_action(notify("u-1"))
            .with_action(notify("u-2"))
            .with_action(notify("u-3"));

        let planned = plan(&rule, Utc::now());
        let targets: Vec<_> = planned.iter().map(|p| p.action.target.to_string()).collect();
        assert_eq!(targets, vec!["user:u-1", "user:u-2", "user:u-3"]);
        assert!(planned.iter().all(|p| p.execution == Execution::Immediate));
    }

    #[test]
    fn test_delayed_action_is_deferred() {
        let rule = EscalationRule::new("Mixed", 1)
            .with_action(notify("u-1"))
            .with_action(notify("u-2").with_delay(900));

        let now = Utc::now();
        let planned = plan(&rule, now);
        assert_eq!(planned[0].execution, Execution::Immediate);
        assert_eq!(
            planned[1].execution,
            Execution::Deferred(now + Duration::seconds(900))
        );
    }

    #[test]
    fn test_zero_delay_runs_inline() {
        let rule = EscalationRule::new("Zero", 1).with_action(notify("u-1").with_delay(0));
        let planned = plan(&rule, Utc::now());
        assert_eq!(planned[0].execution, Execution::Immediate);
    }
}
