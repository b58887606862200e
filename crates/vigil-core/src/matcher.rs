//! Pure rule matching.
//!
//! Matching takes an incident snapshot and a rule set and returns the rules
//! that apply, ordered by priority. It performs no I/O, which keeps the
//! whole condition surface unit-testable without a database.

use chrono::{DateTime, Duration, Utc};

use crate::incident::IncidentSnapshot;
use crate::rule::{EscalationRule, RuleId};

/// A rule rejected during matching because it is structurally invalid.
///
/// Invalid rules are surfaced instead of silently skipped so a
/// misconfigured policy shows up immediately rather than never firing.
#[derive(Debug, Clone)]
pub struct InvalidRule {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub error: String,
}

/// Result of matching one incident against a rule set.
#[derive(Debug, Default)]
pub struct MatchOutcome<'a> {
    /// Matching rules ordered by priority ascending, ties broken by rule id.
    pub matched: Vec<&'a EscalationRule>,
    /// Structurally invalid rules encountered during evaluation.
    pub invalid: Vec<InvalidRule>,
}

impl MatchOutcome<'_> {
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

/// Match an incident against the active rule set at `now`.
///
/// A rule matches when every non-empty trigger set contains the incident's
/// value for that dimension (empty sets are wildcards) and, for duration
/// rules, enough time has elapsed since the anchor timestamp.
pub fn match_rules<'a>(
    incident: &IncidentSnapshot,
    rules: &'a [EscalationRule],
    now: DateTime<Utc>,
) -> MatchOutcome<'a> {
    let mut outcome = MatchOutcome::default();

    for rule in rules {
        if !rule.is_active {
            continue;
        }

        // Malformed rules are reported even when they would not have
        // matched, so admins see the problem right away.
        if let Err(e) = rule.validate() {
            outcome.invalid.push(InvalidRule {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                error: e.to_string(),
            });
            continue;
        }

        if !set_matches(&rule.trigger_severities, &incident.severity)
            || !set_matches(&rule.trigger_statuses, &incident.status)
            || !set_matches(&rule.trigger_departments, &incident.department)
            || !set_matches(&rule.trigger_locations, &incident.location)
        {
            continue;
        }

        if let Some(threshold) = rule.trigger_after_seconds {
            let anchor = incident.anchor(rule.anchors_on_last_escalation());
            if now - anchor < Duration::seconds(threshold as i64) {
                continue;
            }
        }

        outcome.matched.push(rule);
    }

    outcome
        .matched
        .sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    outcome
}

fn set_matches(set: &std::collections::BTreeSet<String>, value: &str) -> bool {
    set.is_empty() || set.contains(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{ActionTarget, Channel, EscalationAction};

    fn notify_action() -> EscalationAction {
        EscalationAction::notify(
            ActionTarget::Role("safety_manager".into()),
            vec![Channel::Email],
            "incident_escalation",
        )
    }

    fn incident() -> IncidentSnapshot {
        IncidentSnapshot::new("critical", "open", "operations", "plant-a")
    }

    #[test]
    fn test_wildcard_sets_match_anything() {
        let rule = EscalationRule::new("Catch all", 1).with_action(notify_action());
        let rules = vec![rule];

        let outcome = match_rules(&incident(), &rules, Utc::now());
        assert_eq!(outcome.matched.len(), 1);
        assert!(outcome.invalid.is_empty());
    }

    #[test]
    fn test_scenario_a_severity_match_ignores_other_dimensions() {
        // R1: Priority=1, TriggerSeverities={critical}, no duration.
        let r1 = EscalationRule::new("R1", 1)
            .with_severities(["critical"])
            .with_action(notify_action());
        let rules = vec![r1];

        let outcome = match_rules(&incident(), &rules, Utc::now());
        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.matched[0].name, "R1");
    }

    #[test]
    fn test_non_matching_severity_excluded() {
        let rule = EscalationRule::new("Low only", 1)
            .with_severities(["low"])
            .with_action(notify_action());
        let rules = vec![rule];

        let outcome = match_rules(&incident(), &rules, Utc::now());
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_inactive_rule_never_matches() {
        let rule = EscalationRule::new("Disabled", 1)
            .with_action(notify_action())
            .disabled();
        let rules = vec![rule];

        let outcome = match_rules(&incident(), &rules, Utc::now());
        assert!(outcome.is_empty());
        assert!(outcome.invalid.is_empty());
    }

    #[test]
    fn test_scenario_b_duration_threshold() {
        // R2 fires only after two hours.
        let r2 = EscalationRule::new("R2", 1)
            .with_trigger_after(2 * 3600)
            .with_action(notify_action());
        let rules = vec![r2];

        let now = Utc::now();
        let one_hour_old = incident().with_reported_at(now - Duration::hours(1));
        assert!(match_rules(&one_hour_old, &rules, now).is_empty());

        let three_hours_old = incident().with_reported_at(now - Duration::hours(3));
        assert_eq!(match_rules(&three_hours_old, &rules, now).matched.len(), 1);
    }

    #[test]
    fn test_repeat_rule_anchors_on_last_escalation() {
        let rule = EscalationRule::new("Repeat", 1)
            .with_trigger_after(3600)
            .with_repeat_interval(3600)
            .with_action(notify_action());
        let rules = vec![rule];

        let now = Utc::now();
        // Reported long ago but escalated ten minutes ago: not yet due.
        let recently_escalated = incident()
            .with_reported_at(now - Duration::hours(10))
            .with_last_escalated_at(now - Duration::minutes(10));
        assert!(match_rules(&recently_escalated, &rules, now).is_empty());

        // Escalated two hours ago: due again.
        let stale = incident()
            .with_reported_at(now - Duration::hours(10))
            .with_last_escalated_at(now - Duration::hours(2));
        assert_eq!(match_rules(&stale, &rules, now).matched.len(), 1);
    }

    #[test]
    fn test_output_ordered_by_priority_then_id() {
        let mut high = EscalationRule::new("High", 5).with_action(notify_action());
        let mut low_a = EscalationRule::new("LowA", 1).with_action(notify_action());
        let mut low_b = EscalationRule::new("LowB", 1).with_action(notify_action());

        // Force a known id order for the tie-break.
        low_a.id = RuleId(uuid::Uuid::from_u128(1));
        low_b.id = RuleId(uuid::Uuid::from_u128(2));
        high.id = RuleId(uuid::Uuid::from_u128(3));

        let rules = vec![high, low_b, low_a];
        let outcome = match_rules(&incident(), &rules, Utc::now());

        let names: Vec<_> = outcome.matched.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["LowA", "LowB", "High"]);
    }

    #[test]
    fn test_deterministic_across_repeated_calls() {
        let rules: Vec<_> = (0..8)
            .map(|i| EscalationRule::new(format!("R{i}"), (i % 3) as i32).with_action(notify_action()))
            .collect();

        let now = Utc::now();
        let snapshot = incident();
        let first: Vec<_> = match_rules(&snapshot, &rules, now)
            .matched
            .iter()
            .map(|r| r.id)
            .collect();
        for _ in 0..5 {
            let again: Vec<_> = match_rules(&snapshot, &rules, now)
                .matched
                .iter()
                .map(|r| r.id)
                .collect();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_malformed_rule_surfaces_as_invalid() {
        let mut bad = EscalationRule::new("Bad", 1).with_action(notify_action());
        bad.actions[0].channels.clear();
        let good = EscalationRule::new("Good", 2).with_action(notify_action());
        let rules = vec![bad, good];

        let outcome = match_rules(&incident(), &rules, Utc::now());
        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.matched[0].name, "Good");
        assert_eq!(outcome.invalid.len(), 1);
        assert_eq!(outcome.invalid[0].rule_name, "Bad");
        assert!(outcome.invalid[0].error.contains("no channels"));
    }
}
