//! Stale-handle reconciliation scoring
//!
//! The remote side's identity scheme is not stable across two dumps, so
//! "sameness" is re-derived from observable attributes. Scoring is tiered:
//! automation-id and automation-name properties are the strongest signals,
//! a plain name is weaker, a window title weaker still, and the caller's
//! last-used predicate is the final fallback. Matching size-class
//! properties boost a candidate within its tier but can never promote it
//! past a better-named one.

use crate::protocol::RemoteNode;

use super::Predicate;

const AUTOMATION_ID_PROPS: [&str; 2] = ["AutomationId", "AutomationProperties.AutomationId"];
const AUTOMATION_NAME_PROPS: [&str; 2] = ["AutomationName", "AutomationProperties.Name"];
const NAME_PROP: &str = "Name";
const TITLE_PROP: &str = "Title";
const SIZE_PROPS: [&str; 2] = ["Width", "Height"];

// Tier values are spaced so the maximum size boost (one point per size
// property) cannot cross tiers.
const TIER_AUTOMATION: u32 = 40;
const TIER_NAME: u32 = 30;
const TIER_TITLE: u32 = 20;
const TIER_PREDICATE: u32 = 10;

/// Score a candidate as a replacement for a stale snapshot.
///
/// `None` means the candidate is not a plausible replacement at all.
pub fn score(
    stale: &RemoteNode,
    predicate: Option<&Predicate>,
    candidate: &RemoteNode,
) -> Option<u32> {
    let tier = if any_string_prop_matches(stale, candidate, &AUTOMATION_ID_PROPS)
        || any_string_prop_matches(stale, candidate, &AUTOMATION_NAME_PROPS)
    {
        TIER_AUTOMATION
    } else if string_prop_matches(stale, candidate, NAME_PROP) {
        TIER_NAME
    } else if string_prop_matches(stale, candidate, TITLE_PROP) {
        TIER_TITLE
    } else if predicate.is_some_and(|p| p(candidate)) {
        TIER_PREDICATE
    } else {
        return None;
    };

    // Same-shaped candidates win among same-named ones.
    let boost = SIZE_PROPS
        .iter()
        .filter(|p| prop_matches(stale, candidate, p))
        .count() as u32;

    Some(tier + boost)
}

/// The best-scoring candidate's id, ties broken by smallest id so the
/// outcome is deterministic across runs
pub fn best_candidate<'a>(
    stale: &RemoteNode,
    predicate: Option<&Predicate>,
    candidates: impl Iterator<Item = &'a RemoteNode>,
) -> Option<u64> {
    candidates
        .filter_map(|c| score(stale, predicate, c).map(|s| (s, c.target_id)))
        .max_by(|(sa, ida), (sb, idb)| sa.cmp(sb).then_with(|| idb.cmp(ida)))
        .map(|(_, id)| id)
}

fn string_prop_matches(stale: &RemoteNode, candidate: &RemoteNode, prop: &str) -> bool {
    match (stale.property_str(prop), candidate.property_str(prop)) {
        (Some(a), Some(b)) => !a.is_empty() && a == b,
        _ => false,
    }
}

fn any_string_prop_matches(stale: &RemoteNode, candidate: &RemoteNode, props: &[&str]) -> bool {
    props.iter().any(|p| string_prop_matches(stale, candidate, p))
}

fn prop_matches(stale: &RemoteNode, candidate: &RemoteNode, prop: &str) -> bool {
    match (stale.property(prop), candidate.property(prop)) {
        (Some(a), Some(b)) => !a.is_null() && a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WrappedValue;
    use serde_json::json;
    use std::sync::Arc;

    fn node(id: u64, props: &[(&str, serde_json::Value)]) -> RemoteNode {
        RemoteNode {
            target_id: id,
            type_name: "widgets.Button".into(),
            parent_id: None,
            child_ids: vec![],
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), WrappedValue::wrap("", v.clone())))
                .collect(),
        }
    }

    #[test]
    fn automation_id_outranks_name_and_title() {
        let stale = node(
            1,
            &[
                ("AutomationId", json!("submit")),
                ("Name", json!("button")),
                ("Title", json!("Send")),
            ],
        );
        let by_automation = node(10, &[("AutomationId", json!("submit"))]);
        let by_name = node(11, &[("Name", json!("button"))]);
        let by_title = node(12, &[("Title", json!("Send"))]);

        let winner =
            best_candidate(&stale, None, [&by_name, &by_title, &by_automation].into_iter());
        assert_eq!(winner, Some(10));
    }

    #[test]
    fn size_boost_breaks_a_title_tie() {
        let stale = node(
            1,
            &[("Title", json!("Send")), ("Width", json!(80)), ("Height", json!(24))],
        );
        let same_title = node(10, &[("Title", json!("Send")), ("Width", json!(300))]);
        let same_title_same_shape = node(
            11,
            &[("Title", json!("Send")), ("Width", json!(80)), ("Height", json!(24))],
        );

        let winner = best_candidate(&stale, None, [&same_title, &same_title_same_shape].into_iter());
        assert_eq!(winner, Some(11));
    }

    #[test]
    fn size_boost_never_promotes_past_a_better_tier() {
        let stale = node(
            1,
            &[
                ("Name", json!("grid")),
                ("Title", json!("Main")),
                ("Width", json!(80)),
                ("Height", json!(24)),
            ],
        );
        let by_name = node(10, &[("Name", json!("grid"))]);
        let by_title_same_shape = node(
            11,
            &[("Title", json!("Main")), ("Width", json!(80)), ("Height", json!(24))],
        );

        let winner = best_candidate(&stale, None, [&by_title_same_shape, &by_name].into_iter());
        assert_eq!(winner, Some(10));
    }

    #[test]
    fn ties_break_toward_the_smallest_id() {
        let stale = node(1, &[("Name", json!("row"))]);
        let a = node(42, &[("Name", json!("row"))]);
        let b = node(7, &[("Name", json!("row"))]);
        assert_eq!(best_candidate(&stale, None, [&a, &b].into_iter()), Some(7));
    }

    #[test]
    fn empty_strings_never_match() {
        let stale = node(1, &[("Name", json!(""))]);
        let candidate = node(2, &[("Name", json!(""))]);
        assert_eq!(best_candidate(&stale, None, [&candidate].into_iter()), None);
    }

    #[test]
    fn predicate_is_the_last_resort() {
        let stale = node(1, &[]);
        let candidate = node(2, &[("Role", json!("row"))]);
        let pred: Predicate = Arc::new(|n| n.property_str("Role") == Some("row"));
        assert_eq!(best_candidate(&stale, None, [&candidate].into_iter()), None);
        assert_eq!(
            best_candidate(&stale, Some(&pred), [&candidate].into_iter()),
            Some(2)
        );
    }
}
