//! C9 — the scoring kernel.
//!
//! Pure, deterministic, and independent of in-group entity ordering:
//! given a user's partition and the ground-truth partition, evaluate a
//! priority-ordered rule set and return the first match.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

pub type GroupLabel = String;
pub type EntityId = String;

/// `label -> set of entity ids`, already flattened (no wrapper arrays).
pub type Partition = BTreeMap<GroupLabel, BTreeSet<EntityId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleId {
    AllCorrect,
    TwoMisplaced,
    ThreeMisplaced,
    IranGroupCorrect,
    PerfectGroup,
    ThreeCorrect,
    NoMatch,
}

impl RuleId {
    pub fn score(self) -> i32 {
        match self {
            RuleId::AllCorrect => 100,
            RuleId::TwoMisplaced => 80,
            RuleId::ThreeMisplaced => 60,
            RuleId::IranGroupCorrect => 50,
            RuleId::PerfectGroup => 40,
            RuleId::ThreeCorrect => 20,
            RuleId::NoMatch => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "rule")]
pub enum ScoreDetails {
    AllCorrect {
        #[serde(rename = "perfectGroups")]
        perfect_groups: Vec<GroupLabel>,
        #[serde(rename = "correctTeams")]
        correct_teams: usize,
    },
    TwoMisplaced {
        misplaced: Vec<EntityId>,
    },
    ThreeMisplaced {
        misplaced: Vec<EntityId>,
    },
    IranGroupCorrect {
        #[serde(rename = "groupName")]
        group_name: GroupLabel,
        teams: Vec<EntityId>,
    },
    PerfectGroup {
        #[serde(rename = "groupName")]
        group_name: GroupLabel,
        teams: Vec<EntityId>,
    },
    ThreeCorrect {
        #[serde(rename = "groupName")]
        group_name: GroupLabel,
        teams: Vec<EntityId>,
    },
    NoMatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    #[serde(rename = "totalScore")]
    pub total_score: i32,
    pub rule: RuleId,
    pub details: ScoreDetails,
    /// Always present, regardless of which rule fired — legacy field
    /// preserved in the persisted `details` JSON.
    #[serde(rename = "correctGroups")]
    pub correct_groups: Vec<GroupLabel>,
}

/// Flatten a JSON-shaped `label -> [entity | [entity]]` mapping into a
/// `label -> set-of-entity-ids` partition. Tolerates the nested
/// single-element wrapper arrays documented as a pre-existing data-shape
/// artifact; does not validate group size.
pub fn flatten_payload(payload: &serde_json::Value) -> Partition {
    let mut partition = Partition::new();
    let Some(groups) = payload.as_object() else {
        return partition;
    };
    for (label, value) in groups {
        let mut ids = BTreeSet::new();
        if let Some(arr) = value.as_array() {
            for item in arr {
                flatten_entity(item, &mut ids);
            }
        }
        partition.insert(label.clone(), ids);
    }
    partition
}

fn flatten_entity(value: &serde_json::Value, out: &mut BTreeSet<EntityId>) {
    match value {
        serde_json::Value::String(s) => {
            out.insert(s.clone());
        }
        serde_json::Value::Number(n) => {
            out.insert(n.to_string());
        }
        serde_json::Value::Array(inner) => {
            for item in inner {
                flatten_entity(item, out);
            }
        }
        _ => {}
    }
}

/// Score `user` against `truth`. `designated_entity` and
/// `designated_entity_group` identify the entity rule 4 singles out
/// (default: the entity whose English name is "Iran", and the label of
/// its group in `truth`); when `designated_entity` is absent from
/// `user`, rule 4 simply never fires.
pub fn score(
    user: &Partition,
    truth: &Partition,
    designated_entity: Option<&str>,
) -> ScoreResult {
    let misplaced = misplaced_entities(user, truth);
    let correct_groups = perfect_group_labels(user, truth);

    let rule = if misplaced.is_empty() {
        RuleId::AllCorrect
    } else if misplaced.len() == 2 {
        RuleId::TwoMisplaced
    } else if misplaced.len() == 3 {
        RuleId::ThreeMisplaced
    } else if designated_entity
        .map(|entity| designated_group_correct(user, truth, entity))
        .unwrap_or(false)
    {
        RuleId::IranGroupCorrect
    } else if !correct_groups.is_empty() {
        RuleId::PerfectGroup
    } else if three_correct_group(user, truth).is_some() {
        RuleId::ThreeCorrect
    } else {
        RuleId::NoMatch
    };

    let details = match rule {
        RuleId::AllCorrect => ScoreDetails::AllCorrect {
            perfect_groups: correct_groups.clone(),
            correct_teams: total_entities(truth),
        },
        RuleId::TwoMisplaced => ScoreDetails::TwoMisplaced {
            misplaced: misplaced.iter().cloned().collect(),
        },
        RuleId::ThreeMisplaced => ScoreDetails::ThreeMisplaced {
            misplaced: misplaced.iter().cloned().collect(),
        },
        RuleId::IranGroupCorrect => {
            let entity = designated_entity.unwrap_or_default();
            let label = group_label_for_entity(user, entity).unwrap_or_default();
            ScoreDetails::IranGroupCorrect {
                teams: user.get(&label).cloned().unwrap_or_default().into_iter().collect(),
                group_name: label,
            }
        }
        RuleId::PerfectGroup => {
            let label = correct_groups.first().cloned().unwrap_or_default();
            ScoreDetails::PerfectGroup {
                teams: user.get(&label).cloned().unwrap_or_default().into_iter().collect(),
                group_name: label,
            }
        }
        RuleId::ThreeCorrect => {
            let label = three_correct_group(user, truth).unwrap_or_default();
            ScoreDetails::ThreeCorrect {
                teams: user.get(&label).cloned().unwrap_or_default().into_iter().collect(),
                group_name: label,
            }
        }
        RuleId::NoMatch => ScoreDetails::NoMatch,
    };

    ScoreResult {
        total_score: rule.score(),
        rule,
        details,
        correct_groups,
    }
}

fn total_entities(truth: &Partition) -> usize {
    truth.values().map(|s| s.len()).sum()
}

/// Sum over group labels of `|user[g] \ truth[g]|`.
fn misplaced_entities(user: &Partition, truth: &Partition) -> BTreeSet<EntityId> {
    let mut out = BTreeSet::new();
    for (label, user_ids) in user {
        let truth_ids = truth.get(label).cloned().unwrap_or_default();
        out.extend(user_ids.difference(&truth_ids).cloned());
    }
    out
}

fn perfect_group_labels(user: &Partition, truth: &Partition) -> Vec<GroupLabel> {
    truth
        .keys()
        .filter(|label| user.get(*label) == truth.get(*label))
        .cloned()
        .collect()
}

fn group_label_for_entity(user: &Partition, entity: &str) -> Option<GroupLabel> {
    user.iter()
        .find(|(_, ids)| ids.contains(entity))
        .map(|(label, _)| label.clone())
}

fn designated_group_correct(user: &Partition, truth: &Partition, entity: &str) -> bool {
    let Some(user_label) = group_label_for_entity(user, entity) else {
        return false;
    };
    let Some(truth_label) = group_label_for_entity(truth, entity) else {
        return false;
    };
    if user_label != truth_label {
        return false;
    }
    user.get(&user_label) == truth.get(&truth_label)
}

fn three_correct_group(user: &Partition, truth: &Partition) -> Option<GroupLabel> {
    truth.keys().find_map(|label| {
        let truth_ids = truth.get(label)?;
        let user_ids = user.get(label)?;
        if user_ids.intersection(truth_ids).count() == 3 {
            Some(label.clone())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth_partition() -> Partition {
        let labels = "ABCDEFGHIJKL";
        let mut truth = Partition::new();
        for (i, label) in labels.chars().enumerate() {
            let base = i * 4 + 1;
            let ids: BTreeSet<EntityId> = (base..base + 4).map(|n| n.to_string()).collect();
            truth.insert(label.to_string(), ids);
        }
        truth
    }

    #[test]
    fn perfect_submission_scores_100() {
        let truth = truth_partition();
        let result = score(&truth, &truth, Some("17"));
        assert_eq!(result.total_score, 100);
        assert!(matches!(result.rule, RuleId::AllCorrect));
    }

    #[test]
    fn two_swap_scores_80() {
        let truth = truth_partition();
        let mut user = truth.clone();
        let a = user.get_mut("A").unwrap();
        a.remove("1");
        a.insert("5".to_string());
        let b = user.get_mut("B").unwrap();
        b.remove("5");
        b.insert("1".to_string());

        let result = score(&user, &truth, Some("17"));
        assert_eq!(result.total_score, 80);
        assert!(matches!(result.rule, RuleId::TwoMisplaced));
        if let ScoreDetails::TwoMisplaced { misplaced } = &result.details {
            let mut m = misplaced.clone();
            m.sort();
            assert_eq!(m, vec!["1".to_string(), "5".to_string()]);
        } else {
            panic!("expected TwoMisplaced details");
        }
    }

    #[test]
    fn three_cycle_scores_60() {
        let truth = truth_partition();
        let mut user = truth.clone();
        // 1 -> B, 5 -> C, 9 -> A
        user.get_mut("A").unwrap().remove("1");
        user.get_mut("B").unwrap().insert("1".to_string());
        user.get_mut("B").unwrap().remove("5");
        user.get_mut("C").unwrap().insert("5".to_string());
        user.get_mut("C").unwrap().remove("9");
        user.get_mut("A").unwrap().insert("9".to_string());

        let result = score(&user, &truth, Some("17"));
        assert_eq!(result.total_score, 60);
        assert!(matches!(result.rule, RuleId::ThreeMisplaced));
    }

    /// Cyclic shift by one: `out[i] = labels[(i+1) % n]`. Reassigning
    /// `user[labels[i]] = truth[out[i]]` swaps every label's content with
    /// a *different* truth group's entities — a derangement, so no label
    /// coincidentally keeps its own content and no two groups share
    /// entities (the backing truth sets are pairwise disjoint).
    fn cyclic_rotate(labels: &[GroupLabel]) -> Vec<GroupLabel> {
        let n = labels.len();
        (0..n).map(|i| labels[(i + 1) % n].clone()).collect()
    }

    #[test]
    fn designated_group_only_correct_scores_50() {
        let truth = truth_partition();
        let all_labels: Vec<GroupLabel> = truth.keys().cloned().collect();
        let designated_label = "E".to_string();
        // Every other group is rotated onto a different truth group's
        // entities (never emptied — spec §8 #4 says "rotated", and an
        // emptied submission has zero misplaced entities, which wrongly
        // selects ALL_CORRECT ahead of this rule).
        let rest: Vec<GroupLabel> = all_labels
            .iter()
            .filter(|l| **l != designated_label)
            .cloned()
            .collect();
        let rotated = cyclic_rotate(&rest);

        let mut user = Partition::new();
        user.insert(designated_label.clone(), truth.get(&designated_label).unwrap().clone());
        for (label, source) in rest.iter().zip(rotated.iter()) {
            user.insert(label.clone(), truth.get(source).unwrap().clone());
        }

        let result = score(&user, &truth, Some("17"));
        assert_eq!(result.total_score, 50);
        assert!(matches!(result.rule, RuleId::IranGroupCorrect));
    }

    #[test]
    fn one_perfect_non_designated_group_scores_40() {
        let truth = truth_partition();
        let all_labels: Vec<GroupLabel> = truth.keys().cloned().collect();
        let perfect_label = "A".to_string();
        // Every label besides A is rotated onto a different truth group's
        // entities, so A is the sole perfect group and the designated
        // entity ("17", truth group E) ends up under some other label
        // than E — ruling out IRAN_GROUP_CORRECT so PERFECT_GROUP wins.
        let rest: Vec<GroupLabel> = all_labels
            .iter()
            .filter(|l| **l != perfect_label)
            .cloned()
            .collect();
        let rotated = cyclic_rotate(&rest);

        let mut user = Partition::new();
        user.insert(perfect_label.clone(), truth.get(&perfect_label).unwrap().clone());
        for (label, source) in rest.iter().zip(rotated.iter()) {
            user.insert(label.clone(), truth.get(source).unwrap().clone());
        }

        let result = score(&user, &truth, Some("17"));
        assert_eq!(result.total_score, 40);
        assert!(matches!(result.rule, RuleId::PerfectGroup));
        if let ScoreDetails::PerfectGroup { group_name, .. } = &result.details {
            assert_eq!(group_name, "A");
        } else {
            panic!("expected PerfectGroup details");
        }
    }

    #[test]
    fn three_of_four_in_one_group_scores_20() {
        let truth = truth_partition();
        let mut user = Partition::new();
        for label in truth.keys() {
            if label == "A" {
                let ids: BTreeSet<EntityId> =
                    ["1", "2", "3", "5"].iter().map(|s| s.to_string()).collect();
                user.insert(label.clone(), ids);
            } else {
                user.insert(label.clone(), BTreeSet::new());
            }
        }

        let result = score(&user, &truth, Some("17"));
        assert_eq!(result.total_score, 20);
        assert!(matches!(result.rule, RuleId::ThreeCorrect));
    }

    #[test]
    fn fully_scrambled_submission_scores_0() {
        // An all-empty submission has zero misplaced entities by the
        // literal `misplaced` metric (nothing present to be out of
        // place), which selects ALL_CORRECT, not NO_MATCH — so NO_MATCH
        // needs a submission that actually places every entity, just
        // never in its own truth group: a full cyclic rotation of every
        // label's content onto a different truth group's entities.
        let truth = truth_partition();
        let all_labels: Vec<GroupLabel> = truth.keys().cloned().collect();
        let rotated = cyclic_rotate(&all_labels);

        let mut user = Partition::new();
        for (label, source) in all_labels.iter().zip(rotated.iter()) {
            user.insert(label.clone(), truth.get(source).unwrap().clone());
        }

        let result = score(&user, &truth, Some("17"));
        assert_eq!(result.total_score, 0);
        assert!(matches!(result.rule, RuleId::NoMatch));
    }

    #[test]
    fn flattens_nested_wrapper_arrays() {
        let payload = serde_json::json!({
            "A": [["1"], ["2"], ["3"], ["4"]],
            "B": ["5", "6", "7", "8"],
        });
        let partition = flatten_payload(&payload);
        assert_eq!(
            partition.get("A").unwrap(),
            &["1", "2", "3", "4"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn score_is_independent_of_in_group_ordering() {
        // Sets, not sequences — flatten_payload already discards order via BTreeSet.
        let p1 = flatten_payload(&serde_json::json!({"A": ["1", "2", "3", "4"]}));
        let p2 = flatten_payload(&serde_json::json!({"A": ["4", "3", "2", "1"]}));
        assert_eq!(p1, p2);
    }

    #[test]
    fn rule_priority_picks_first_match_all_correct_over_perfect_group() {
        // A fully-correct submission also trivially satisfies "some group perfect"
        // and "some group has >=3 correct"; ALL_CORRECT must win.
        let truth = truth_partition();
        let result = score(&truth, &truth, None);
        assert!(matches!(result.rule, RuleId::AllCorrect));
        assert_eq!(result.total_score, 100);
    }
}
