//! Follow-up detection and parameter inheritance.
//!
//! Precedence: values stated in the current turn, then values inherited from
//! the thread, then template defaults (applied later by the plan builder).

use crate::plan::ResolvedParams;
use crate::ups::schema::IntentType;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// Utterances this short are treated as refinements of the previous turn.
pub const SHORT_UTTERANCE_TOKENS: usize = 6;

lazy_static! {
    static ref REFINEMENT: Regex = Regex::new(
        r"(?i)\b(exclud\w*|without|except|remove|drop|only|just|includ\w*|add|also|same period|drill (?:into|down)|instead|now|what about|how about)\b"
    )
    .unwrap();
    static ref REPLACING: Regex =
        Regex::new(r"(?i)\b(only|just|instead|now|drill (?:into|down)|switch to)\b").unwrap();
    static ref SAME_PERIOD: Regex = Regex::new(r"(?i)\bsame (?:period|time ?frame|dates|range|month)\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FollowUp {
    pub detected: bool,
    /// Stated values replace the inherited ones for the same field instead
    /// of joining them.
    pub replace: bool,
    pub same_period: bool,
}

pub fn detect(utterance: &str, current: IntentType, previous: Option<IntentType>) -> FollowUp {
    let Some(previous) = previous else {
        return FollowUp::default();
    };
    let tokens = utterance.split_whitespace().count();
    let refinement = REFINEMENT.is_match(utterance);
    let short_same_topic = tokens <= SHORT_UTTERANCE_TOKENS
        && (current == previous || current == IntentType::GeneralInquiry);
    FollowUp {
        detected: refinement || short_same_topic,
        replace: REPLACING.is_match(utterance),
        same_period: SAME_PERIOD.is_match(utterance),
    }
}

/// Merge the current turn over the inherited parameters. Without a detected
/// follow-up the current turn stands alone.
pub fn merge(inherited: &ResolvedParams, current: &ResolvedParams, follow_up: FollowUp) -> ResolvedParams {
    if !follow_up.detected {
        return current.clone();
    }

    let intent_type = if current.intent_type == IntentType::GeneralInquiry {
        inherited.intent_type
    } else {
        current.intent_type
    };

    let time_range = if follow_up.same_period {
        inherited.time_range.or(current.time_range)
    } else {
        current.time_range.or(inherited.time_range)
    };

    let mut includes = merge_sets(&inherited.includes, &current.includes, follow_up.replace);
    let mut excludes = merge_sets(&inherited.excludes, &current.excludes, false);
    // Re-including a value lifts an inherited exclusion.
    for (field, values) in &current.includes {
        if let Some(excluded) = excludes.get_mut(field) {
            excluded.retain(|v| !values.contains(v));
        }
    }
    // An exclusion stated now drops an inherited inclusion.
    for (field, values) in &current.excludes {
        if let Some(included) = includes.get_mut(field) {
            included.retain(|v| !values.contains(v));
        }
    }

    let mut accounts = current.accounts.clone();
    if !(follow_up.replace && !current.accounts.include.is_empty()) {
        for id in &inherited.accounts.include {
            if !accounts.include.contains(id) && !current.accounts.exclude.contains(id) {
                accounts.include.push(id.clone());
            }
        }
    }
    for id in &inherited.accounts.exclude {
        if !accounts.exclude.contains(id) && !current.accounts.include.contains(id) {
            accounts.exclude.push(id.clone());
        }
    }

    ResolvedParams {
        intent_type,
        time_range,
        includes,
        excludes,
        group_by: if current.group_by.is_empty() {
            inherited.group_by.clone()
        } else {
            current.group_by.clone()
        },
        aggregate: current.aggregate.or(inherited.aggregate),
        limit: current.limit.or(inherited.limit),
        accounts,
    }
    .reconcile()
}

fn merge_sets<K: Ord + Copy>(
    inherited: &BTreeMap<K, BTreeSet<String>>,
    current: &BTreeMap<K, BTreeSet<String>>,
    replace: bool,
) -> BTreeMap<K, BTreeSet<String>> {
    let mut merged = inherited.clone();
    for (field, values) in current {
        let slot = merged.entry(*field).or_default();
        if replace {
            *slot = values.clone();
        } else {
            slot.extend(values.iter().cloned());
        }
    }
    merged
}
