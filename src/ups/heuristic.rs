//! Heuristic Classifier
//!
//! Keyword and regex scoring over the intent vocabulary. Used when the LLM
//! path is exhausted. Its confidence never exceeds the calibrated heuristic
//! cap, which sits below the clarification threshold, so a heuristic-only
//! result can only proceed when the caller's calibration allows it.

use crate::catalog::synonyms::SynonymCatalog;
use crate::ups::schema::{
    Aggregate, Dimension, Field, Filter, Intent, IntentOrigin, IntentType, Operations, TimePreset, TimeSpec,
    MAX_LIMIT,
};
use crate::ups::time_range::{last_of_month, ymd};
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

const BASE_CONFIDENCE: f64 = 0.35;
const PER_HIT: f64 = 0.1;

/// (intent, keyword patterns). Order breaks score ties.
const INTENT_KEYWORDS: &[(IntentType, &[&str])] = &[
    (
        IntentType::TopNRanking,
        &[r"\btop\b", r"\bhighest\b", r"\bmost expensive\b", r"\bbiggest\b", r"\blargest\b", r"\brank"],
    ),
    (
        IntentType::AnomalyAnalysis,
        &[r"\bspike", r"\banomal", r"\bunusual\b", r"\bunexpected\b", r"\bjump", r"\bsurge", r"\babnormal"],
    ),
    (
        IntentType::Comparative,
        &[r"\bcompar", r"\bvs\.?\b", r"\bversus\b", r"\bdifference between\b", r"\bagainst\b"],
    ),
    (
        IntentType::CostTrend,
        &[r"\btrend", r"\bover time\b", r"\bmonthly\b", r"\bhistory\b", r"\bgrowing\b", r"\bmonth over month\b"],
    ),
    (
        IntentType::Utilization,
        &[r"\butili[sz]ation\b", r"\bcoverage\b", r"\breserved instances?\b", r"\bsavings plans?\b", r"\bcommitment"],
    ),
    (
        IntentType::Optimization,
        &[r"\bsav(e|ing)\b", r"\breduce\b", r"\boptimi[sz]", r"\brightsiz", r"\bcheaper\b", r"\bwaste"],
    ),
    (
        IntentType::Governance,
        &[r"\buntagged\b", r"\btag(s|ging)?\b", r"\bcost cent(er|re)\b", r"\ballocation\b", r"\bcomplian"],
    ),
    (
        IntentType::DataMetadata,
        &[r"\bfresh", r"\blast updated\b", r"\bdata cover", r"\blatest data\b", r"\bhow recent\b", r"\bdate range\b"],
    ),
    (
        IntentType::CostBreakdown,
        &[r"\bbreak ?down\b", r"\bsplit\b", r"\bper (service|region|account)\b", r"\bby (service|region|account|purchase option|usage type)"],
    ),
    (
        IntentType::GeneralInquiry,
        &[r"\bhelp\b", r"\bwhat can you\b", r"\bexplain\b", r"\bwhat is\b"],
    ),
];

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september", "october",
    "november", "december",
];

lazy_static! {
    static ref KEYWORD_REGEXES: Vec<(IntentType, Vec<Regex>)> = INTENT_KEYWORDS
        .iter()
        .map(|(intent, patterns)| {
            let compiled = patterns
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
                .collect();
            (*intent, compiled)
        })
        .collect();
    static ref COST_WORDS: Regex = Regex::new(r"(?i)\b(cost|costs|spend|spending|spent|bill|billing|charges?)\b").unwrap();
    static ref EXCLUSION_CUE: Regex =
        Regex::new(r"(?i)\b(exclud\w*|without|except|minus|not including|ignor\w*|remov\w*|drop)\b").unwrap();
    static ref TOP_N: Regex = Regex::new(r"(?i)\btop\s+(\d{1,4}|one|two|three|four|five|six|seven|eight|nine|ten)\b").unwrap();
    static ref GROUP_BY: Regex = Regex::new(
        r"(?i)\b(?:by|per|top\s+\d{1,4})\s+(services?|regions?|accounts?|purchase options?|usage types?|months?|days?)\b"
    )
    .unwrap();
    static ref LAST_N_DAYS: Regex = Regex::new(r"(?i)\b(?:last|past|previous)\s+(\d{1,3})\s+days?\b").unwrap();
    static ref LAST_N_MONTHS: Regex = Regex::new(r"(?i)\b(?:last|past|previous)\s+(\d{1,3})\s+months?\b").unwrap();
    static ref LAST_WEEK: Regex = Regex::new(r"(?i)\b(?:last|past|previous)\s+week\b").unwrap();
    static ref LAST_MONTH: Regex = Regex::new(r"(?i)\b(?:last|previous|prior)\s+month\b").unwrap();
    static ref THIS_MONTH: Regex = Regex::new(r"(?i)\b(?:this\s+month|month\s+to\s+date|mtd)\b").unwrap();
    static ref LAST_QUARTER: Regex = Regex::new(r"(?i)\b(?:last|previous)\s+quarter\b").unwrap();
    static ref THIS_QUARTER: Regex = Regex::new(r"(?i)\bthis\s+quarter\b").unwrap();
    static ref YEAR_TO_DATE: Regex = Regex::new(r"(?i)\b(?:year\s+to\s+date|ytd|this\s+year)\b").unwrap();
    static ref LAST_YEAR: Regex = Regex::new(r"(?i)\b(?:last|previous)\s+year\b").unwrap();
    static ref YESTERDAY: Regex = Regex::new(r"(?i)\byesterday\b").unwrap();
    static ref TODAY: Regex = Regex::new(r"(?i)\btoday\b").unwrap();
    static ref MONTH_NAME: Regex = Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)(?:\s+(\d{4}))?\b"
    )
    .unwrap();
    static ref ACCOUNT_MENTION: Regex = Regex::new(r#"(?i)\baccounts?\s*(?:id)?\s*[:#]?\s*['"]?([0-9][^\s,'"]*)"#).unwrap();
    static ref BARE_ACCOUNT_ID: Regex = Regex::new(r"\b\d{12}\b").unwrap();
    static ref AVERAGE: Regex = Regex::new(r"(?i)\b(average|avg|mean)\b").unwrap();
    static ref PEAK: Regex = Regex::new(r"(?i)\b(peak|max|maximum)\b").unwrap();
}

pub struct HeuristicClassifier {
    confidence_cap: f64,
}

impl HeuristicClassifier {
    pub fn new(confidence_cap: f64) -> Self {
        Self {
            confidence_cap: confidence_cap.clamp(0.0, 1.0),
        }
    }

    /// `None` when the utterance carries no usable signal. `previous` is the
    /// intent of the thread's last turn, used for bare refinements.
    pub fn classify(&self, utterance: &str, previous: Option<IntentType>, today: NaiveDate) -> Option<Intent> {
        let operations = extract_operations(utterance, today);
        let entities = extract_accounts(utterance);
        let has_parameters = !operations.filters.is_empty()
            || operations.time_range.is_some()
            || !entities.is_empty()
            || operations.limit.is_some();

        let (intent_type, hits) = match best_intent(utterance) {
            Some(found) => found,
            None => match previous {
                Some(prev) if has_parameters => (prev, 1),
                _ if has_parameters || COST_WORDS.is_match(utterance) => (IntentType::CostBreakdown, 0),
                _ => return None,
            },
        };

        let confidence = (BASE_CONFIDENCE + PER_HIT * hits as f64).min(self.confidence_cap);
        let mut intent = Intent::new(intent_type, confidence).with_operations(operations);
        intent.entities = entities;
        intent.origin = IntentOrigin::Heuristic;
        Some(intent)
    }
}

fn best_intent(utterance: &str) -> Option<(IntentType, usize)> {
    let mut best: Option<(IntentType, usize)> = None;
    for (intent, regexes) in KEYWORD_REGEXES.iter() {
        let hits = regexes.iter().filter(|r| r.is_match(utterance)).count();
        if hits > 0 && best.map(|(_, b)| hits > b).unwrap_or(true) {
            best = Some((*intent, hits));
        }
    }
    best
}

fn extract_operations(utterance: &str, today: NaiveDate) -> Operations {
    let mut operations = Operations::default();

    // Mentions after an exclusion cue are exclusions.
    let split_at = EXCLUSION_CUE.find(utterance).map(|m| m.start()).unwrap_or(utterance.len());
    let (before, after) = utterance.split_at(split_at);
    for field in [Field::Service, Field::Region, Field::PurchaseOption] {
        let included: Vec<String> = SynonymCatalog::mentions(field, before).iter().map(|s| s.to_string()).collect();
        let excluded: Vec<String> = SynonymCatalog::mentions(field, after).iter().map(|s| s.to_string()).collect();
        if !included.is_empty() {
            operations.filters.push(Filter::include(field, included));
        }
        if !excluded.is_empty() {
            operations.filters.push(Filter::exclude(field, excluded));
        }
    }

    if let Some(caps) = TOP_N.captures(utterance) {
        operations.limit = caps.get(1).and_then(|m| parse_count(m.as_str()));
    }

    if let Some(caps) = GROUP_BY.captures(utterance) {
        if let Some(dimension) = caps.get(1).and_then(|m| parse_dimension(m.as_str())) {
            operations.group_by.push(dimension);
        }
    }

    if AVERAGE.is_match(utterance) {
        operations.aggregate = Aggregate::Avg;
    } else if PEAK.is_match(utterance) {
        operations.aggregate = Aggregate::Max;
    }

    operations.time_range = extract_time(utterance, today);
    operations
}

fn parse_count(raw: &str) -> Option<u32> {
    let n = match raw.to_lowercase().as_str() {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        digits => digits.parse().ok()?,
    };
    (1..=MAX_LIMIT).contains(&n).then_some(n)
}

fn parse_dimension(raw: &str) -> Option<Dimension> {
    let lower = raw.to_lowercase();
    let singular = lower.trim_end_matches('s');
    match singular {
        "service" => Some(Dimension::Service),
        "region" => Some(Dimension::Region),
        "account" => Some(Dimension::Account),
        "purchase option" => Some(Dimension::PurchaseOption),
        "usage type" => Some(Dimension::UsageType),
        "month" => Some(Dimension::Month),
        "day" => Some(Dimension::Day),
        _ => None,
    }
}

fn preset_n(regex: &Regex, utterance: &str, preset: TimePreset) -> Option<TimeSpec> {
    let caps = regex.captures(utterance)?;
    let n: u32 = caps.get(1)?.as_str().parse().ok()?;
    (1..=366).contains(&n).then_some(TimeSpec::Preset { preset, n: Some(n) })
}

fn extract_time(utterance: &str, today: NaiveDate) -> Option<TimeSpec> {
    if let Some(spec) = preset_n(&LAST_N_DAYS, utterance, TimePreset::LastNDays) {
        return Some(spec);
    }
    if let Some(spec) = preset_n(&LAST_N_MONTHS, utterance, TimePreset::LastNMonths) {
        return Some(spec);
    }
    let presets: [(&Regex, TimeSpec); 8] = [
        (&LAST_WEEK, TimeSpec::Preset { preset: TimePreset::LastNDays, n: Some(7) }),
        (&LAST_MONTH, TimeSpec::preset(TimePreset::LastMonth)),
        (&THIS_MONTH, TimeSpec::preset(TimePreset::ThisMonth)),
        (&LAST_QUARTER, TimeSpec::preset(TimePreset::LastQuarter)),
        (&THIS_QUARTER, TimeSpec::preset(TimePreset::ThisQuarter)),
        (&LAST_YEAR, TimeSpec::preset(TimePreset::LastYear)),
        (&YEAR_TO_DATE, TimeSpec::preset(TimePreset::YearToDate)),
        (&YESTERDAY, TimeSpec::preset(TimePreset::Yesterday)),
    ];
    for (regex, spec) in presets {
        if regex.is_match(utterance) {
            return Some(spec);
        }
    }
    if let Some(caps) = MONTH_NAME.captures(utterance) {
        let name = caps.get(1)?.as_str().to_lowercase();
        // "may" alone is too often the verb.
        if name == "may" && caps.get(2).is_none() {
            return today_preset(utterance);
        }
        let month = MONTHS.iter().position(|m| *m == name)? as u32 + 1;
        let year = match caps.get(2).and_then(|y| y.as_str().parse::<i32>().ok()) {
            Some(year) => year,
            // Most recent such month that has started.
            None if month <= today.month() => today.year(),
            None => today.year() - 1,
        };
        let start = ymd(year, month, 1).ok()?;
        return Some(TimeSpec::Absolute {
            start,
            end: last_of_month(start),
        });
    }
    today_preset(utterance)
}

fn today_preset(utterance: &str) -> Option<TimeSpec> {
    TODAY.is_match(utterance).then(|| TimeSpec::preset(TimePreset::Today))
}

/// Account tokens are passed through raw; the validator decides.
fn extract_accounts(utterance: &str) -> BTreeMap<Field, Vec<String>> {
    let mut accounts: Vec<String> = Vec::new();
    for caps in ACCOUNT_MENTION.captures_iter(utterance) {
        if let Some(m) = caps.get(1) {
            let raw = m.as_str().trim_end_matches(['.', '?', '!']).to_string();
            if !accounts.contains(&raw) {
                accounts.push(raw);
            }
        }
    }
    for m in BARE_ACCOUNT_ID.find_iter(utterance) {
        let raw = m.as_str().to_string();
        if !accounts.contains(&raw) {
            accounts.push(raw);
        }
    }
    let mut entities = BTreeMap::new();
    if !accounts.is_empty() {
        entities.insert(Field::Account, accounts);
    }
    entities
}
