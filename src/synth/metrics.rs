//! Pure numeric helpers behind the insights. No I/O, no clock.

/// Label used for the collapsed tail.
pub const OTHERS_LABEL: &str = "Others";

#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    pub label: String,
    pub value: f64,
    /// Percent of the total, 0 when the total is 0.
    pub percent: f64,
}

pub fn total(values: &[(String, f64)]) -> f64 {
    values.iter().map(|(_, v)| v).sum()
}

pub fn shares(values: &[(String, f64)]) -> Vec<Share> {
    let sum = total(values);
    values
        .iter()
        .map(|(label, value)| Share {
            label: label.clone(),
            value: *value,
            percent: percent_of(*value, sum),
        })
        .collect()
}

pub fn percent_of(part: f64, whole: f64) -> f64 {
    if whole.abs() < f64::EPSILON {
        0.0
    } else {
        part / whole * 100.0
    }
}

/// Share of the `k` largest values, in percent (CR-k).
pub fn concentration_ratio(values: &[(String, f64)], k: usize) -> f64 {
    let mut sorted: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top: f64 = sorted.iter().take(k).sum();
    percent_of(top, sorted.iter().sum())
}

/// Keep the `keep` largest entries and fold the rest into one
/// [`OTHERS_LABEL`] entry. The total is unchanged.
pub fn collapse_others(values: &[(String, f64)], keep: usize) -> Vec<(String, f64)> {
    if values.len() <= keep {
        return values.to_vec();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let tail: f64 = sorted[keep..].iter().map(|(_, v)| v).sum();
    sorted.truncate(keep);
    sorted.push((OTHERS_LABEL.to_string(), tail));
    sorted
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodDelta {
    pub period: String,
    pub value: f64,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
}

/// Change of each period against the one before it, in input order.
pub fn period_deltas(series: &[(String, f64)]) -> Vec<PeriodDelta> {
    let mut out = Vec::with_capacity(series.len());
    let mut previous: Option<f64> = None;
    for (period, value) in series {
        let (change, change_percent) = match previous {
            Some(prev) => {
                let change = value - prev;
                let pct = (prev.abs() > f64::EPSILON).then(|| change / prev * 100.0);
                (Some(change), pct)
            }
            None => (None, None),
        };
        out.push(PeriodDelta {
            period: period.clone(),
            value: *value,
            change,
            change_percent,
        });
        previous = Some(*value);
    }
    out
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Indices whose z-score exceeds `threshold`. Needs at least three points
/// and a non-zero spread.
pub fn anomalies(values: &[f64], threshold: f64) -> Vec<usize> {
    let Some((mean, std)) = mean_std(values) else {
        return Vec::new();
    };
    if values.len() < 3 || std < f64::EPSILON {
        return Vec::new();
    }
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| ((**v - mean) / std).abs() > threshold)
        .map(|(i, _)| i)
        .collect()
}

/// `$1,234.56`
pub fn format_usd(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let cents = (value.abs() * 100.0).round() as u64;
    let dollars = cents / 100;
    let digits = dollars.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[(&str, f64)]) -> Vec<(String, f64)> {
        values.iter().map(|(l, v)| (l.to_string(), *v)).collect()
    }

    #[test]
    fn test_collapse_others_preserves_sum() {
        let values = series(&[("a", 50.0), ("b", 10.0), ("c", 30.0), ("d", 5.0), ("e", 2.5), ("f", 1.25), ("g", 0.25)]);
        let collapsed = collapse_others(&values, 5);
        assert_eq!(collapsed.len(), 6);
        assert_eq!(collapsed[0].0, "a");
        assert_eq!(collapsed[5], (OTHERS_LABEL.to_string(), 1.5));
        assert!((total(&collapsed) - total(&values)).abs() < 1e-9);
    }

    #[test]
    fn test_collapse_others_noop_when_small() {
        let values = series(&[("a", 1.0), ("b", 2.0)]);
        assert_eq!(collapse_others(&values, 5), values);
    }

    #[test]
    fn test_shares_and_concentration() {
        let values = series(&[("a", 60.0), ("b", 20.0), ("c", 10.0), ("d", 10.0)]);
        let s = shares(&values);
        assert!((s[0].percent - 60.0).abs() < 1e-9);
        assert!((concentration_ratio(&values, 3) - 90.0).abs() < 1e-9);
        assert_eq!(shares(&series(&[("z", 0.0)]))[0].percent, 0.0);
    }

    #[test]
    fn test_period_deltas() {
        let deltas = period_deltas(&series(&[("2024-07", 100.0), ("2024-08", 150.0), ("2024-09", 0.0)]));
        assert_eq!(deltas[0].change, None);
        assert_eq!(deltas[1].change, Some(50.0));
        assert_eq!(deltas[1].change_percent, Some(50.0));
        assert_eq!(deltas[2].change_percent, Some(-100.0));
    }

    #[test]
    fn test_anomalies_flag_spike() {
        let mut values = vec![10.0; 20];
        values[7] = 80.0;
        assert_eq!(anomalies(&values, 2.0), vec![7]);
        assert!(anomalies(&[5.0, 5.0, 5.0], 2.0).is_empty());
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(1234.5), "$1,234.50");
        assert_eq!(format_usd(0.004), "$0.00");
        assert_eq!(format_usd(-1_000_000.0), "-$1,000,000.00");
        assert_eq!(format_usd(999.999), "$1,000.00");
    }
}
