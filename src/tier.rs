use std::cmp::Ordering;

use crate::config::TierMetric;
use crate::models::{OperatorSummary, Tier, TieredSummary};

/// Assigns exactly one tier per value. Ties keep input order; when the
/// top and bottom sets overlap the row stays in the top tier.
pub fn classify(values: &[f64], top_n: usize, bottom_n: usize) -> Vec<Tier> {
    if values.is_empty() {
        return Vec::new();
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let mut tiers: Vec<Option<Tier>> = vec![None; values.len()];

    let mut descending: Vec<usize> = (0..values.len()).collect();
    descending.sort_by(|a, b| values[*b].partial_cmp(&values[*a]).unwrap_or(Ordering::Equal));
    for position in descending.into_iter().take(top_n) {
        tiers[position] = Some(Tier::Top);
    }

    let mut ascending: Vec<usize> = (0..values.len()).collect();
    ascending.sort_by(|a, b| values[*a].partial_cmp(&values[*b]).unwrap_or(Ordering::Equal));
    for position in ascending.into_iter().take(bottom_n) {
        if tiers[position].is_none() {
            tiers[position] = Some(Tier::Bottom);
        }
    }

    tiers
        .into_iter()
        .zip(values)
        .map(|(tier, value)| match tier {
            Some(tier) => tier,
            None if *value > mean => Tier::AboveMean,
            None => Tier::BelowMean,
        })
        .collect()
}

pub fn metric_value(summary: &OperatorSummary, metric: TierMetric) -> f64 {
    match metric {
        TierMetric::Mean => summary.mean,
        TierMetric::Count => summary.total as f64,
    }
}

pub fn classify_summaries(
    summaries: &[OperatorSummary],
    metric: TierMetric,
    top_n: usize,
    bottom_n: usize,
) -> Vec<TieredSummary> {
    let values: Vec<f64> = summaries
        .iter()
        .map(|summary| metric_value(summary, metric))
        .collect();
    let tiers = classify(&values, top_n, bottom_n);

    summaries
        .iter()
        .zip(values)
        .zip(tiers)
        .map(|((summary, value), tier)| TieredSummary {
            summary: summary.clone(),
            value,
            tier,
        })
        .collect()
}
