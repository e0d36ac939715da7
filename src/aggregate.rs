use std::collections::{BTreeMap, BTreeSet};

use rand::seq::index;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::MeanPolicy;
use crate::filter::DateWindow;
use crate::models::{AggregateRow, GroupShape, InterventionRecord, OperatorSummary, Roster, TOTAL_OPERATOR};
use crate::period::{bucket_key, bucket_span_len, BucketKey, Granularity};

type GroupKey = (String, Option<String>, Option<BucketKey>);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregation {
    pub rows: Vec<AggregateRow>,
    /// Records with no bucket (unreadable timestamp).
    pub skipped: usize,
}

/// Chart-ready rows, possibly a random subset of the full windowed view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartView {
    pub rows: Vec<AggregateRow>,
    pub total_rows: usize,
    pub downsampled: bool,
}

/// Counts records per group. Rows come back sorted by
/// (operator, team, bucket).
pub fn aggregate<'a>(
    records: impl IntoIterator<Item = &'a InterventionRecord>,
    shape: GroupShape,
    granularity: Granularity,
    roster: &Roster,
) -> Aggregation {
    let mut groups: BTreeMap<GroupKey, usize> = BTreeMap::new();
    let mut skipped = 0usize;

    for record in records {
        let Some(bucket) = bucket_key(record.timestamp, granularity) else {
            skipped += 1;
            continue;
        };

        let key = match shape {
            GroupShape::Operator => (record.operator.clone(), None, None),
            GroupShape::OperatorBucket => (record.operator.clone(), None, Some(bucket)),
            GroupShape::OperatorTeamBucket => (
                record.operator.clone(),
                Some(roster.team_of(&record.operator).to_string()),
                Some(bucket),
            ),
        };
        *groups.entry(key).or_insert(0) += 1;
    }

    let rows: Vec<AggregateRow> = groups
        .into_iter()
        .map(|((operator, team, bucket), count)| AggregateRow {
            operator,
            team,
            bucket,
            count,
        })
        .collect();

    debug!(rows = rows.len(), skipped, %granularity, "aggregated");
    Aggregation { rows, skipped }
}

/// Same grouping as [`aggregate`], restricted to records dated inside `window`.
pub fn aggregate_window<'a>(
    records: impl IntoIterator<Item = &'a InterventionRecord>,
    window: &DateWindow,
    shape: GroupShape,
    granularity: Granularity,
    roster: &Roster,
) -> Aggregation {
    let mut skipped = 0usize;
    let inside: Vec<&InterventionRecord> = records
        .into_iter()
        .filter(|record| {
            if record.timestamp.is_none() {
                skipped += 1;
                return false;
            }
            window.includes(record)
        })
        .collect();

    let mut aggregation = aggregate(inside, shape, granularity, roster);
    aggregation.skipped = skipped;
    aggregation
}

/// Appends one `Total` pseudo-operator row per bucket carrying the sum of
/// every operator's count in that bucket.
pub fn with_total_rows(rows: &[AggregateRow]) -> Vec<AggregateRow> {
    let mut totals: BTreeMap<Option<BucketKey>, usize> = BTreeMap::new();
    for row in rows.iter().filter(|row| row.operator != TOTAL_OPERATOR) {
        *totals.entry(row.bucket).or_insert(0) += row.count;
    }

    let mut combined = rows.to_vec();
    combined.extend(totals.into_iter().map(|(bucket, count)| AggregateRow {
        operator: TOTAL_OPERATOR.to_string(),
        team: None,
        bucket,
        count,
    }));
    combined
}

/// Per-operator totals and mean count per bucket. The `Total`
/// pseudo-operator is left out.
pub fn summarize(rows: &[AggregateRow], roster: &Roster, policy: MeanPolicy) -> Vec<OperatorSummary> {
    let mut per_operator: BTreeMap<&str, (usize, BTreeSet<Option<BucketKey>>)> = BTreeMap::new();
    for row in rows.iter().filter(|row| row.operator != TOTAL_OPERATOR) {
        let entry = per_operator.entry(row.operator.as_str()).or_default();
        entry.0 += row.count;
        entry.1.insert(row.bucket);
    }

    let dense_buckets = match policy {
        MeanPolicy::Present => None,
        MeanPolicy::Dense => {
            let buckets: Vec<BucketKey> = rows.iter().filter_map(|row| row.bucket).collect();
            match (buckets.iter().min(), buckets.iter().max()) {
                (Some(first), Some(last)) => Some(bucket_span_len(*first, *last).max(1)),
                _ => None,
            }
        }
    };

    per_operator
        .into_iter()
        .map(|(operator, (total, buckets))| {
            let bucket_count = dense_buckets.unwrap_or(buckets.len());
            OperatorSummary {
                operator: operator.to_string(),
                team: roster.team_of(operator).to_string(),
                total,
                buckets: bucket_count,
                mean: if bucket_count == 0 {
                    0.0
                } else {
                    total as f64 / bucket_count as f64
                },
            }
        })
        .collect()
}

/// Keeps at most `cap` rows, chosen uniformly without replacement and kept
/// in their original order. A cap of zero disables down-sampling. Counts
/// are never altered.
pub fn downsample<R: Rng + ?Sized>(rows: &[AggregateRow], cap: usize, rng: &mut R) -> ChartView {
    if cap == 0 || rows.len() <= cap {
        return ChartView {
            rows: rows.to_vec(),
            total_rows: rows.len(),
            downsampled: false,
        };
    }

    let mut picked = index::sample(rng, rows.len(), cap).into_vec();
    picked.sort_unstable();

    warn!(total = rows.len(), kept = cap, "chart view down-sampled to the display cap");
    ChartView {
        rows: picked.into_iter().map(|position| rows[position].clone()).collect(),
        total_rows: rows.len(),
        downsampled: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Team;
    use crate::period::parse_timestamp;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(row: usize, operator: &str, raw: &str) -> InterventionRecord {
        InterventionRecord {
            row,
            operator: operator.to_string(),
            timestamp: parse_timestamp(raw),
            fields: vec![operator.to_string(), raw.to_string()],
        }
    }

    fn scenario() -> Vec<InterventionRecord> {
        vec![
            record(0, "Alice", "2024-01-01 08:00"),
            record(1, "Alice", "2024-01-02 10:00"),
            record(2, "Alice", "2024-01-15 14:30"),
            record(3, "Bob", "2024-01-01 09:00"),
            record(4, "Bob", "2024-01-01 16:00"),
        ]
    }

    fn roster() -> Roster {
        Roster::new(vec![Team {
            name: "Nord".to_string(),
            members: vec!["Alice".to_string()],
        }])
    }

    fn counts(rows: &[AggregateRow]) -> Vec<(String, String, usize)> {
        rows.iter()
            .map(|row| {
                let bucket = row.bucket.map(|bucket| bucket.to_string()).unwrap_or_default();
                (row.operator.clone(), bucket, row.count)
            })
            .collect()
    }

    #[test]
    fn monthly_scenario_counts_per_operator() {
        let result = aggregate(&scenario(), GroupShape::OperatorBucket, Granularity::Month, &roster());
        assert_eq!(
            counts(&result.rows),
            vec![
                ("Alice".to_string(), "2024-01".to_string(), 3),
                ("Bob".to_string(), "2024-01".to_string(), 2),
            ]
        );
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn bucket_counts_sum_to_operator_total() {
        let mut records = scenario();
        records.push(record(5, "Alice", "2024-03-04"));
        records.push(record(6, "Bob", "garbage"));

        let total = aggregate(&records, GroupShape::Operator, Granularity::Total, &roster());
        for granularity in [
            Granularity::Day,
            Granularity::Week,
            Granularity::Month,
            Granularity::Quarter,
            Granularity::Year,
        ] {
            let split = aggregate(&records, GroupShape::OperatorBucket, granularity, &roster());
            assert_eq!(split.skipped, 1);
            for row in &total.rows {
                let sum: usize = split
                    .rows
                    .iter()
                    .filter(|candidate| candidate.operator == row.operator)
                    .map(|candidate| candidate.count)
                    .sum();
                assert_eq!(sum, row.count, "{granularity} for {}", row.operator);
            }
        }
        assert_eq!(counts(&total.rows)[0], ("Alice".to_string(), String::new(), 4));
    }

    #[test]
    fn full_span_window_matches_unrestricted_view() {
        let mut records = scenario();
        records.push(record(5, "Bob", "not a date"));
        let window = DateWindow::default().resolve(&records);

        let windowed = aggregate_window(&records, &window, GroupShape::OperatorBucket, Granularity::Day, &roster());
        let unrestricted = aggregate(&records, GroupShape::OperatorBucket, Granularity::Day, &roster());
        assert_eq!(windowed.rows, unrestricted.rows);
        assert_eq!(windowed.skipped, 1);
    }

    #[test]
    fn narrow_window_leaves_unrestricted_view_untouched() {
        let records = scenario();
        let start = NaiveDate::from_ymd_opt(2024, 1, 10);
        let window = DateWindow::new(start, None).unwrap();

        let windowed = aggregate_window(&records, &window, GroupShape::OperatorBucket, Granularity::Month, &roster());
        let unrestricted = aggregate(&records, GroupShape::OperatorBucket, Granularity::Month, &roster());
        assert_eq!(counts(&windowed.rows), vec![("Alice".to_string(), "2024-01".to_string(), 1)]);
        assert_eq!(unrestricted.rows.len(), 2);
    }

    #[test]
    fn team_shape_carries_team_names() {
        let result = aggregate(&scenario(), GroupShape::OperatorTeamBucket, Granularity::Year, &roster());
        let teams: Vec<Option<&str>> = result.rows.iter().map(|row| row.team.as_deref()).collect();
        assert_eq!(teams, vec![Some("Nord"), Some("unassigned")]);
    }

    #[test]
    fn total_rows_sum_each_bucket() {
        let result = aggregate(&scenario(), GroupShape::OperatorBucket, Granularity::Day, &roster());
        let combined = with_total_rows(&result.rows);
        let totals: Vec<(String, String, usize)> = counts(&combined)
            .into_iter()
            .filter(|(operator, _, _)| operator == TOTAL_OPERATOR)
            .collect();
        assert_eq!(
            totals,
            vec![
                ("Total".to_string(), "2024-01-01".to_string(), 3),
                ("Total".to_string(), "2024-01-02".to_string(), 1),
                ("Total".to_string(), "2024-01-15".to_string(), 1),
            ]
        );
        assert_eq!(summarize(&combined, &roster(), MeanPolicy::Present).len(), 2);
    }

    #[test]
    fn mean_policies_differ_on_sparse_buckets() {
        let result = aggregate(&scenario(), GroupShape::OperatorBucket, Granularity::Day, &roster());

        let present = summarize(&result.rows, &roster(), MeanPolicy::Present);
        assert_eq!(present[0].operator, "Alice");
        assert_eq!(present[0].buckets, 3);
        assert!((present[0].mean - 1.0).abs() < 1e-9);
        assert_eq!(present[1].buckets, 1);
        assert!((present[1].mean - 2.0).abs() < 1e-9);

        // 2024-01-01 through 2024-01-15 is 15 days.
        let dense = summarize(&result.rows, &roster(), MeanPolicy::Dense);
        assert_eq!(dense[0].buckets, 15);
        assert!((dense[0].mean - 3.0 / 15.0).abs() < 1e-9);
        assert!((dense[1].mean - 2.0 / 15.0).abs() < 1e-9);
        assert_eq!(dense[0].team, "Nord");
    }

    #[test]
    fn downsample_only_trims_when_over_cap() {
        let rows: Vec<AggregateRow> = (0..10)
            .map(|position| AggregateRow {
                operator: format!("op{position:02}"),
                team: None,
                bucket: Some(BucketKey::Year(2024)),
                count: position + 1,
            })
            .collect();
        let mut rng = StdRng::seed_from_u64(7);

        let untouched = downsample(&rows, 10, &mut rng);
        assert!(!untouched.downsampled);
        assert_eq!(untouched.rows, rows);

        let trimmed = downsample(&rows, 4, &mut rng);
        assert!(trimmed.downsampled);
        assert_eq!(trimmed.total_rows, 10);
        assert_eq!(trimmed.rows.len(), 4);
        for row in &trimmed.rows {
            assert!(rows.contains(row));
        }
        assert!(trimmed.rows.windows(2).all(|pair| pair[0].operator < pair[1].operator));
        assert_eq!(downsample(&rows, 0, &mut rng).rows.len(), 10);
    }
}
