use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::period::BucketKey;

pub const UNASSIGNED_TEAM: &str = "unassigned";
pub const TOTAL_OPERATOR: &str = "Total";

/// One row of the source table. `row` is the zero-based data row position
/// and `fields` holds every original cell in header order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterventionRecord {
    pub row: usize,
    pub operator: String,
    pub timestamp: Option<NaiveDateTime>,
    pub fields: Vec<String>,
}

impl InterventionRecord {
    pub fn date(&self) -> Option<NaiveDate> {
        self.timestamp.map(|value| value.date())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub members: Vec<String>,
}

/// Ordered team list; an operator belongs to the first team naming them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    teams: Vec<Team>,
}

impl Roster {
    pub fn new(teams: Vec<Team>) -> Self {
        Self { teams }
    }

    pub fn team_of(&self, operator: &str) -> &str {
        self.teams
            .iter()
            .find(|team| team.members.iter().any(|member| member == operator))
            .map(|team| team.name.as_str())
            .unwrap_or(UNASSIGNED_TEAM)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupShape {
    Operator,
    OperatorBucket,
    OperatorTeamBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub operator: String,
    pub team: Option<String>,
    pub bucket: Option<BucketKey>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorSummary {
    pub operator: String,
    pub team: String,
    pub total: usize,
    pub buckets: usize,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Top,
    Bottom,
    AboveMean,
    BelowMean,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Tier::Top => "top",
            Tier::Bottom => "bottom",
            Tier::AboveMean => "above_mean",
            Tier::BelowMean => "below_mean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TieredSummary {
    pub summary: OperatorSummary,
    pub value: f64,
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleOutcome {
    Drawn {
        available: usize,
        records: Vec<InterventionRecord>,
    },
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorSample {
    pub operator: String,
    pub outcome: SampleOutcome,
}

impl OperatorSample {
    pub fn records(&self) -> &[InterventionRecord] {
        match &self.outcome {
            SampleOutcome::Drawn { records, .. } => records,
            SampleOutcome::NoData => &[],
        }
    }
}
