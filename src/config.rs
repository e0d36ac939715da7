use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::models::{Roster, Team};

pub const DEFAULT_OPERATOR_COLUMN: &str = "Prénom et nom";
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "Date et Heure début d'intervention";

pub const REQUIRED_COLUMNS: &[&str] = &[
    DEFAULT_OPERATOR_COLUMN,
    DEFAULT_TIMESTAMP_COLUMN,
    "Équipement",
    "Localisation",
    "Technique",
    "Opérationnel",
    "Photo",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub columns: ColumnConfig,
    pub teams: Vec<Team>,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub operator: String,
    pub timestamp: String,
    pub value: Option<String>,
    pub category: Option<String>,
    pub required: Vec<String>,
    pub delimiter: char,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            operator: DEFAULT_OPERATOR_COLUMN.to_string(),
            timestamp: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            value: None,
            category: None,
            required: REQUIRED_COLUMNS.iter().map(|name| name.to_string()).collect(),
            delimiter: ',',
        }
    }
}

impl ColumnConfig {
    pub fn delimiter_byte(&self) -> anyhow::Result<u8> {
        if !self.delimiter.is_ascii() {
            bail!("delimiter '{}' must be a single ASCII character", self.delimiter);
        }
        Ok(self.delimiter as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanPolicy {
    /// Average over the buckets where the operator has records.
    #[default]
    Present,
    /// Average over every bucket in the view's span, missing ones as zero.
    Dense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalRowPolicy {
    #[default]
    Exclude,
    Include,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierMetric {
    #[default]
    Mean,
    Count,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub top_n: usize,
    pub bottom_n: usize,
    pub display_cap: usize,
    pub sample_size: usize,
    pub mean_policy: MeanPolicy,
    pub total_row: TotalRowPolicy,
    pub tier_metric: TierMetric,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            bottom_n: 5,
            display_cap: 100,
            sample_size: 2,
            mean_policy: MeanPolicy::default(),
            total_row: TotalRowPolicy::default(),
            tier_metric: TierMetric::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(raw)?;
        config.columns.delimiter_byte()?;
        Ok(config)
    }

    pub fn roster(&self) -> Roster {
        Roster::new(self.teams.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.columns, ColumnConfig::default());
        assert_eq!(config.analysis, AnalysisConfig::default());
        assert!(config.teams.is_empty());
        assert_eq!(config.columns.required.len(), REQUIRED_COLUMNS.len());
    }

    #[test]
    fn parses_teams_and_overrides() {
        let raw = r#"
            [columns]
            operator = "Opérateur"
            delimiter = ";"
            value = "Durée"

            [analysis]
            top_n = 2
            mean_policy = "dense"
            total_row = "include"

            [[teams]]
            name = "Nord"
            members = ["Alice Martin", "Bob Durand"]

            [[teams]]
            name = "Sud"
            members = ["Chloé Petit"]
        "#;
        let config = AppConfig::from_toml(raw).unwrap();
        assert_eq!(config.columns.operator, "Opérateur");
        assert_eq!(config.columns.timestamp, DEFAULT_TIMESTAMP_COLUMN);
        assert_eq!(config.columns.delimiter_byte().unwrap(), b';');
        assert_eq!(config.columns.value.as_deref(), Some("Durée"));
        assert_eq!(config.analysis.top_n, 2);
        assert_eq!(config.analysis.bottom_n, 5);
        assert_eq!(config.analysis.mean_policy, MeanPolicy::Dense);
        assert_eq!(config.analysis.total_row, TotalRowPolicy::Include);
        assert_eq!(config.roster().team_of("Chloé Petit"), "Sud");
    }

    #[test]
    fn rejects_non_ascii_delimiter() {
        assert!(AppConfig::from_toml("[columns]\ndelimiter = \"§\"").is_err());
    }
}
