//! Insights: the analyst's permanent, append-only knowledge about the equipment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::MetricKind;
use crate::load_band::LoadBand;

/// What kind of finding an insight records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    /// Regression-backed drift of a metric within a load band
    Trend,
    /// Recurring hourly or weekly behaviour
    Pattern,
    /// A notable excursion found in history
    Event,
}

impl KnowledgeType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trend => "trend",
            Self::Pattern => "pattern",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trend" => Some(Self::Trend),
            "pattern" => Some(Self::Pattern),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

impl std::fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightConfidence {
    Low,
    Medium,
    High,
}

impl InsightConfidence {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Where an insight came from. Rendered as a prefix on the stored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    Statistical,
    Ai,
}

impl InsightSource {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Statistical => "STAT:",
            Self::Ai => "AI:",
        }
    }
}

/// A single unit of institutional memory.
///
/// Never updated or deleted once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub knowledge_type: KnowledgeType,
    pub description: String,
    pub confidence: InsightConfidence,
    pub load_band: Option<LoadBand>,
    pub supporting_metrics: BTreeMap<MetricKind, f64>,
    pub source: InsightSource,
    pub timestamp: DateTime<Utc>,
}

impl Insight {
    pub fn statistical(
        knowledge_type: KnowledgeType,
        description: impl Into<String>,
        confidence: InsightConfidence,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            knowledge_type,
            description: description.into(),
            confidence,
            load_band: None,
            supporting_metrics: BTreeMap::new(),
            source: InsightSource::Statistical,
            timestamp,
        }
    }

    pub fn ai(
        knowledge_type: KnowledgeType,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source: InsightSource::Ai,
            ..Self::statistical(knowledge_type, description, InsightConfidence::Medium, timestamp)
        }
    }

    #[must_use]
    pub const fn in_band(mut self, band: LoadBand) -> Self {
        self.load_band = Some(band);
        self
    }

    #[must_use]
    pub fn supported_by(mut self, metric: MetricKind, value: f64) -> Self {
        self.supporting_metrics.insert(metric, value);
        self
    }

    /// Description with its source prefix, e.g. `STAT: Oil Pressure showing ...`
    pub fn tagged_text(&self) -> String {
        format!("{} {}", self.source.tag(), self.description)
    }

    /// Split a stored `insight_text` back into source and description.
    pub fn untag(text: &str) -> (InsightSource, &str) {
        for source in [InsightSource::Statistical, InsightSource::Ai] {
            if let Some(rest) = text.strip_prefix(source.tag()) {
                return (source, rest.trim_start());
            }
        }
        (InsightSource::Ai, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_text_round_trip() {
        let insight = Insight::statistical(
            KnowledgeType::Trend,
            "Oil Pressure showing declining trend",
            InsightConfidence::High,
            Utc::now(),
        );
        let text = insight.tagged_text();
        assert!(text.starts_with("STAT: "));
        let (source, body) = Insight::untag(&text);
        assert_eq!(source, InsightSource::Statistical);
        assert_eq!(body, "Oil Pressure showing declining trend");
    }

    #[test]
    fn test_ai_insight_defaults_to_medium() {
        let insight = Insight::ai(KnowledgeType::Pattern, "recurring morning dip", Utc::now());
        assert_eq!(insight.source, InsightSource::Ai);
        assert_eq!(insight.confidence, InsightConfidence::Medium);
        assert!(insight.tagged_text().starts_with("AI: "));
    }
}
