//! Insight persistence, querying and AI narrative extraction

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::load_band::LoadBand;
use crate::store::{Measurement, MeasurementRecord};
use crate::types::{Insight, InsightConfidence, KnowledgeType, MetricKind};

/// AI-derived insights kept from a single narrative
pub const MAX_AI_INSIGHTS: usize = 3;

/// Filter for `MemoryManager::query_insights`. Empty matches everything.
#[derive(Debug, Clone, Default)]
pub struct InsightQuery {
    pub knowledge_type: Option<KnowledgeType>,
    pub load_band: Option<LoadBand>,
    /// Only insights newer than this many hours
    pub since_hours: Option<u64>,
}

impl InsightQuery {
    pub fn matches(&self, insight: &Insight, now: DateTime<Utc>) -> bool {
        if self.knowledge_type.is_some_and(|kt| kt != insight.knowledge_type) {
            return false;
        }
        if self.load_band.is_some() && self.load_band != insight.load_band {
            return false;
        }
        if let Some(hours) = self.since_hours {
            let cutoff = i64::try_from(hours)
                .ok()
                .and_then(Duration::try_hours)
                .and_then(|d| now.checked_sub_signed(d));
            if cutoff.is_some_and(|cutoff| insight.timestamp < cutoff) {
                return false;
            }
        }
        true
    }
}

pub fn insight_to_record(insight: &Insight) -> MeasurementRecord {
    let supporting: BTreeMap<&str, f64> = insight
        .supporting_metrics
        .iter()
        .map(|(m, v)| (m.field_name(), *v))
        .collect();
    let mut record = MeasurementRecord::new(Measurement::Insights, insight.timestamp)
        .tag("knowledge_type", insight.knowledge_type.as_str())
        .tag("confidence", insight.confidence.as_str())
        .field("insight_text", insight.tagged_text())
        .field(
            "supporting_metrics",
            serde_json::to_string(&supporting).unwrap_or_default(),
        );
    if let Some(band) = insight.load_band {
        record = record.tag("load_band", band.as_str());
    }
    record
}

/// Rebuild an insight from its record. Records missing the text or type
/// are skipped by returning `None`.
pub fn insight_from_record(record: &MeasurementRecord) -> Option<Insight> {
    if record.measurement != Measurement::Insights {
        return None;
    }
    let knowledge_type = record.tag_value("knowledge_type").and_then(KnowledgeType::parse)?;
    let (source, description) = Insight::untag(record.field_str("insight_text")?);
    let confidence = record
        .tag_value("confidence")
        .and_then(InsightConfidence::parse)
        .unwrap_or(InsightConfidence::Medium);

    let supporting_metrics = record
        .field_str("supporting_metrics")
        .and_then(|s| serde_json::from_str::<BTreeMap<String, f64>>(s).ok())
        .map(|raw| {
            raw.into_iter()
                .filter_map(|(name, v)| MetricKind::from_field_name(&name).map(|m| (m, v)))
                .collect()
        })
        .unwrap_or_default();

    Some(Insight {
        knowledge_type,
        description: description.to_string(),
        confidence,
        load_band: record.tag_value("load_band").and_then(LoadBand::parse),
        supporting_metrics,
        source,
        timestamp: record.timestamp,
    })
}

/// Pull structured insights out of free-form AI narrative.
///
/// - a line mentioning a trend together with oil or pressure is a `trend`
/// - a line mentioning a pattern or something recurring is a `pattern`
///
/// At most [`MAX_AI_INSIGHTS`] are returned, in narrative order.
pub fn extract_ai_insights(narrative: &str, now: DateTime<Utc>) -> Vec<Insight> {
    narrative
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let lower = line.to_lowercase();
            let kind = if lower.contains("trend") && (lower.contains("oil") || lower.contains("pressure")) {
                KnowledgeType::Trend
            } else if lower.contains("pattern") || lower.contains("recurring") {
                KnowledgeType::Pattern
            } else {
                return None;
            };
            let text = line.trim_start_matches(['-', '*', '•', ' ']);
            Some(Insight::ai(kind, text, now))
        })
        .take(MAX_AI_INSIGHTS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InsightSource;

    #[test]
    fn test_extract_trend_and_pattern_lines() {
        let narrative = "Summary of the last cycle.\n\
                         - Oil pressure trend is slowly declining under heavy load\n\
                         - Coolant shows a recurring spike around noon\n\
                         Nothing else of note.";
        let insights = extract_ai_insights(narrative, Utc::now());
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].knowledge_type, KnowledgeType::Trend);
        assert_eq!(insights[1].knowledge_type, KnowledgeType::Pattern);
        assert!(insights.iter().all(|i| i.source == InsightSource::Ai));
        assert!(insights.iter().all(|i| i.confidence == InsightConfidence::Medium));
        assert!(insights[0].description.starts_with("Oil pressure trend"));
    }

    #[test]
    fn test_extract_caps_at_three() {
        let narrative = "pattern one\npattern two\npattern three\npattern four";
        assert_eq!(extract_ai_insights(narrative, Utc::now()).len(), MAX_AI_INSIGHTS);
    }

    #[test]
    fn test_trend_without_oil_is_ignored() {
        assert!(extract_ai_insights("fuel rate trend is flat", Utc::now()).is_empty());
    }

    #[test]
    fn test_record_round_trip_keeps_source_and_band() {
        let insight = Insight::statistical(
            KnowledgeType::Trend,
            "Oil Pressure showing declining trend in HEAVY load band (R²=0.81)",
            InsightConfidence::High,
            Utc::now(),
        )
        .in_band(LoadBand::Heavy)
        .supported_by(MetricKind::OilPressure, -0.4);

        let record = insight_to_record(&insight);
        assert_eq!(record.tag_value("knowledge_type"), Some("trend"));
        assert!(record.field_str("insight_text").unwrap().starts_with("STAT:"));

        let back = insight_from_record(&record).unwrap();
        assert_eq!(back, insight);
    }

    #[test]
    fn test_query_filters() {
        let now = Utc::now();
        let old = Insight::ai(KnowledgeType::Pattern, "recurring", now - Duration::hours(48));
        let fresh = Insight::statistical(
            KnowledgeType::Trend,
            "x",
            InsightConfidence::Medium,
            now,
        )
        .in_band(LoadBand::Light);

        let recent = InsightQuery {
            since_hours: Some(24),
            ..Default::default()
        };
        assert!(recent.matches(&fresh, now));
        assert!(!recent.matches(&old, now));

        let light_trends = InsightQuery {
            knowledge_type: Some(KnowledgeType::Trend),
            load_band: Some(LoadBand::Light),
            since_hours: None,
        };
        assert!(light_trends.matches(&fresh, now));
        assert!(!light_trends.matches(&old, now));
    }
}
