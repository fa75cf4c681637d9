//! Test and variant definitions.
//!
//! Field names serialize in camelCase so definitions validated by
//! `ab-testing-validation` deserialize directly into these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::targeting::TargetingRule;

/// Lifecycle status of a test. Only `Running` tests assign variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

/// One alternative configuration of a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Proportional weight in `[0, 100]`. Siblings need not sum to 100.
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JsonValue>,
    #[serde(default)]
    pub is_control: bool,
}

impl Variant {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            weight,
            config: None,
            is_control: false,
        }
    }

    pub fn control(mut self) -> Self {
        self.is_control = true;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = Some(config);
        self
    }
}

/// An experiment definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TestStatus,
    pub variants: Vec<Variant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targeting_rules: Vec<TargetingRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_urls: Vec<String>,
    /// Percentage of matching subjects entering the test, in `[0, 100]`.
    pub traffic_allocation: f64,
}

impl Test {
    /// A running test with full traffic allocation and no targeting.
    pub fn new(id: impl Into<String>, variants: Vec<Variant>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            status: TestStatus::Running,
            variants,
            targeting_rules: Vec::new(),
            metrics: Vec::new(),
            start_date: None,
            end_date: None,
            include_urls: Vec::new(),
            exclude_urls: Vec::new(),
            traffic_allocation: 100.0,
        }
    }

    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_traffic_allocation(mut self, allocation: f64) -> Self {
        self.traffic_allocation = allocation;
        self
    }

    pub fn with_rule(mut self, rule: TargetingRule) -> Self {
        self.targeting_rules.push(rule);
        self
    }

    pub fn with_schedule(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_url_filters(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.include_urls = include;
        self.exclude_urls = exclude;
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == TestStatus::Running
    }

    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// The variant absorbing buckets left uncovered when weights sum below 100:
    /// the one flagged as control, else the first declared.
    pub fn fallback_variant(&self) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.is_control)
            .or_else(|| self.variants.first())
    }

    /// Whether `now` falls inside the optional start/end window (inclusive).
    pub fn in_schedule(&self, now: DateTime<Utc>) -> bool {
        if self.start_date.is_some_and(|start| now < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| now > end) {
            return false;
        }
        true
    }

    /// Applies the URL filters: any exclude match rejects, and a non-empty
    /// include list requires at least one match. Matching is by substring.
    pub fn url_allowed(&self, url: &str) -> bool {
        if self.exclude_urls.iter().any(|pattern| url.contains(pattern.as_str())) {
            return false;
        }
        self.include_urls.is_empty()
            || self
                .include_urls
                .iter()
                .any(|pattern| url.contains(pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn two_way() -> Test {
        Test::new(
            "promo-banner",
            vec![Variant::new("A", 50.0).control(), Variant::new("B", 50.0)],
        )
    }

    #[test]
    fn test_deserialize_camel_case() {
        let test: Test = serde_json::from_value(json!({
            "id": "promo-banner",
            "name": "Promo banner",
            "status": "running",
            "trafficAllocation": 25,
            "variants": [
                {"id": "A", "name": "Control", "weight": 50, "isControl": true},
                {"id": "B", "name": "Red", "weight": 50, "config": {"color": "red"}}
            ],
            "includeUrls": ["/pricing"],
            "startDate": "2026-01-01T00:00:00Z"
        }))
        .unwrap();

        assert!(test.is_running());
        assert_eq!(test.traffic_allocation, 25.0);
        assert!(test.variants[0].is_control);
        assert_eq!(test.variants[1].config, Some(json!({"color": "red"})));
        assert_eq!(test.include_urls, vec!["/pricing".to_string()]);
        assert!(test.start_date.is_some());
        assert!(test.targeting_rules.is_empty());
    }

    #[test]
    fn test_fallback_prefers_control() {
        let test = Test::new(
            "t",
            vec![Variant::new("A", 10.0), Variant::new("B", 10.0).control()],
        );
        assert_eq!(test.fallback_variant().unwrap().id, "B");

        let no_control = Test::new("t", vec![Variant::new("A", 10.0), Variant::new("B", 10.0)]);
        assert_eq!(no_control.fallback_variant().unwrap().id, "A");
    }

    #[test]
    fn test_schedule_window() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap();
        let test = two_way().with_schedule(Some(start), Some(end));

        assert!(!test.in_schedule(Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()));
        assert!(test.in_schedule(start));
        assert!(test.in_schedule(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap()));
        assert!(!test.in_schedule(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()));
        assert!(two_way().in_schedule(start));
    }

    #[test]
    fn test_url_filters() {
        let test = two_way().with_url_filters(
            vec!["/pricing".to_string(), "/plans".to_string()],
            vec!["/pricing/enterprise".to_string()],
        );

        assert!(test.url_allowed("https://app.example.com/pricing"));
        assert!(test.url_allowed("https://app.example.com/plans?x=1"));
        assert!(!test.url_allowed("https://app.example.com/pricing/enterprise"));
        assert!(!test.url_allowed("https://app.example.com/home"));
        assert!(two_way().url_allowed("anything"));
    }
}
