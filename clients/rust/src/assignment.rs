//! Variant selection and the subject → test → variant assignment map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::hashing::{traffic_bucket, variant_bucket};
use crate::model::{Test, Variant};

/// Variant id reported for subjects outside a test.
pub const CONTROL_SENTINEL: &str = "control";

/// Durable `(subject, test) → variant` mapping.
///
/// Serializes as `{"<subject>": {"<test>": "<variant>"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignments {
    by_subject: BTreeMap<String, BTreeMap<String, String>>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject_id: &str, test_id: &str) -> Option<&str> {
        self.by_subject
            .get(subject_id)
            .and_then(|tests| tests.get(test_id))
            .map(String::as_str)
    }

    /// Record an assignment unless the subject already has one for the test.
    ///
    /// Returns `true` when the assignment was added.
    pub fn insert(
        &mut self,
        subject_id: impl Into<String>,
        test_id: impl Into<String>,
        variant_id: impl Into<String>,
    ) -> bool {
        let tests = self.by_subject.entry(subject_id.into()).or_default();
        match tests.entry(test_id.into()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(variant_id.into());
                true
            }
        }
    }

    /// Number of distinct subjects with at least one assignment.
    pub fn subjects(&self) -> usize {
        self.by_subject.len()
    }

    /// Total number of assignments across subjects.
    pub fn len(&self) -> usize {
        self.by_subject.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }

    /// Iterate `(subject, test, variant)` triples in subject then test order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.by_subject.iter().flat_map(|(subject, tests)| {
            tests
                .iter()
                .map(move |(test, variant)| (subject.as_str(), test.as_str(), variant.as_str()))
        })
    }
}

/// Whether a traffic bucket falls inside the test's allocation.
pub fn enters_traffic(test: &Test, bucket: u32) -> bool {
    f64::from(bucket) < test.traffic_allocation
}

/// Walk variants in declaration order accumulating weights; the first whose
/// cumulative weight exceeds `bucket` wins. Buckets beyond the total weight
/// fall back to the control variant, else the first one.
pub fn select_variant(test: &Test, bucket: u32) -> Option<&Variant> {
    let bucket = f64::from(bucket);
    let mut cumulative = 0.0;
    for variant in &test.variants {
        cumulative += variant.weight;
        if bucket < cumulative {
            return Some(variant);
        }
    }
    test.fallback_variant()
}

/// Outcome of bucketing one subject into one test, without any stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketDecision<'a> {
    pub traffic_bucket: u32,
    /// Present only when the subject entered the test.
    pub variant_bucket: Option<u32>,
    pub variant: Option<&'a Variant>,
}

impl BucketDecision<'_> {
    pub fn in_test(&self) -> bool {
        self.variant.is_some()
    }
}

/// Apply traffic gating then weighted selection for `subject_id`.
pub fn decide<'a>(test: &'a Test, subject_id: &str, salt: &str) -> BucketDecision<'a> {
    let traffic = traffic_bucket(subject_id, &test.id, salt);
    if !enters_traffic(test, traffic) {
        return BucketDecision {
            traffic_bucket: traffic,
            variant_bucket: None,
            variant: None,
        };
    }
    let bucket = variant_bucket(subject_id, &test.id, salt);
    BucketDecision {
        traffic_bucket: traffic,
        variant_bucket: Some(bucket),
        variant: select_variant(test, bucket),
    }
}

/// Why a subject was left out of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionReason {
    UnknownTest,
    NotRunning,
    OutsideSchedule,
    UrlFilter,
    Targeting,
    TrafficAllocation,
}

/// How an in-test variant was obtained, or why there is none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "reason")]
pub enum AssignmentSource {
    /// Bucketed on this call and persisted.
    New,
    /// Read back from an earlier assignment.
    Sticky,
    /// Installed through a local-testing override.
    Forced,
    Excluded(ExclusionReason),
}

/// The variant a subject should see for one test.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub test_id: String,
    pub variant_id: String,
    pub in_test: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<JsonValue>,
    pub source: AssignmentSource,
}

impl AssignmentResult {
    pub fn excluded(test_id: impl Into<String>, reason: ExclusionReason) -> Self {
        Self {
            test_id: test_id.into(),
            variant_id: CONTROL_SENTINEL.to_string(),
            in_test: false,
            config: None,
            source: AssignmentSource::Excluded(reason),
        }
    }

    pub(crate) fn assigned(test: &Test, variant_id: &str, source: AssignmentSource) -> Self {
        Self {
            test_id: test.id.clone(),
            variant_id: variant_id.to_string(),
            in_test: true,
            config: test.variant(variant_id).and_then(|v| v.config.clone()),
            source,
        }
    }

    pub fn exclusion(&self) -> Option<ExclusionReason> {
        match self.source {
            AssignmentSource::Excluded(reason) => Some(reason),
            _ => None,
        }
    }
}
