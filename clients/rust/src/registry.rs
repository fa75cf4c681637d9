//! In-memory set of test definitions.
//!
//! Reads take a lock-free snapshot; writes copy the map and swap it in, so a
//! `get_variant` call never observes a half-applied update.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use tracing::warn;

use crate::ConfigurationError;
use crate::model::Test;
use crate::targeting::{Operator, RuleType};

type TestMap = BTreeMap<String, Arc<Test>>;

/// Tests keyed by id.
#[derive(Debug)]
pub struct TestRegistry {
    tests: ArcSwap<TestMap>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self {
            tests: ArcSwap::from_pointee(TestMap::new()),
        }
    }

    /// Merge `tests` into the registry, replacing same-id entries.
    ///
    /// Invalid tests are skipped individually and returned with their error.
    pub fn load(
        &self,
        tests: impl IntoIterator<Item = Test>,
    ) -> Vec<(String, ConfigurationError)> {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for test in tests {
            match validate_test(&test) {
                Ok(()) => accepted.push(Arc::new(test)),
                Err(e) => rejected.push((test.id.clone(), e)),
            }
        }
        if !accepted.is_empty() {
            self.tests.rcu(|current| {
                let mut next = TestMap::clone(current);
                for test in &accepted {
                    next.insert(test.id.clone(), Arc::clone(test));
                }
                next
            });
        }
        rejected
    }

    /// Register or replace one test.
    ///
    /// # Errors
    /// Returns the reason the definition is malformed; the registry is unchanged.
    pub fn add(&self, test: Test) -> Result<(), ConfigurationError> {
        validate_test(&test)?;
        let test = Arc::new(test);
        self.tests.rcu(|current| {
            let mut next = TestMap::clone(current);
            next.insert(test.id.clone(), Arc::clone(&test));
            next
        });
        Ok(())
    }

    /// Remove a test, returning it if it was registered.
    pub fn remove(&self, test_id: &str) -> Option<Arc<Test>> {
        let previous = self.tests.rcu(|current| {
            let mut next = TestMap::clone(current);
            next.remove(test_id);
            next
        });
        previous.get(test_id).cloned()
    }

    pub fn get(&self, test_id: &str) -> Option<Arc<Test>> {
        self.tests.load().get(test_id).cloned()
    }

    /// All tests ordered by id.
    pub fn all(&self) -> Vec<Arc<Test>> {
        self.tests.load().values().cloned().collect()
    }

    /// Tests currently in the running state, ordered by id.
    pub fn active(&self) -> Vec<Arc<Test>> {
        self.tests
            .load()
            .values()
            .filter(|t| t.is_running())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tests.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.load().is_empty()
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject definitions the engine can't assign from.
///
/// More than one control variant and rules that can never match are logged
/// but accepted.
pub fn validate_test(test: &Test) -> Result<(), ConfigurationError> {
    if test.id.is_empty() {
        return Err(ConfigurationError::EmptyTestId);
    }
    if test.variants.is_empty() {
        return Err(ConfigurationError::NoVariants {
            test_id: test.id.clone(),
        });
    }
    if !(0.0..=100.0).contains(&test.traffic_allocation) {
        return Err(ConfigurationError::InvalidTrafficAllocation {
            test_id: test.id.clone(),
            value: test.traffic_allocation,
        });
    }

    let mut seen = HashSet::new();
    for variant in &test.variants {
        if !seen.insert(variant.id.as_str()) {
            return Err(ConfigurationError::DuplicateVariant {
                test_id: test.id.clone(),
                variant_id: variant.id.clone(),
            });
        }
        if !(0.0..=100.0).contains(&variant.weight) {
            return Err(ConfigurationError::InvalidWeight {
                test_id: test.id.clone(),
                variant_id: variant.id.clone(),
                weight: variant.weight,
            });
        }
    }

    let controls = test.variants.iter().filter(|v| v.is_control).count();
    if controls > 1 {
        warn!(test_id = %test.id, controls, "test declares more than one control variant");
    }

    for rule in &test.targeting_rules {
        if rule.operator == Operator::Regex && rule.kind != RuleType::Custom {
            for pattern in rule.value.values() {
                Regex::new(pattern).map_err(|source| ConfigurationError::InvalidPattern {
                    test_id: test.id.clone(),
                    pattern: pattern.clone(),
                    source,
                })?;
            }
        }
        if !rule.is_evaluable() {
            warn!(
                test_id = %test.id,
                rule_type = %rule.kind,
                operator = %rule.operator,
                "targeting rule will never match"
            );
        }
    }
    Ok(())
}
