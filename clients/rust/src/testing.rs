//! Forcing variants for local testing and QA.
//!
//! # Example
//!
//! ```rust,ignore
//! use ab_testing::Engine;
//!
//! #[tokio::test]
//! async fn test_checkout_variant_b() {
//!     let engine = build_engine().await;
//!
//!     let _guard = engine.override_variants(&[("checkout-flow", "B")]).unwrap();
//!     assert_eq!(engine.get_variant("checkout-flow", None).variant_id, "B");
//! }
//! ```
//!
//! Forced results are in-test with the variant's config but are neither
//! stored as assignments nor tracked as impressions.

use crate::ConfigurationError;
use crate::engine::Engine;

/// Guard that restores overrides when dropped.
#[must_use = "overrides are removed when the guard is dropped"]
pub struct OverrideGuard {
    engine: Engine,
    previous: Vec<(String, Option<String>)>,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        let mut overrides = self
            .engine
            .overrides()
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (test_id, prev_variant) in self.previous.drain(..).rev() {
            match prev_variant {
                Some(variant_id) => {
                    overrides.insert(test_id, variant_id);
                }
                None => {
                    overrides.remove(&test_id);
                }
            }
        }
    }
}

/// Validate every `(test, variant)` pair against the registry, then install
/// them all. Nothing is installed if any pair is invalid.
pub(crate) fn install_overrides(
    engine: &Engine,
    forced: &[(&str, &str)],
) -> Result<OverrideGuard, ConfigurationError> {
    for &(test_id, variant_id) in forced {
        let test = engine
            .get_test(test_id)
            .ok_or_else(|| ConfigurationError::UnknownTest {
                test_id: test_id.to_string(),
            })?;
        if test.variant(variant_id).is_none() {
            return Err(ConfigurationError::UnknownVariant {
                test_id: test_id.to_string(),
                variant_id: variant_id.to_string(),
            });
        }
    }

    let mut overrides = engine
        .overrides()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous = forced
        .iter()
        .map(|&(test_id, variant_id)| {
            let prev = overrides.insert(test_id.to_string(), variant_id.to_string());
            (test_id.to_string(), prev)
        })
        .collect();
    drop(overrides);

    Ok(OverrideGuard {
        engine: engine.clone(),
        previous,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::assignment::AssignmentSource;
    use crate::context::PartialContext;
    use crate::model::{Test, Variant};
    use crate::sink::MemorySink;
    use crate::store::MemoryStore;

    fn engine() -> Engine {
        let engine = Engine::builder(Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()))
            .build();
        engine
            .add_test(Test::new(
                "checkout",
                vec![
                    Variant::new("A", 34.0).control(),
                    Variant::new("B", 33.0),
                    Variant::new("C", 33.0),
                ],
            ))
            .unwrap();
        engine
    }

    fn variant(engine: &Engine) -> String {
        engine
            .get_variant("checkout", Some(PartialContext::new().user("qa")))
            .variant_id
    }

    #[test]
    fn test_nested_overrides() {
        let engine = engine();
        {
            let _outer = engine.override_variants(&[("checkout", "B")]).unwrap();
            assert_eq!(variant(&engine), "B");
            {
                let _inner = engine.override_variants(&[("checkout", "C")]).unwrap();
                assert_eq!(variant(&engine), "C");
            }
            assert_eq!(variant(&engine), "B");
        }
        let result = engine.get_variant("checkout", Some(PartialContext::new().user("qa")));
        assert_ne!(result.source, AssignmentSource::Forced);
    }

    #[test]
    fn test_same_test_twice_in_one_call() {
        let engine = engine();
        {
            let _guard = engine
                .override_variants(&[("checkout", "B"), ("checkout", "C")])
                .unwrap();
            assert_eq!(variant(&engine), "C");
        }
        assert!(engine.overrides().read().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_pair_installs_nothing() {
        let engine = engine();
        assert!(
            engine
                .override_variants(&[("checkout", "B"), ("checkout", "nope")])
                .is_err()
        );
        assert!(engine.overrides().read().unwrap().is_empty());
    }

    #[test]
    fn test_override_removed_test_falls_through() {
        let engine = engine();
        let _guard = engine.override_variants(&[("checkout", "B")]).unwrap();
        engine.remove_test("checkout");
        let result = engine.get_variant("checkout", None);
        assert!(!result.in_test);
    }
}
