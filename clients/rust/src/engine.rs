//! The assignment engine: ties registry, targeting, bucketing, assignment
//! storage and event delivery together behind one cloneable handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ConfigurationError;
use crate::assignment::{AssignmentResult, AssignmentSource, Assignments, ExclusionReason, decide};
use crate::config::EngineConfig;
use crate::context::{ContextProvider, PartialContext, StaticContextProvider, UserContext};
use crate::events::{Event, EventDetails, EventType};
use crate::model::Test;
use crate::registry::TestRegistry;
use crate::scheduler::{EventPipeline, FlushOutcome, FlushScheduler};
use crate::sink::AnalyticsSink;
use crate::store::{AssignmentPersister, AssignmentStore};
use crate::targeting::{CustomPredicate, RuleType, TargetingEvaluator};
use crate::testing::OverrideGuard;

/// Source of the current time for schedule windows and event timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Summary of one [`Engine::initialize`] call.
#[derive(Debug)]
pub struct InitReport {
    pub registered: usize,
    pub rejected: Vec<(String, ConfigurationError)>,
    pub restored_subjects: usize,
}

/// Diagnostic snapshot. The shape is not a stable contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub initialized: bool,
    pub tests: usize,
    pub active_tests: usize,
    pub subjects: usize,
    pub assignments: usize,
    pub queued_events: usize,
    pub flush_in_progress: bool,
    pub config: EngineConfig,
}

pub struct EngineBuilder {
    store: Arc<dyn AssignmentStore>,
    sink: Arc<dyn AnalyticsSink>,
    config: EngineConfig,
    provider: Option<Arc<dyn ContextProvider>>,
    clock: Arc<dyn Clock>,
    predicates: HashMap<String, CustomPredicate>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context_provider(mut self, provider: impl ContextProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Register a predicate that `custom` rules with `key = name` bind to.
    pub fn predicate<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&UserContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), CustomPredicate::new(f));
        self
    }

    pub fn build(self) -> Engine {
        let pipeline = Arc::new(EventPipeline::new(
            self.sink,
            self.config.max_queue_size,
            self.config.delivery_timeout,
        ));
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(StaticContextProvider::default()));
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                registry: TestRegistry::new(),
                evaluator: TargetingEvaluator::new(),
                assignments: Arc::new(RwLock::new(Assignments::new())),
                overrides: RwLock::new(HashMap::new()),
                pipeline,
                store: self.store,
                persister: AssignmentPersister::new(),
                provider,
                clock: self.clock,
                predicates: self.predicates,
                scheduler: Mutex::new(None),
                initialized: AtomicBool::new(false),
            }),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    registry: TestRegistry,
    evaluator: TargetingEvaluator,
    assignments: Arc<RwLock<Assignments>>,
    overrides: RwLock<HashMap<String, String>>,
    pipeline: Arc<EventPipeline>,
    store: Arc<dyn AssignmentStore>,
    persister: AssignmentPersister,
    provider: Arc<dyn ContextProvider>,
    clock: Arc<dyn Clock>,
    predicates: HashMap<String, CustomPredicate>,
    scheduler: Mutex<Option<FlushScheduler>>,
    initialized: AtomicBool,
}

/// Handle to a shared engine. Clones refer to the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder(
        store: Arc<dyn AssignmentStore>,
        sink: Arc<dyn AnalyticsSink>,
    ) -> EngineBuilder {
        EngineBuilder {
            store,
            sink,
            config: EngineConfig::default(),
            provider: None,
            clock: Arc::new(SystemClock),
            predicates: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register `tests`, restore saved assignments and start background work.
    ///
    /// Must run inside a tokio runtime. A failing store load is logged and the
    /// engine starts with no saved assignments.
    pub async fn initialize(&self, tests: Vec<Test>) -> InitReport {
        let tests: Vec<Test> = tests.into_iter().map(|t| self.bind_predicates(t)).collect();
        let submitted = tests.len();
        let rejected = self.inner.registry.load(tests);
        for (test_id, e) in &rejected {
            warn!(test_id = %test_id, error = %e, "rejected test definition");
        }

        let restored_subjects = match self.inner.store.load().await {
            Ok(saved) => {
                let mut assignments = self.write_assignments();
                for (subject, test, variant) in saved.iter() {
                    assignments.insert(subject, test, variant);
                }
                saved.subjects()
            }
            Err(e) => {
                warn!(error = %e, "failed to load saved assignments, starting empty");
                0
            }
        };

        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            if self.inner.config.persist_assignments {
                self.inner.persister.start(
                    Arc::clone(&self.inner.store),
                    Arc::clone(&self.inner.assignments),
                );
            }
            let scheduler = FlushScheduler::start(
                Arc::clone(&self.inner.pipeline),
                self.inner.config.flush_interval,
            );
            *self.inner.scheduler.lock().unwrap_or_else(|p| p.into_inner()) = Some(scheduler);
        }

        let report = InitReport {
            registered: submitted - rejected.len(),
            rejected,
            restored_subjects,
        };
        info!(
            registered = report.registered,
            rejected = report.rejected.len(),
            restored_subjects,
            "ab testing engine initialized"
        );
        report
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Stop the flush timer, deliver what is queued and save the last
    /// assignment snapshot.
    pub async fn shutdown(&self) {
        let scheduler = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        if self.inner.config.flush_on_shutdown
            && let FlushOutcome::Requeued(events) = self.flush().await
        {
            warn!(events, "events still undelivered at shutdown");
        }
        self.inner.persister.stop().await;
        self.inner.initialized.store(false, Ordering::SeqCst);
        info!("ab testing engine shut down");
    }

    // Registry

    /// Register or replace a test.
    ///
    /// # Errors
    /// Returns why the definition was rejected; nothing is registered then.
    pub fn add_test(&self, test: Test) -> Result<(), ConfigurationError> {
        let test = self.bind_predicates(test);
        self.inner.registry.add(test)
    }

    pub fn remove_test(&self, test_id: &str) -> Option<Arc<Test>> {
        self.inner.registry.remove(test_id)
    }

    pub fn get_test(&self, test_id: &str) -> Option<Arc<Test>> {
        self.inner.registry.get(test_id)
    }

    pub fn get_all_tests(&self) -> Vec<Arc<Test>> {
        self.inner.registry.all()
    }

    pub fn get_active_tests(&self) -> Vec<Arc<Test>> {
        self.inner.registry.active()
    }

    fn bind_predicates(&self, mut test: Test) -> Test {
        for rule in &mut test.targeting_rules {
            if rule.kind != RuleType::Custom || rule.predicate.is_some() {
                continue;
            }
            let Some(name) = rule.key.as_deref() else {
                continue;
            };
            match self.inner.predicates.get(name) {
                Some(predicate) => rule.predicate = Some(predicate.clone()),
                None => warn!(test_id = %test.id, predicate = name, "no predicate registered under this name"),
            }
        }
        test
    }

    // Assignment

    /// Variant for `test_id` and the subject described by `context`.
    ///
    /// Unknown tests and every other reason to leave the subject out yield a
    /// not-in-test result with the `"control"` variant id.
    pub fn get_variant(&self, test_id: &str, context: Option<PartialContext>) -> AssignmentResult {
        let Some(test) = self.inner.registry.get(test_id) else {
            debug!(test_id, "variant requested for unknown test");
            return AssignmentResult::excluded(test_id, ExclusionReason::UnknownTest);
        };
        let context = self.inner.provider.provide(context);
        self.resolve(&test, &context)
    }

    /// Resolve `test` for an already complete context.
    pub fn resolve(&self, test: &Test, context: &UserContext) -> AssignmentResult {
        if !test.is_running() {
            return AssignmentResult::excluded(&test.id, ExclusionReason::NotRunning);
        }
        if let Some(forced) = self.forced_variant(&test.id)
            && test.variant(&forced).is_some()
        {
            return AssignmentResult::assigned(test, &forced, AssignmentSource::Forced);
        }
        if !test.in_schedule(self.inner.clock.now()) {
            return AssignmentResult::excluded(&test.id, ExclusionReason::OutsideSchedule);
        }
        if !test.url_allowed(&context.url) {
            return AssignmentResult::excluded(&test.id, ExclusionReason::UrlFilter);
        }
        if !self.inner.evaluator.matches(test, context) {
            return AssignmentResult::excluded(&test.id, ExclusionReason::Targeting);
        }

        let subject_id = context.subject_id();
        if let Some(existing) = self.assignment_for(subject_id, &test.id) {
            return AssignmentResult::assigned(test, &existing, AssignmentSource::Sticky);
        }

        let decision = decide(test, subject_id, &self.inner.config.hash_salt);
        let Some(variant) = decision.variant else {
            return AssignmentResult::excluded(&test.id, ExclusionReason::TrafficAllocation);
        };

        {
            let mut assignments = self.write_assignments();
            if !assignments.insert(subject_id, &test.id, &variant.id) {
                // another caller bucketed this subject first
                let winner = assignments
                    .get(subject_id, &test.id)
                    .unwrap_or(variant.id.as_str())
                    .to_string();
                return AssignmentResult::assigned(test, &winner, AssignmentSource::Sticky);
            }
        }
        if self.inner.config.persist_assignments && !self.inner.persister.mark_changed() {
            debug!(test_id = %test.id, "assignment writer not running, keeping assignment in memory");
        }

        debug!(
            test_id = %test.id,
            subject_id,
            variant_id = %variant.id,
            bucket = ?decision.variant_bucket,
            "assigned new variant"
        );
        self.track_event(&test.id, &variant.id, EventType::Impression, EventDetails::default());
        AssignmentResult::assigned(test, &variant.id, AssignmentSource::New)
    }

    /// Stored variant for a subject, if any.
    pub fn assignment_for(&self, subject_id: &str, test_id: &str) -> Option<String> {
        self.inner
            .assignments
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(subject_id, test_id)
            .map(str::to_string)
    }

    pub fn assignments(&self) -> Assignments {
        self.inner
            .assignments
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn write_assignments(&self) -> std::sync::RwLockWriteGuard<'_, Assignments> {
        self.inner
            .assignments
            .write()
            .unwrap_or_else(|p| p.into_inner())
    }

    // Events

    /// Queue an event. Delivery failures are retried by later flushes and
    /// never reported here.
    pub fn track_event(
        &self,
        test_id: &str,
        variant_id: &str,
        event_type: EventType,
        details: EventDetails,
    ) {
        let event = Event::new(test_id, variant_id, event_type, details, self.inner.clock.now());
        self.inner.pipeline.track(event);
    }

    /// Record a conversion against the subject's stored assignment.
    ///
    /// Returns `false`, recording nothing, when the subject has no assignment
    /// for the test.
    pub fn track_conversion(
        &self,
        test_id: &str,
        details: EventDetails,
        context: Option<PartialContext>,
    ) -> bool {
        let context = self.inner.provider.provide(context);
        let Some(variant_id) = self.assignment_for(context.subject_id(), test_id) else {
            debug!(test_id, subject_id = context.subject_id(), "conversion without assignment ignored");
            return false;
        };
        self.track_event(test_id, &variant_id, EventType::Conversion, details);
        true
    }

    /// Deliver queued events now.
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.pipeline.flush().await
    }

    pub fn queued_events(&self) -> Vec<Event> {
        self.inner.pipeline.queued_events()
    }

    // Overrides

    /// Force variants for local testing until the returned guard is dropped.
    ///
    /// # Errors
    /// Every pair is checked before any is installed; an unknown test or
    /// variant rejects the whole call.
    pub fn override_variants(
        &self,
        forced: &[(&str, &str)],
    ) -> Result<OverrideGuard, ConfigurationError> {
        crate::testing::install_overrides(self, forced)
    }

    pub(crate) fn overrides(&self) -> &RwLock<HashMap<String, String>> {
        &self.inner.overrides
    }

    fn forced_variant(&self, test_id: &str) -> Option<String> {
        self.inner
            .overrides
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(test_id)
            .cloned()
    }

    pub fn get_debug_info(&self) -> DebugInfo {
        let (subjects, assignments) = {
            let a = self
                .inner
                .assignments
                .read()
                .unwrap_or_else(|p| p.into_inner());
            (a.subjects(), a.len())
        };
        DebugInfo {
            initialized: self.is_initialized(),
            tests: self.inner.registry.len(),
            active_tests: self.inner.registry.active().len(),
            subjects,
            assignments,
            queued_events: self.inner.pipeline.queued(),
            flush_in_progress: self.inner.pipeline.flush_in_progress(),
            config: self.inner.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TestStatus, Variant};
    use crate::sink::MemorySink;
    use crate::store::MemoryStore;
    use crate::targeting::{Operator, TargetingRule};
    use chrono::TimeZone;

    fn promo() -> Test {
        Test::new(
            "promo-banner",
            vec![Variant::new("A", 50.0).control(), Variant::new("B", 50.0)],
        )
    }

    fn engine() -> (Engine, Arc<MemoryStore>, Arc<MemorySink>) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemorySink::new());
        let engine = Engine::builder(store.clone(), sink.clone())
            .config(EngineConfig::default().with_max_queue_size(0))
            .build();
        (engine, store, sink)
    }

    fn as_user(user: &str) -> Option<PartialContext> {
        Some(PartialContext::new().user(user))
    }

    #[test]
    fn test_unknown_test_is_excluded() {
        let (engine, _, _) = engine();
        let result = engine.get_variant("missing", as_user("u1"));
        assert!(!result.in_test);
        assert_eq!(result.variant_id, "control");
        assert_eq!(result.exclusion(), Some(ExclusionReason::UnknownTest));
    }

    #[test]
    fn test_not_running_is_excluded() {
        let (engine, _, _) = engine();
        engine
            .add_test(promo().with_status(TestStatus::Paused))
            .unwrap();
        let result = engine.get_variant("promo-banner", as_user("u1"));
        assert_eq!(result.exclusion(), Some(ExclusionReason::NotRunning));
        assert!(engine.assignments().is_empty());
    }

    #[test]
    fn test_new_then_sticky() {
        let (engine, _, _) = engine();
        engine.add_test(promo()).unwrap();

        let first = engine.get_variant("promo-banner", as_user("u1"));
        assert!(first.in_test);
        assert_eq!(first.source, AssignmentSource::New);
        assert_eq!(first.variant_id, "B");

        let second = engine.get_variant("promo-banner", as_user("u1"));
        assert_eq!(second.variant_id, first.variant_id);
        assert_eq!(second.source, AssignmentSource::Sticky);

        let impressions = engine.queued_events();
        assert_eq!(impressions.len(), 1);
        assert_eq!(impressions[0].event_type, EventType::Impression);
        assert_eq!(impressions[0].variant_id, "B");
    }

    #[test]
    fn test_targeting_rejection() {
        let (engine, _, _) = engine();
        engine
            .add_test(promo().with_rule(TargetingRule::new(
                RuleType::Url,
                Operator::Contains,
                "/checkout",
            )))
            .unwrap();
        let result = engine.get_variant(
            "promo-banner",
            Some(PartialContext::new().user("u1").url("https://shop.test/home")),
        );
        assert_eq!(result.exclusion(), Some(ExclusionReason::Targeting));
        assert!(engine.queued_events().is_empty());
    }

    #[test]
    fn test_schedule_window() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemorySink::new());
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
        let engine = Engine::builder(store, sink).clock(clock.clone()).build();
        engine
            .add_test(promo().with_schedule(Some(start), Some(end)))
            .unwrap();

        let early = engine.get_variant("promo-banner", as_user("u1"));
        assert_eq!(early.exclusion(), Some(ExclusionReason::OutsideSchedule));

        clock.set(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
        assert!(engine.get_variant("promo-banner", as_user("u1")).in_test);

        clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
        let late = engine.get_variant("promo-banner", as_user("u1"));
        assert_eq!(late.exclusion(), Some(ExclusionReason::OutsideSchedule));
    }

    #[test]
    fn test_url_filters() {
        let (engine, _, _) = engine();
        engine
            .add_test(promo().with_url_filters(vec!["/shop".into()], vec!["/shop/admin".into()]))
            .unwrap();
        let ctx = |url: &str| Some(PartialContext::new().user("u1").url(url));

        assert!(engine.get_variant("promo-banner", ctx("https://x.test/shop/item")).in_test);
        assert_eq!(
            engine
                .get_variant("promo-banner", ctx("https://x.test/shop/admin"))
                .exclusion(),
            Some(ExclusionReason::UrlFilter)
        );
        assert_eq!(
            engine.get_variant("promo-banner", ctx("https://x.test/blog")).exclusion(),
            Some(ExclusionReason::UrlFilter)
        );
    }

    #[test]
    fn test_zero_traffic_persists_nothing() {
        let (engine, _, _) = engine();
        engine
            .add_test(promo().with_traffic_allocation(0.0))
            .unwrap();
        for i in 0..50 {
            let result = engine.get_variant("promo-banner", as_user(&format!("u{i}")));
            assert_eq!(result.exclusion(), Some(ExclusionReason::TrafficAllocation));
        }
        assert!(engine.assignments().is_empty());
        assert!(engine.queued_events().is_empty());
    }

    #[test]
    fn test_user_id_takes_precedence_over_session() {
        let (engine, _, _) = engine();
        engine.add_test(promo()).unwrap();
        let by_user = engine.get_variant(
            "promo-banner",
            Some(PartialContext::new().session("sess_1").user("u1")),
        );
        assert_eq!(by_user.variant_id, "B");
        assert_eq!(engine.assignment_for("u1", "promo-banner").as_deref(), Some("B"));
        assert!(engine.assignment_for("sess_1", "promo-banner").is_none());
    }

    #[test]
    fn test_conversion_requires_assignment() {
        let (engine, _, _) = engine();
        engine.add_test(promo()).unwrap();

        assert!(!engine.track_conversion("promo-banner", EventDetails::named("buy"), as_user("u1")));
        assert!(engine.queued_events().is_empty());

        engine.get_variant("promo-banner", as_user("u1"));
        assert!(engine.track_conversion(
            "promo-banner",
            EventDetails::named("buy").value(12.5),
            as_user("u1")
        ));
        let events = engine.queued_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::Conversion);
        assert_eq!(events[1].variant_id, "B");
        assert_eq!(events[1].value, Some(12.5));
    }

    #[test]
    fn test_named_predicate_binding() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemorySink::new());
        let engine = Engine::builder(store, sink)
            .predicate("is-staff", |ctx| {
                Ok(ctx.custom.get("staff") == Some(&serde_json::json!(true)))
            })
            .build();
        let rule: TargetingRule = serde_json::from_value(serde_json::json!({
            "type": "custom",
            "operator": "equals",
            "key": "is-staff"
        }))
        .unwrap();
        engine.add_test(promo().with_rule(rule)).unwrap();

        let staff = PartialContext::new()
            .user("u1")
            .custom(HashMap::from([("staff".to_string(), serde_json::json!(true))]));
        assert!(engine.get_variant("promo-banner", Some(staff)).in_test);
        assert_eq!(
            engine.get_variant("promo-banner", as_user("u2")).exclusion(),
            Some(ExclusionReason::Targeting)
        );
    }

    #[test]
    fn test_overrides_forced_and_restored() {
        let (engine, _, _) = engine();
        engine.add_test(promo()).unwrap();
        {
            let _guard = engine.override_variants(&[("promo-banner", "A")]).unwrap();
            let forced = engine.get_variant("promo-banner", as_user("u1"));
            assert_eq!(forced.variant_id, "A");
            assert_eq!(forced.source, AssignmentSource::Forced);
            assert!(engine.assignments().is_empty());
            assert!(engine.queued_events().is_empty());
        }
        let natural = engine.get_variant("promo-banner", as_user("u1"));
        assert_eq!(natural.variant_id, "B");
        assert_eq!(natural.source, AssignmentSource::New);
    }

    #[test]
    fn test_override_validation() {
        let (engine, _, _) = engine();
        engine.add_test(promo()).unwrap();
        assert!(matches!(
            engine.override_variants(&[("missing", "A")]),
            Err(ConfigurationError::UnknownTest { .. })
        ));
        assert!(matches!(
            engine.override_variants(&[("promo-banner", "Z")]),
            Err(ConfigurationError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn test_debug_info() {
        let (engine, _, _) = engine();
        engine.add_test(promo()).unwrap();
        engine
            .add_test(Test::new("draft", vec![Variant::new("A", 100.0)]).with_status(TestStatus::Draft))
            .unwrap();
        engine.get_variant("promo-banner", as_user("u1"));
        engine.get_variant("promo-banner", as_user("u2"));

        let info = engine.get_debug_info();
        assert!(!info.initialized);
        assert_eq!(info.tests, 2);
        assert_eq!(info.active_tests, 1);
        assert_eq!(info.subjects, 2);
        assert_eq!(info.assignments, 2);
        assert_eq!(info.queued_events, 2);
        assert!(!info.flush_in_progress);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["config"]["hash_salt"], "ab-testing");
    }

    #[tokio::test]
    async fn test_initialize_reports_and_restores() {
        let mut saved = Assignments::new();
        saved.insert("u1", "promo-banner", "A");
        saved.insert("u9", "gone", "X");
        let store = Arc::new(MemoryStore::with_assignments(saved));
        let sink = Arc::new(MemorySink::new());
        let engine = Engine::builder(store, sink).build();

        let report = engine
            .initialize(vec![promo(), Test::new("empty", vec![])])
            .await;
        assert_eq!(report.registered, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "empty");
        assert_eq!(report.restored_subjects, 2);

        // saved assignment wins over what the hash would pick
        let result = engine.get_variant("promo-banner", as_user("u1"));
        assert_eq!(result.variant_id, "A");
        assert_eq!(result.source, AssignmentSource::Sticky);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_survives_store_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let sink = Arc::new(MemorySink::new());
        let engine = Engine::builder(store, sink).build();

        let report = engine.initialize(vec![promo()]).await;
        assert_eq!(report.restored_subjects, 0);
        assert!(engine.is_initialized());
        assert!(engine.get_variant("promo-banner", as_user("u1")).in_test);
        engine.shutdown().await;
        assert!(!engine.is_initialized());
    }
}
