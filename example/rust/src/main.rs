use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ab_testing::{
    Engine, EngineConfig, EventDetails, FileStore, PartialContext, TracingSink, loader,
};
use tracing_subscriber::EnvFilter;

/// An example usage of the A/B testing engine
/// Loads the definitions in `../definitions`, buckets a handful of users,
/// records conversions for some of them and prints the engine state.
///
/// Assignments are kept in `ab-testing-example.json` in the temp directory,
/// so reruns show the same variants. Events are logged through `tracing`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let definitions = Path::new(env!("CARGO_MANIFEST_DIR")).join("../definitions");
    let tests = loader::load_tests(&definitions)?;

    let store_path = std::env::temp_dir().join("ab-testing-example.json");
    let engine = Engine::builder(
        Arc::new(FileStore::new(&store_path)),
        Arc::new(TracingSink),
    )
    .config(EngineConfig::from_env().with_flush_interval(Duration::from_secs(1)))
    .build();

    let report = engine.initialize(tests).await;
    println!(
        "registered {} tests, restored {} subjects from {}",
        report.registered,
        report.restored_subjects,
        store_path.display()
    );

    for user in ["alice", "bob", "carol", "dave"] {
        let context = PartialContext::new()
            .user(user)
            .url("https://shop.example.com/checkout");
        let banner = engine.get_variant("promo-banner", Some(context.clone()));
        let beta = engine.get_variant("beta-feature", Some(context.clone()));
        println!(
            "{user:>6}: promo-banner={} ({:?}) config={} | beta-feature={} in_test={}",
            banner.variant_id,
            banner.source,
            banner.config.unwrap_or_default(),
            beta.variant_id,
            beta.in_test,
        );

        if banner.variant_id == "B" {
            engine.track_conversion(
                "promo-banner",
                EventDetails::named("purchase").value(42.0),
                Some(context),
            );
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    println!("{}", serde_json::to_string_pretty(&engine.get_debug_info())?);
    engine.shutdown().await;
    Ok(())
}
