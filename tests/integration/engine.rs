use std::sync::Arc;
use std::time::Duration;

use ctlpkg::api::{ConditionStatus, Package, PackageType};
use ctlpkg::config::{ManagerConfig, Timers};
use ctlpkg::engine::Engine;
use ctlpkg::pkg::NopCache;
use tokio::sync::watch;

use crate::common::{Harness, digest, package_health};

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        timers: Timers {
            short_wait_secs: 1,
            very_short_wait_secs: 1,
            ..Timers::default()
        },
        ..ManagerConfig::default()
    }
}

async fn healthy(h: &Harness, name: &str) -> bool {
    h.package(name).await.is_some_and(|p| package_health(&p) == ConditionStatus::True)
}

#[tokio::test]
async fn test_engine_installs_package_with_dependency() {
    let h = Harness::new();
    h.fetcher.set_tags("reg.io/org/dep", &["v1.0.0", "v1.2.0"]);
    h.publish(
        "reg.io/org/dep:v1.2.0",
        &digest(2),
        ctlpkg::test_utils::provider_stream("dep", &[]),
    );
    h.publish(
        "reg.io/org/app:v1.0.0",
        &digest(1),
        ctlpkg::test_utils::provider_stream("app", &[("reg.io/org/dep", ">=1.0.0")]),
    );

    let engine = Engine::new(
        h.client.clone(),
        h.fetcher.clone(),
        Arc::new(NopCache),
        h.recorder.clone(),
        fast_config(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(engine.run(shutdown_rx));

    h.create_provider("app", "reg.io/org/app:v1.0.0").await;

    let converged = tokio::time::timeout(Duration::from_secs(30), async {
        while !(healthy(&h, "app").await && healthy(&h, "org-dep").await) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();
    assert!(converged.is_ok(), "engine did not converge: {:?}", h.recorder.messages());

    let providers: Vec<Package> =
        h.client.list(PackageType::Provider.as_str(), &Default::default()).await.unwrap();
    assert_eq!(providers.len(), 2);
    let dep = h.package("org-dep").await.unwrap();
    assert_eq!(dep.source(), "reg.io/org/dep:v1.2.0");
    assert_eq!(h.lock().await.unwrap().packages.len(), 2);
}
