use std::time::Duration;

use ctlpkg::api::{ConditionStatus, Resource};
use ctlpkg::test_utils::provider_stream;

use crate::common::{Harness, digest, package_health, revision_health};

const APP: &str = "reg.io/org/app:v1.0.0";

/// Install `app`, which needs `reg.io/org/dep`, up to its first revision pass.
async fn install_app(h: &Harness, constraint: &str) -> String {
    h.publish(APP, &digest(1), provider_stream("app", &[("reg.io/org/dep", constraint)]));
    h.create_provider("app", APP).await;
    h.reconcile_package("app").await;
    let revision = h.revisions("app").await.remove(0);
    h.reconcile_revision(revision.name()).await;
    revision.name().to_string()
}

#[tokio::test]
async fn test_missing_dependency_is_installed() {
    let h = Harness::new();
    h.fetcher.set_tags("reg.io/org/dep", &["v0.9.0", "v1.0.0", "v1.1.0", "v2.0.0", "latest"]);
    h.publish("reg.io/org/dep:v1.1.0", &digest(2), provider_stream("dep", &[]));

    let app_revision = install_app(&h, ">=1.0.0 <2.0.0").await;
    let revision = h.revisions("app").await.remove(0);
    assert_eq!(revision_health(&revision), ConditionStatus::Unknown);
    assert_eq!(revision.status.found_dependencies, 1);
    assert_eq!(revision.status.installed_dependencies, 0);
    // The entry is recorded even though the dependency is missing.
    assert_eq!(h.lock().await.unwrap().packages.len(), 1);

    h.reconcile_lock().await;
    let dep = h.package("org-dep").await.expect("dependency package created");
    assert_eq!(dep.source(), "reg.io/org/dep:v1.1.0");

    h.reconcile_package("org-dep").await;
    h.reconcile_revisions("org-dep").await;
    assert_eq!(revision_health(&h.revisions("org-dep").await[0]), ConditionStatus::True);

    let action = h.reconcile_revision(&app_revision).await;
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(60)));
    let revision = h.revisions("app").await.remove(0);
    assert_eq!(revision_health(&revision), ConditionStatus::True);
    assert_eq!(revision.status.found_dependencies, 1);
    assert_eq!(revision.status.installed_dependencies, 1);
    assert_eq!(revision.status.invalid_dependencies, 0);

    h.reconcile_package("app").await;
    assert_eq!(package_health(&h.package("app").await.unwrap()), ConditionStatus::True);

    // Nothing left to resolve.
    h.reconcile_lock().await;
    let providers: Vec<ctlpkg::api::Package> =
        h.client.list("Provider", &Default::default()).await.unwrap();
    assert_eq!(providers.len(), 2);
}

#[tokio::test]
async fn test_incompatible_installed_dependency() {
    let h = Harness::new();
    h.publish("reg.io/org/dep:v0.5.0", &digest(2), provider_stream("dep", &[]));
    h.create_provider("dep", "reg.io/org/dep:v0.5.0").await;
    h.reconcile_package("dep").await;
    h.reconcile_revisions("dep").await;

    install_app(&h, ">=1.0.0").await;
    let revision = h.revisions("app").await.remove(0);
    assert_eq!(revision_health(&revision), ConditionStatus::Unknown);
    assert_eq!(revision.status.invalid_dependencies, 1);

    // An installed dependency is never replaced by the resolver.
    h.reconcile_lock().await;
    assert!(h.package("org-dep").await.is_none());
}

#[tokio::test]
async fn test_unsatisfiable_constraint_creates_nothing() {
    let h = Harness::new();
    h.fetcher.set_tags("reg.io/org/dep", &["v1.0.0"]);

    install_app(&h, ">=3.0.0").await;
    let action = h.reconcile_lock().await;

    assert_eq!(action.requeue_after(), None);
    assert!(h.package("org-dep").await.is_none());
    assert!(
        h.recorder
            .messages()
            .iter()
            .any(|m| m.contains("cannot find a valid version for package constraints"))
    );
}

#[tokio::test]
async fn test_skipped_resolution_is_healthy_without_dependencies() {
    let h = Harness::new();
    h.publish(APP, &digest(1), provider_stream("app", &[("reg.io/org/dep", ">=1.0.0")]));
    let mut package = h.create_provider("app", APP).await;
    package.spec.skip_dependency_resolution = Some(true);
    h.client.update(&mut package).await.unwrap();

    h.reconcile_package("app").await;
    h.reconcile_revisions("app").await;

    assert_eq!(revision_health(&h.revisions("app").await[0]), ConditionStatus::True);
    assert!(h.lock().await.is_none());
}
