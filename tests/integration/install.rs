use std::time::Duration;

use ctlpkg::api::{ConditionStatus, ObjectKey, PullPolicy, Resource};
use ctlpkg::controller::Action;
use ctlpkg::pkg::lint::CRD_KIND;
use ctlpkg::pkg::{friendly_id, stable_hash};
use ctlpkg::test_utils::{intent_stream, provider_stream};

use crate::common::{Harness, digest, package_health, package_installed, revision_health};

const SOURCE: &str = "reg.io/org/prov:v1.0.0";

#[tokio::test]
async fn test_provider_installs_and_becomes_healthy() {
    let h = Harness::new();
    h.publish(SOURCE, &digest(1), provider_stream("prov", &[]));
    h.create_provider("prov", SOURCE).await;

    assert_eq!(h.reconcile_package("prov").await, Action::await_change());
    let package = h.package("prov").await.unwrap();
    assert_eq!(package_installed(&package), ConditionStatus::True);
    assert_eq!(package_health(&package), ConditionStatus::Unknown);
    assert_eq!(package.status.current_revision, "prov-010101010101");

    let revisions = h.revisions("prov").await;
    assert_eq!(revisions.len(), 1);
    assert!(revisions[0].is_active());
    assert_eq!(revisions[0].spec.revision, 1);

    let action = h.reconcile_revision("prov-010101010101").await;
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(60)));

    let revision = h.revisions("prov").await.remove(0);
    assert_eq!(revision_health(&revision), ConditionStatus::True);
    assert_eq!(revision.status.found_dependencies, 0);
    assert_eq!(revision.status.object_refs.len(), 1);

    let crd = h.client.get_dynamic(&ObjectKey::new(CRD_KIND, "provs.example.io")).await.unwrap();
    assert_eq!(crd.metadata.controller_ref().unwrap().uid, revision.metadata.uid);

    let lock = h.lock().await.unwrap();
    assert_eq!(lock.packages.len(), 1);
    assert_eq!(lock.packages[0].name, "prov-010101010101");
    assert_eq!(lock.packages[0].source, "reg.io/org/prov");
    assert_eq!(lock.packages[0].version, "v1.0.0");

    h.reconcile_package("prov").await;
    let package = h.package("prov").await.unwrap();
    assert_eq!(package_health(&package), ConditionStatus::True);
    assert!(h.recorder.messages().contains(&"Successfully installed package revision".to_string()));
}

#[tokio::test]
async fn test_unresolved_digest_waits_for_unpack() {
    let h = Harness::new();
    h.create_provider("prov", SOURCE).await;

    let action = h.reconcile_package("prov").await;
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(5)));

    let package = h.package("prov").await.unwrap();
    assert_eq!(package_installed(&package), ConditionStatus::False);
    assert!(h.revisions("prov").await.is_empty());
}

#[tokio::test]
async fn test_wrong_package_kind_is_unhealthy() {
    let h = Harness::new();
    h.publish(SOURCE, &digest(1), intent_stream("prov", &[]));
    h.create_provider("prov", SOURCE).await;

    h.reconcile_package("prov").await;
    let action = h.reconcile_revision("prov-010101010101").await;
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(60)));

    let revision = h.revisions("prov").await.remove(0);
    assert_eq!(revision_health(&revision), ConditionStatus::False);
    // Nothing was installed or recorded.
    assert!(revision.status.object_refs.is_empty());
    assert!(h.lock().await.is_none());

    h.reconcile_package("prov").await;
    assert_eq!(package_health(&h.package("prov").await.unwrap()), ConditionStatus::False);
}

#[tokio::test]
async fn test_pull_policy_never_skips_registry() {
    let h = Harness::new();
    let mut package = h.create_provider("prov", SOURCE).await;
    package.spec.package_pull_policy = Some(PullPolicy::Never);
    h.client.update(&mut package).await.unwrap();

    h.reconcile_package("prov").await;

    let revisions = h.revisions("prov").await;
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].name(), friendly_id("prov", &stable_hash(SOURCE)));
    assert_eq!(h.fetcher.head_calls(), 0);
}

#[tokio::test]
async fn test_if_not_present_reuses_resolved_revision() {
    let h = Harness::new();
    h.publish(SOURCE, &digest(1), provider_stream("prov", &[]));
    let mut package = h.create_provider("prov", SOURCE).await;
    package.spec.package_pull_policy = Some(PullPolicy::IfNotPresent);
    h.client.update(&mut package).await.unwrap();

    h.reconcile_package("prov").await;
    // A moved tag is not noticed while the source is unchanged.
    h.fetcher.set_digest(SOURCE, digest(2));
    h.reconcile_package("prov").await;

    assert_eq!(h.fetcher.head_calls(), 1);
    let revisions = h.revisions("prov").await;
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].name(), "prov-010101010101");
}

#[tokio::test]
async fn test_always_pull_polls_registry() {
    let h = Harness::new();
    h.publish(SOURCE, &digest(1), provider_stream("prov", &[]));
    let mut package = h.create_provider("prov", SOURCE).await;
    package.spec.package_pull_policy = Some(PullPolicy::Always);
    h.client.update(&mut package).await.unwrap();

    let action = h.reconcile_package("prov").await;
    assert!(action.requeue_after().is_some());

    h.fetcher.set_digest(SOURCE, digest(2));
    h.reconcile_package("prov").await;

    let revisions = h.revisions("prov").await;
    assert_eq!(revisions.len(), 2);
    assert!(!revisions[0].is_active());
    assert!(revisions[1].is_active());
    assert_eq!(revisions[1].name(), "prov-020202020202");
}
