use ctlpkg::api::{ConditionStatus, ObjectKey, Package, PackageType, Resource};
use ctlpkg::pkg::lint::CRD_KIND;
use ctlpkg::test_utils::provider_stream;

use crate::common::{Harness, digest, package_health, revision_health};

const V1: &str = "reg.io/org/prov:v1.0.0";
const V2: &str = "reg.io/org/prov:v2.0.0";

async fn install_v1(h: &Harness) {
    h.publish(V1, &digest(1), provider_stream("prov", &[]));
    h.publish(V2, &digest(2), provider_stream("prov", &[]));
    h.create_provider("prov", V1).await;
    h.reconcile_package("prov").await;
    h.reconcile_revisions("prov").await;
}

async fn set_source(h: &Harness, source: &str) {
    let mut package: Package =
        h.client.get(&ObjectKey::new(PackageType::Provider.as_str(), "prov")).await.unwrap();
    package.spec.package = source.to_string();
    h.client.update(&mut package).await.unwrap();
}

#[tokio::test]
async fn test_new_source_supersedes_active_revision() {
    let h = Harness::new();
    install_v1(&h).await;

    set_source(&h, V2).await;
    h.reconcile_package("prov").await;

    let revisions = h.revisions("prov").await;
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].name(), "prov-010101010101");
    assert!(!revisions[0].is_active());
    assert_eq!(revisions[1].name(), "prov-020202020202");
    assert_eq!(revisions[1].spec.revision, 2);
    assert!(revisions[1].is_active());

    // The old revision lets go before the new one takes control.
    h.reconcile_revisions("prov").await;

    let revisions = h.revisions("prov").await;
    assert_eq!(revision_health(&revisions[1]), ConditionStatus::True);

    let crd = h.client.get_dynamic(&ObjectKey::new(CRD_KIND, "provs.example.io")).await.unwrap();
    assert_eq!(crd.metadata.controller_ref().unwrap().uid, revisions[1].metadata.uid);
    assert!(crd.metadata.is_owned_by(&revisions[0].metadata.uid));

    let lock = h.lock().await.unwrap();
    assert_eq!(lock.packages.len(), 1);
    assert_eq!(lock.packages[0].name, "prov-020202020202");
    assert_eq!(lock.packages[0].version, "v2.0.0");

    h.reconcile_package("prov").await;
    let package = h.package("prov").await.unwrap();
    assert_eq!(package_health(&package), ConditionStatus::True);
    assert_eq!(package.status.current_revision, "prov-020202020202");
}

#[tokio::test]
async fn test_rollback_reactivates_previous_revision() {
    let h = Harness::new();
    install_v1(&h).await;
    set_source(&h, V2).await;
    h.reconcile_package("prov").await;
    h.reconcile_revisions("prov").await;

    set_source(&h, V1).await;
    h.reconcile_package("prov").await;

    let revisions = h.revisions("prov").await;
    assert_eq!(revisions.len(), 2);
    // The returning revision is renumbered above the one it replaces.
    let current = revisions.iter().find(|r| r.name() == "prov-010101010101").unwrap();
    assert!(current.is_active());
    assert_eq!(current.spec.revision, 3);
    let previous = revisions.iter().find(|r| r.name() == "prov-020202020202").unwrap();
    assert!(!previous.is_active());
}

#[tokio::test]
async fn test_history_limit_collects_oldest_revision() {
    let h = Harness::new();
    let v3 = "reg.io/org/prov:v3.0.0";
    let v4 = "reg.io/org/prov:v4.0.0";
    h.publish(v3, &digest(3), provider_stream("prov", &[]));
    h.publish(v4, &digest(4), provider_stream("prov", &[]));
    install_v1(&h).await;

    for source in [V2, v3, v4] {
        set_source(&h, source).await;
        h.reconcile_package("prov").await;
    }

    // The collected revision lingers until its finalizer is released.
    let oldest = h.revisions("prov").await.remove(0);
    assert_eq!(oldest.name(), "prov-010101010101");
    assert!(oldest.metadata.is_deleting());
    h.reconcile_revision("prov-010101010101").await;

    let names: Vec<String> =
        h.revisions("prov").await.iter().map(|r| r.name().to_string()).collect();
    assert!(!names.contains(&"prov-010101010101".to_string()));
    assert!(names.contains(&"prov-040404040404".to_string()));
}
