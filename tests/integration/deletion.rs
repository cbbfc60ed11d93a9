use ctlpkg::api::{DynamicObject, ObjectKey, PackageType, Resource};
use ctlpkg::constants::REVISION_FINALIZER;
use ctlpkg::controller::Action;
use ctlpkg::pkg::lint::CRD_KIND;
use ctlpkg::test_utils::provider_stream;

use crate::common::{Harness, digest};

const SOURCE: &str = "reg.io/org/prov:v1.0.0";
const REVISION: &str = "prov-010101010101";

async fn install(h: &Harness) {
    h.publish(SOURCE, &digest(1), provider_stream("prov", &[]));
    h.create_provider("prov", SOURCE).await;
    h.reconcile_package("prov").await;
    h.reconcile_revisions("prov").await;
}

#[tokio::test]
async fn test_package_deletion_tears_down_revision() {
    let h = Harness::new();
    install(&h).await;
    assert_eq!(h.lock().await.unwrap().packages.len(), 1);

    h.client.delete(&ObjectKey::new(PackageType::Provider.as_str(), "prov")).await.unwrap();
    assert!(h.package("prov").await.is_none());

    // The revision outlives its package until its finalizer is released.
    let revision = h.revisions("prov").await.remove(0);
    assert!(revision.metadata.is_deleting());
    assert!(revision.metadata.has_finalizer(REVISION_FINALIZER));

    assert_eq!(h.reconcile_revision(REVISION).await, Action::await_change());

    assert!(h.revisions("prov").await.is_empty());
    let crd: Option<DynamicObject> =
        h.client.get_opt(&ObjectKey::new(CRD_KIND, "provs.example.io")).await.unwrap();
    assert!(crd.is_none());

    // The Lock itself stays, emptied of the revision.
    let lock = h.lock().await.unwrap();
    assert!(lock.packages.is_empty());
}

#[tokio::test]
async fn test_reconciling_removed_records_is_a_no_op() {
    let h = Harness::new();
    assert_eq!(h.reconcile_package("missing").await, Action::await_change());
    assert_eq!(h.reconcile_revision("missing-000000000000").await, Action::await_change());
    assert_eq!(h.reconcile_lock().await, Action::await_change());
}

#[tokio::test]
async fn test_dependency_survives_dependent_removal() {
    let h = Harness::new();
    h.fetcher.set_tags("reg.io/org/dep", &["v1.0.0"]);
    h.publish("reg.io/org/dep:v1.0.0", &digest(2), provider_stream("dep", &[]));
    h.publish(SOURCE, &digest(1), provider_stream("prov", &[("reg.io/org/dep", ">=1.0.0")]));
    h.create_provider("prov", SOURCE).await;
    h.reconcile_package("prov").await;
    h.reconcile_revisions("prov").await;
    h.reconcile_lock().await;
    h.reconcile_package("org-dep").await;
    h.reconcile_revisions("org-dep").await;

    h.client.delete(&ObjectKey::new(PackageType::Provider.as_str(), "prov")).await.unwrap();
    h.reconcile_revision(REVISION).await;

    let lock = h.lock().await.unwrap();
    assert_eq!(lock.packages.len(), 1);
    assert_eq!(lock.packages[0].source, "reg.io/org/dep");
    let dep = h.package("org-dep").await.unwrap();
    assert!(!dep.metadata.is_deleting());
    assert_eq!(h.revisions("org-dep").await.len(), 1);
    assert_eq!(h.revisions("org-dep").await[0].name(), dep.status.current_revision);
}
