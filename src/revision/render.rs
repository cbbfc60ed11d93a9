//! Runtime resources of a packaged controller, rendered as store records.
//!
//! Every resource is named after the revision and controlled by it, so a new
//! revision never fights an old one over the same record and garbage
//! collecting a revision takes its resources with it.

use serde_json::{Map, Value, json};

use crate::api::{
    Container, DeploymentType, DynamicObject, Extras, ObjectMeta, OwnerReference, PackageRevision,
    PodSpec, PullPolicy, Resource,
};
use crate::constants::PKG_GROUP;

const SERVICE_SUFFIX: &str = "svc";
const CERT_SUFFIX: &str = "serving-cert";
const CONTAINER_STARTUP_CMD: &str = "/manager";
const REVISION_LABEL: &str = "revision";
const USER_GROUP: i64 = 2000;
const CERT_ISSUER: &str = "selfsigned-issuer";

pub const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";
pub const DEPLOYMENT_KIND: &str = "Deployment";
pub const STATEFUL_SET_KIND: &str = "StatefulSet";
pub const SERVICE_KIND: &str = "Service";
pub const CERTIFICATE_KIND: &str = "Certificate";
pub const MUTATING_WEBHOOK_KIND: &str = "MutatingWebhookConfiguration";
pub const VALIDATING_WEBHOOK_KIND: &str = "ValidatingWebhookConfiguration";

/// Inputs shared by every renderer.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub pod: &'a PodSpec,
    pub revision: &'a PackageRevision,
    pub namespace: &'a str,
}

/// The parts of a CRD a webhook needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdInfo {
    pub group: String,
    pub singular: String,
    pub plural: String,
    pub versions: Vec<String>,
}

impl CrdInfo {
    /// Read group, names and versions from a CRD record.
    ///
    /// Returns `None` for a CRD without a group, names or any version.
    pub fn from_object(crd: &DynamicObject) -> Option<Self> {
        let spec = crd.data.get("spec")?;
        let text = |pointer: &str| spec.pointer(pointer).and_then(Value::as_str).map(str::to_string);

        let mut versions: Vec<String> = Vec::new();
        for version in spec.get("versions").and_then(Value::as_array).into_iter().flatten() {
            if let Some(name) = version.get("name").and_then(Value::as_str)
                && !versions.iter().any(|v| v == name)
            {
                versions.push(name.to_string());
            }
        }
        if versions.is_empty() {
            return None;
        }

        Some(Self {
            group: text("/group")?,
            singular: text("/names/singular")?,
            plural: text("/names/plural")?,
            versions,
        })
    }
}

pub fn label_key(suffix: &str) -> String {
    format!("{PKG_GROUP}/{suffix}")
}

pub fn service_name(revision: &str, container: &str, extra: &str) -> String {
    [revision, container, extra, SERVICE_SUFFIX].join("-")
}

pub fn certificate_name(revision: &str, container: &str, extra: &str) -> String {
    [revision, container, extra, CERT_SUFFIX].join("-")
}

fn dns_name(namespace: &str, service: &str) -> String {
    [service, namespace, SERVICE_SUFFIX].join(".")
}

fn pull_policy(revision: &PackageRevision) -> &'static str {
    match revision.spec.package_pull_policy {
        Some(PullPolicy::Always) => "Always",
        Some(PullPolicy::Never) => "Never",
        Some(PullPolicy::IfNotPresent) | None => "IfNotPresent",
    }
}

fn object(api_version: &str, kind: &str, metadata: ObjectMeta, body: Value) -> DynamicObject {
    let data = match body {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    DynamicObject {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        metadata,
        data,
    }
}

/// Metadata of a resource controlled by the revision.
fn owned_meta(ctx: &RenderContext<'_>, name: String, namespaced: bool) -> ObjectMeta {
    let mut metadata = ObjectMeta::named(name);
    if namespaced {
        metadata.namespace = Some(ctx.namespace.to_string());
    }
    metadata.add_owner_reference(OwnerReference::to(ctx.revision).as_controller());
    metadata
}

/// Pod labels: the revision, plus one selector label per container extra.
fn pod_labels(ctx: &RenderContext<'_>) -> Map<String, Value> {
    let revision = ctx.revision.name();
    let mut labels = Map::new();
    labels.insert(label_key(REVISION_LABEL), json!(revision));
    for (container, extra) in extras(ctx.pod) {
        labels.insert(
            label_key(&extra.name),
            json!(service_name(revision, &container.name, &extra.name)),
        );
    }
    labels
}

/// Every `(container, extra)` pair of the pod spec.
pub fn extras(pod: &PodSpec) -> impl Iterator<Item = (&Container, &Extras)> {
    pod.containers
        .iter()
        .filter_map(|c| c.container.as_ref().map(|container| (container, &c.extras)))
        .flat_map(|(container, extras)| extras.iter().map(move |extra| (container, extra)))
}

fn env() -> Value {
    let field = |name: &str, path: &str| {
        json!({
            "name": name,
            "valueFrom": { "fieldRef": { "apiVersion": "v1", "fieldPath": path } },
        })
    };
    json!([
        field("POD_NAMESPACE", "metadata.namespace"),
        field("POD_IP", "status.podIP"),
        field("POD_NAME", "metadata.name"),
    ])
}

fn default_args(ctx: &RenderContext<'_>) -> Vec<Value> {
    vec![
        json!("start"),
        json!("--debug"),
        json!(format!("--revision={}", ctx.revision.name())),
        json!(format!("--revision-namespace={}", ctx.namespace)),
        json!(format!("--autopilot={}", ctx.revision.spec.auto_pilot.unwrap_or(true))),
    ]
}

fn container(
    ctx: &RenderContext<'_>,
    spec: &Container,
    extras: &[Extras],
    grpc_service: Option<&str>,
) -> Value {
    let mut out = spec.rest.clone();
    out.insert("name".to_string(), json!(spec.name));
    out.insert("image".to_string(), json!(spec.image));
    out.insert("imagePullPolicy".to_string(), json!(pull_policy(ctx.revision)));
    out.entry("command").or_insert_with(|| json!([CONTAINER_STARTUP_CMD]));
    out.entry("env").or_insert_with(env);
    out.entry("securityContext").or_insert_with(|| {
        json!({
            "runAsUser": USER_GROUP,
            "runAsGroup": USER_GROUP,
            "allowPrivilegeEscalation": false,
            "privileged": false,
            "runAsNonRoot": true,
        })
    });

    let args = out.entry("args").or_insert_with(|| Value::Array(default_args(ctx)));
    if let (Some(service), Value::Array(args)) = (grpc_service, args) {
        args.push(json!(format!("--grpc-service-name={service}")));
    }

    let mounts: Vec<Value> = extras
        .iter()
        .filter(|e| e.volume || e.certificate)
        .map(|e| {
            let path = if e.certificate {
                format!("/tmp/k8s-{}-server/serving-certs", e.name)
            } else {
                format!("/{}", e.name)
            };
            json!({ "name": e.name, "mountPath": path, "readOnly": e.certificate })
        })
        .collect();
    if !mounts.is_empty() {
        out.insert("volumeMounts".to_string(), Value::Array(mounts));
    }
    Value::Object(out)
}

fn volumes(ctx: &RenderContext<'_>) -> Vec<Value> {
    extras(ctx.pod)
        .filter(|(_, e)| e.volume || e.certificate)
        .map(|(c, e)| {
            if e.certificate {
                json!({
                    "name": e.name,
                    "secret": {
                        "secretName": certificate_name(ctx.revision.name(), &c.name, &e.name),
                        "defaultMode": 420,
                    },
                })
            } else {
                json!({ "name": e.name, "emptyDir": {} })
            }
        })
        .collect()
}

fn pod_template(ctx: &RenderContext<'_>, grpc_service: Option<&str>) -> Value {
    let containers: Vec<Value> = ctx
        .pod
        .containers
        .iter()
        .filter_map(|c| c.container.as_ref().map(|spec| container(ctx, spec, &c.extras, grpc_service)))
        .collect();
    let pull_secrets: Vec<Value> = ctx
        .revision
        .spec
        .package_pull_secrets
        .iter()
        .map(|s| json!({ "name": s.name }))
        .collect();

    json!({
        "metadata": { "labels": pod_labels(ctx) },
        "spec": {
            "securityContext": {
                "runAsUser": USER_GROUP,
                "runAsGroup": USER_GROUP,
                "runAsNonRoot": true,
            },
            "serviceAccountName": ctx.revision.name(),
            "imagePullSecrets": pull_secrets,
            "containers": containers,
            "volumes": volumes(ctx),
        },
    })
}

pub fn service_account(ctx: &RenderContext<'_>) -> DynamicObject {
    object(
        "v1",
        SERVICE_ACCOUNT_KIND,
        owned_meta(ctx, ctx.revision.name().to_string(), true),
        json!({}),
    )
}

pub fn deployment(ctx: &RenderContext<'_>, grpc_service: Option<&str>) -> DynamicObject {
    object(
        "apps/v1",
        DEPLOYMENT_KIND,
        owned_meta(ctx, ctx.revision.name().to_string(), true),
        json!({
            "spec": {
                "replicas": ctx.pod.replicas.unwrap_or(1),
                "selector": { "matchLabels": { label_key(REVISION_LABEL): ctx.revision.name() } },
                "template": pod_template(ctx, grpc_service),
            },
        }),
    )
}

pub fn stateful_set(ctx: &RenderContext<'_>, grpc_service: Option<&str>) -> DynamicObject {
    object(
        "apps/v1",
        STATEFUL_SET_KIND,
        owned_meta(ctx, ctx.revision.name().to_string(), true),
        json!({
            "spec": {
                "replicas": ctx.pod.replicas.unwrap_or(1),
                "serviceName": ctx.revision.name(),
                "selector": { "matchLabels": { label_key(REVISION_LABEL): ctx.revision.name() } },
                "template": pod_template(ctx, grpc_service),
            },
        }),
    )
}

/// The Deployment or StatefulSet running the controller.
pub fn workload(ctx: &RenderContext<'_>, grpc_service: Option<&str>) -> DynamicObject {
    match ctx.pod.deployment_type {
        DeploymentType::Deployment => deployment(ctx, grpc_service),
        DeploymentType::Statefulset => stateful_set(ctx, grpc_service),
    }
}

pub fn service(ctx: &RenderContext<'_>, container: &Container, extra: &Extras) -> DynamicObject {
    let name = service_name(ctx.revision.name(), &container.name, &extra.name);
    let port = extra.port.unwrap_or(443);
    object(
        "v1",
        SERVICE_KIND,
        owned_meta(ctx, name.clone(), true),
        json!({
            "spec": {
                "selector": { label_key(&extra.name): name },
                "ports": [{
                    "name": extra.name,
                    "port": port,
                    "targetPort": extra.target_port.unwrap_or(port),
                    "protocol": extra.protocol.as_deref().unwrap_or("TCP"),
                }],
            },
        }),
    )
}

pub fn certificate(ctx: &RenderContext<'_>, container: &Container, extra: &Extras) -> DynamicObject {
    let revision = ctx.revision.name();
    let name = certificate_name(revision, &container.name, &extra.name);
    let service = service_name(revision, &container.name, &extra.name);
    let mut metadata = owned_meta(ctx, name.clone(), true);
    metadata.labels.insert(extra.name.clone(), name.clone());
    object(
        "cert-manager.io/v1",
        CERTIFICATE_KIND,
        metadata,
        json!({
            "spec": {
                "dnsNames": [
                    dns_name(ctx.namespace, &service),
                    format!("{}.cluster.local", dns_name(ctx.namespace, &service)),
                ],
                "issuerRef": { "kind": "Issuer", "name": CERT_ISSUER },
                "secretName": name,
            },
        }),
    )
}

#[derive(Clone, Copy)]
enum WebhookMode {
    Mutate,
    Validate,
}

impl WebhookMode {
    fn kind(self) -> &'static str {
        match self {
            Self::Mutate => MUTATING_WEBHOOK_KIND,
            Self::Validate => VALIDATING_WEBHOOK_KIND,
        }
    }

    fn prefix(self) -> (&'static str, &'static str) {
        match self {
            Self::Mutate => ("m", "mutate"),
            Self::Validate => ("v", "validate"),
        }
    }
}

fn webhook(
    ctx: &RenderContext<'_>,
    container: &Container,
    extra: &Extras,
    crds: &[CrdInfo],
    mode: WebhookMode,
) -> DynamicObject {
    let revision = ctx.revision.name();
    let service = service_name(revision, &container.name, &extra.name);
    let certificate = certificate_name(revision, &container.name, &extra.name);
    let (short, long) = mode.prefix();

    let webhooks: Vec<Value> = crds
        .iter()
        .map(|crd| {
            let path = format!(
                "/{long}-{}-{}-{}",
                crd.group.replace('.', "-"),
                crd.versions.first().map_or("", String::as_str),
                crd.singular
            );
            json!({
                "name": format!("{short}{}.{}", crd.singular, crd.group),
                "admissionReviewVersions": ["v1"],
                "clientConfig": {
                    "service": { "name": service, "namespace": ctx.namespace, "path": path },
                },
                "rules": [{
                    "apiGroups": [crd.group],
                    "apiVersions": crd.versions,
                    "resources": [crd.plural],
                    "operations": ["CREATE", "UPDATE"],
                }],
                "failurePolicy": "Fail",
                "sideEffects": "None",
            })
        })
        .collect();

    let mut metadata = owned_meta(ctx, format!("{revision}-{long}-{}", extra.name), false);
    metadata.annotations.insert(
        "cert-manager.io/inject-ca-from".to_string(),
        format!("{}/{certificate}", ctx.namespace),
    );
    object(
        "admissionregistration.k8s.io/v1",
        mode.kind(),
        metadata,
        json!({ "webhooks": webhooks }),
    )
}

pub fn mutating_webhook(
    ctx: &RenderContext<'_>,
    container: &Container,
    extra: &Extras,
    crds: &[CrdInfo],
) -> DynamicObject {
    webhook(ctx, container, extra, crds, WebhookMode::Mutate)
}

pub fn validating_webhook(
    ctx: &RenderContext<'_>,
    container: &Container,
    extra: &Extras,
    crds: &[CrdInfo],
) -> DynamicObject {
    webhook(ctx, container, extra, crds, WebhookMode::Validate)
}
