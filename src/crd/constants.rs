//! Wire vocabulary shared with the other controllers acting on the same objects.
//!
//! Condition types, reasons, annotations and label prefixes below are matched
//! literally by external tooling and must not change.

/// API group of the Machine API family.
pub const MAPI_GROUP: &str = "machine.openshift.io";
/// API group of the Cluster API family.
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";
/// API group of Cluster API infrastructure providers.
pub const INFRA_GROUP: &str = "infrastructure.cluster.x-k8s.io";
/// API version served by the infrastructure providers we mirror to.
pub const INFRA_VERSION: &str = "v1beta2";

// === Conditions ===

/// Condition type set on MAPI objects once conversion has been written.
pub const CONDITION_SYNCHRONIZED: &str = "Synchronized";
/// Condition type describing whether a reconciler is paused.
pub const CONDITION_PAUSED: &str = "Paused";

/// Synchronized=True reason.
pub const REASON_RESOURCE_SYNCHRONIZED: &str = "ResourceSynchronized";
/// Synchronized=False reason once the divergence deadline has passed.
pub const REASON_RESOURCE_SYNC_DIVERGED: &str = "ResourceSyncDiverged";
/// Synchronized=False reason when a field cannot be converted.
pub const REASON_CONVERSION_FAILED: &str = "ConversionFailed";
/// MAPI Paused=False reason.
pub const REASON_AUTHORITATIVE_API_MACHINE_API: &str = "AuthoritativeAPIMachineAPI";
/// MAPI Paused=True reason.
pub const REASON_AUTHORITATIVE_API_NOT_MACHINE_API: &str = "AuthoritativeAPINotMachineAPI";
/// CAPI Paused=True reason.
pub const REASON_PAUSED: &str = "Paused";
/// CAPI Paused=False reason.
pub const REASON_NOT_PAUSED: &str = "NotPaused";

/// CAPI v1beta2 conditions owned by the Cluster API reconciler.
///
/// The converter never synthesizes these.
pub const CAPI_NATIVE_CONDITIONS: &[&str] = &[
    "Available",
    "Ready",
    "BootstrapConfigReady",
    "InfrastructureReady",
    "NodeReady",
    "Deleting",
];

// === Annotations, labels, finalizers ===

/// Annotation that stops Cluster API reconcilers from acting on an object.
pub const CAPI_PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";
/// Label carrying the owning cluster name on every CAPI object.
pub const CAPI_CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
/// Label selecting machines of a CAPI MachineSet.
pub const CAPI_SET_NAME_LABEL: &str = "cluster.x-k8s.io/set-name";
/// Label carrying the cluster id on MAPI objects.
pub const MAPI_CLUSTER_LABEL: &str = "machine.openshift.io/cluster-api-cluster";
/// Label selecting machines of a MAPI MachineSet.
pub const MAPI_MACHINESET_LABEL: &str = "machine.openshift.io/cluster-api-machineset";
/// Finalizer held by this controller on both sides of a pair.
pub const SYNC_FINALIZER: &str = "sync.machine.openshift.io/finalizer";

/// Label/annotation prefixes that are locked while MAPI is not authoritative.
pub const PROTECTED_PREFIXES: &[&str] = &["machine.openshift.io/", "kubernetes.io/"];

/// Labels written by the MAPI actuator that describe one concrete instance.
pub const INSTANCE_LABELS: &[&str] = &[
    "machine.openshift.io/instance-type",
    "machine.openshift.io/region",
    "machine.openshift.io/zone",
    "machine.openshift.io/instance-state",
];

/// Field manager used for every write.
pub const FIELD_MANAGER: &str = "machine-sync-operator";
