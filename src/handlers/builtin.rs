use k8s_openapi::{
    api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        autoscaling::v2::HorizontalPodAutoscaler,
        batch::v1::{CronJob, Job},
        core::v1::{
            ConfigMap, Endpoints, LimitRange, Namespace, Node, PersistentVolume,
            PersistentVolumeClaim, Pod, ReplicationController, ResourceQuota, Secret, Service,
            ServiceAccount,
        },
        networking::v1::{Ingress, IngressClass, NetworkPolicy},
        policy::v1::PodDisruptionBudget,
        rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
        storage::v1::StorageClass,
    },
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    Resource,
};
use strum::{Display, EnumIter};

use super::KindHandlerCapability;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMeta {
    pub kind: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

macro_rules! builtin_kinds {
    ($($variant:ident => $ty:ty, $namespaced:expr;)*) => {
        /// Kinds the registry knows without asking the cluster.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display)]
        pub enum BuiltinKind {
            $($variant,)*
        }

        impl BuiltinKind {
            pub fn meta(&self) -> KindMeta {
                match self {
                    $(
                        Self::$variant => KindMeta {
                            kind: <$ty as Resource>::KIND,
                            group: <$ty as Resource>::GROUP,
                            version: <$ty as Resource>::VERSION,
                            plural: <$ty as Resource>::URL_PATH_SEGMENT,
                            namespaced: $namespaced,
                        },
                    )*
                }
            }
        }
    };
}

builtin_kinds! {
    ConfigMap => ConfigMap, true;
    Endpoints => Endpoints, true;
    LimitRange => LimitRange, true;
    Namespace => Namespace, false;
    Node => Node, false;
    PersistentVolume => PersistentVolume, false;
    PersistentVolumeClaim => PersistentVolumeClaim, true;
    Pod => Pod, true;
    ReplicationController => ReplicationController, true;
    ResourceQuota => ResourceQuota, true;
    Secret => Secret, true;
    Service => Service, true;
    ServiceAccount => ServiceAccount, true;
    DaemonSet => DaemonSet, true;
    Deployment => Deployment, true;
    ReplicaSet => ReplicaSet, true;
    StatefulSet => StatefulSet, true;
    CronJob => CronJob, true;
    Job => Job, true;
    HorizontalPodAutoscaler => HorizontalPodAutoscaler, true;
    Ingress => Ingress, true;
    IngressClass => IngressClass, false;
    NetworkPolicy => NetworkPolicy, true;
    PodDisruptionBudget => PodDisruptionBudget, true;
    ClusterRole => ClusterRole, false;
    ClusterRoleBinding => ClusterRoleBinding, false;
    Role => Role, true;
    RoleBinding => RoleBinding, true;
    StorageClass => StorageClass, false;
    CustomResourceDefinition => CustomResourceDefinition, false;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinKindHandler {
    kind: BuiltinKind,
    meta: KindMeta,
}

impl BuiltinKindHandler {
    pub fn new(kind: BuiltinKind) -> Self {
        Self {
            kind,
            meta: kind.meta(),
        }
    }

    pub fn builtin_kind(&self) -> BuiltinKind {
        self.kind
    }
}

impl KindHandlerCapability for BuiltinKindHandler {
    fn kind(&self) -> &str {
        self.meta.kind
    }

    fn group(&self) -> &str {
        self.meta.group
    }

    fn version(&self) -> &str {
        self.meta.version
    }

    fn plural(&self) -> &str {
        self.meta.plural
    }

    fn is_namespaced(&self) -> bool {
        self.meta.namespaced
    }

    fn is_custom(&self) -> bool {
        false
    }
}
