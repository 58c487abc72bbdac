#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
pub mod quantity;

pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        authorization::v1::{
            ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
        },
        core::v1::{
            ConfigMap, Container, ContainerPort, Event, Namespace, Node, NodeSpec, NodeStatus,
            Pod, PodSpec, PodStatus, Secret, Service, ServicePort, ServiceSpec,
        },
        rbac::v1::{Role, RoleBinding},
    },
    apimachinery::{
        self,
        pkg::{
            api::resource::Quantity,
            apis::meta::v1::{ObjectMeta as MetaObjectMeta, Time},
        },
    },
    ClusterResourceScope, NamespaceResourceScope,
};
pub use kube::{
    api::{
        Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, LogParams, ObjectMeta,
        Patch, PatchParams, PostParams, Resource, ResourceExt,
    },
    core::Status,
    error::ErrorResponse,
    runtime::watcher,
    Client, Error,
};
