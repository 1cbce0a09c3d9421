//! Record of the objects a run created
//!
//! Teardown walks the manifest instead of re-deriving object names, so a
//! renamed namespace or a partially provisioned run is cleaned up correctly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The resource kinds the harness manages
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum ObjectKind {
    Namespace,
    Deployment,
    Service,
    Ingress,
    Pod,
    Job,
}

impl ObjectKind {
    pub fn is_namespaced(self) -> bool {
        !matches!(self, ObjectKind::Namespace)
    }
}

/// Identity of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn namespace(name: &str) -> Self {
        Self {
            kind: ObjectKind::Namespace,
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn namespaced(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Objects owned by this run, in creation order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Manifest {
    objects: Vec<ObjectRef>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object; recording the same object twice is a no-op
    pub fn record(&mut self, object: ObjectRef) {
        if !self.objects.contains(&object) {
            self.objects.push(object);
        }
    }

    /// Drop an object the cluster refused to create
    pub fn forget(&mut self, object: &ObjectRef) {
        self.objects.retain(|o| o != object);
    }

    pub fn objects(&self) -> &[ObjectRef] {
        &self.objects
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Namespaced objects first in creation order, then the namespaces
    /// themselves in creation order
    pub fn teardown_order(&self) -> Vec<&ObjectRef> {
        let (namespaced, cluster): (Vec<&ObjectRef>, Vec<&ObjectRef>) =
            self.objects.iter().partition(|o| o.kind.is_namespaced());
        namespaced.into_iter().chain(cluster).collect()
    }
}
