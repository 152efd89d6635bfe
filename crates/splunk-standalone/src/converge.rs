//! Get-or-create with ownership checks and selective updates
//!
//! Each owned kind says what counts as drift and how to fold the desired
//! state into the stored object. Fields the API server or other controllers
//! manage (cluster IPs, node ports, claim templates) are never overwritten.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use splunk_common::crd::Standalone;
use splunk_common::{Error, ObjectStore, Result, StoredObject};

use crate::builder::template_hash;

/// Whether the descriptor controls a stored object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Controlled by this descriptor
    Owned,
    /// No controller at all; adopted on the next write
    Orphan,
}

/// Classify a stored object's controller reference against the descriptor
///
/// A different controller is an invariant violation: the object is never
/// modified and the caller surfaces the conflict.
pub fn check_ownership(meta: &ObjectMeta, kind: &str, owner: &Standalone) -> Result<Ownership> {
    let controller = meta
        .owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true));
    match controller {
        None => Ok(Ownership::Orphan),
        Some(r) if owner.metadata.uid.as_deref() == Some(r.uid.as_str()) => Ok(Ownership::Owned),
        Some(r) => Err(Error::invariant(
            kind,
            meta.name.clone().unwrap_or_default(),
            format!("controlled by {} {} (uid {})", r.kind, r.name, r.uid),
        )),
    }
}

fn adopt(meta: &mut ObjectMeta, owner: &Standalone) -> bool {
    let Some(reference) = owner.controller_owner_ref(&()) else {
        return false;
    };
    let refs: &mut Vec<OwnerReference> = meta.owner_references.get_or_insert_with(Vec::new);
    refs.push(reference);
    true
}

type Labels = BTreeMap<String, String>;

fn is_subset(wanted: Option<&Labels>, have: Option<&Labels>) -> bool {
    wanted.map_or(true, |w| {
        w.iter().all(|(k, v)| have.and_then(|h| h.get(k)) == Some(v))
    })
}

fn merge_into(target: &mut Option<Labels>, extra: Option<&Labels>) {
    if let Some(extra) = extra.filter(|e| !e.is_empty()) {
        target
            .get_or_insert_with(BTreeMap::new)
            .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Owned kinds the engine converges
pub trait Converge: StoredObject {
    /// True if the stored object needs an update to match `desired`
    fn drifted(current: &Self, desired: &Self) -> bool;

    /// The stored object with the desired fields folded in
    fn merged(current: &Self, desired: &Self) -> Self;
}

fn port_keys(spec: &ServiceSpec) -> Vec<(Option<&str>, i32, Option<&IntOrString>)> {
    spec.ports
        .iter()
        .flatten()
        .map(|p| (p.name.as_deref(), p.port, p.target_port.as_ref()))
        .collect()
}

fn exposes_node_ports(spec: &ServiceSpec) -> bool {
    matches!(spec.type_.as_deref(), Some("NodePort" | "LoadBalancer"))
}

impl Converge for Service {
    fn drifted(current: &Self, desired: &Self) -> bool {
        let (Some(have), Some(want)) = (current.spec.as_ref(), desired.spec.as_ref()) else {
            return current.spec.is_none() != desired.spec.is_none();
        };
        !is_subset(desired.metadata.labels.as_ref(), current.metadata.labels.as_ref())
            || !is_subset(
                desired.metadata.annotations.as_ref(),
                current.metadata.annotations.as_ref(),
            )
            || have.type_ != want.type_
            || have.selector != want.selector
            || port_keys(have) != port_keys(want)
    }

    fn merged(current: &Self, desired: &Self) -> Self {
        let mut next = current.clone();
        merge_into(&mut next.metadata.labels, desired.metadata.labels.as_ref());
        merge_into(
            &mut next.metadata.annotations,
            desired.metadata.annotations.as_ref(),
        );
        let Some(want) = desired.spec.as_ref() else {
            return next;
        };
        let spec = next.spec.get_or_insert_with(Default::default);
        // ClusterIP and headless Services reject nodePort
        let assigned: BTreeMap<Option<String>, i32> = if exposes_node_ports(want) {
            spec.ports
                .iter()
                .flatten()
                .filter_map(|p| p.node_port.map(|n| (p.name.clone(), n)))
                .collect()
        } else {
            BTreeMap::new()
        };
        spec.type_ = want.type_.clone();
        spec.selector = want.selector.clone();
        spec.ports = want.ports.as_ref().map(|ports| {
            ports
                .iter()
                .map(|p| ServicePort {
                    node_port: p.node_port.or_else(|| assigned.get(&p.name).copied()),
                    ..p.clone()
                })
                .collect()
        });
        next
    }
}

impl Converge for ConfigMap {
    fn drifted(current: &Self, desired: &Self) -> bool {
        current.data != desired.data
            || !is_subset(desired.metadata.labels.as_ref(), current.metadata.labels.as_ref())
    }

    fn merged(current: &Self, desired: &Self) -> Self {
        let mut next = current.clone();
        merge_into(&mut next.metadata.labels, desired.metadata.labels.as_ref());
        next.data = desired.data.clone();
        next
    }
}

fn replicas(sts: &StatefulSet) -> Option<i32> {
    sts.spec.as_ref().and_then(|s| s.replicas)
}

impl Converge for StatefulSet {
    fn drifted(current: &Self, desired: &Self) -> bool {
        replicas(current) != replicas(desired) || template_hash(current) != template_hash(desired)
    }

    /// Replicas always follow the descriptor; the pod template only when its
    /// hash changed. Selector and claim templates are immutable.
    fn merged(current: &Self, desired: &Self) -> Self {
        let mut next = current.clone();
        let (Some(spec), Some(want)) = (next.spec.as_mut(), desired.spec.as_ref()) else {
            return next;
        };
        spec.replicas = want.replicas;
        if template_hash(current) != template_hash(desired) {
            spec.template = want.template.clone();
            merge_into(
                &mut next.metadata.annotations,
                desired.metadata.annotations.as_ref(),
            );
        }
        next
    }
}

/// What `ensure` did to an object
#[derive(Clone, Debug)]
pub enum Applied<K> {
    /// Did not exist and was created
    Created(K),
    /// Existed and was updated
    Updated {
        /// Stored object before the update
        previous: Box<K>,
        /// Stored object after the update
        current: K,
    },
    /// Existed and already matched
    Unchanged(K),
}

impl<K> Applied<K> {
    /// The stored object after the operation
    pub fn into_inner(self) -> K {
        match self {
            Applied::Created(k) | Applied::Unchanged(k) => k,
            Applied::Updated { current, .. } => current,
        }
    }

    /// The stored object after the operation
    pub fn get(&self) -> &K {
        match self {
            Applied::Created(k) | Applied::Unchanged(k) => k,
            Applied::Updated { current, .. } => current,
        }
    }

    /// True if the object was written
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Unchanged(_))
    }
}

/// Create `desired` if absent, otherwise update it only where it drifted
///
/// Stored objects under a foreign controller fail with `FatalInvariant`;
/// objects without any controller are adopted.
pub async fn ensure<S, K>(store: &S, owner: &Standalone, desired: K) -> Result<Applied<K>>
where
    S: ObjectStore,
    K: Converge + Debug,
{
    let kind = K::kind(&()).to_string();
    let name = desired.name_any();
    let namespace = desired.namespace().unwrap_or_default();

    let Some(current) = store.get::<K>(&namespace, &name).await? else {
        let created = store.create(&desired).await?;
        info!(kind = %kind, name = %name, "created");
        return Ok(Applied::Created(created));
    };

    let ownership = check_ownership(current.meta(), &kind, owner)?;
    if ownership == Ownership::Owned && !K::drifted(&current, &desired) {
        debug!(kind = %kind, name = %name, "unchanged");
        return Ok(Applied::Unchanged(current));
    }

    let mut next = K::merged(&current, &desired);
    let adopted = ownership == Ownership::Orphan && adopt(next.meta_mut(), owner);
    if ownership == Ownership::Orphan && !adopted && !K::drifted(&current, &desired) {
        return Ok(Applied::Unchanged(current));
    }

    let updated = store.update(&next).await?;
    info!(kind = %kind, name = %name, adopted, "updated");
    Ok(Applied::Updated {
        previous: Box::new(current),
        current: updated,
    })
}
