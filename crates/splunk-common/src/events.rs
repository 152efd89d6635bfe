//! Kubernetes Event recording for the Splunk operator
//!
//! Events are fire-and-forget: a failed publish is logged and swallowed so
//! it can never fail a reconcile pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about a descriptor
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`; never fails
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Spec or SmartStore credentials failed validation
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// A dependent object was created
    pub const RESOURCE_CREATED: &str = "ResourceCreated";
    /// A new versioned secret was minted
    pub const SECRET_ROTATED: &str = "SecretRotated";
    /// An app source could not be listed
    pub const APP_LISTING_FAILED: &str = "AppListingFailed";
    /// A dependent object is controlled by someone else
    pub const OWNERSHIP_CONFLICT: &str = "OwnershipConflict";
    /// Persistent volumes were removed during deletion
    pub const VOLUMES_DELETED: &str = "VolumesDeleted";
    /// A pod behind the update revision was deleted
    pub const POD_RECYCLED: &str = "PodRecycled";
    /// The instance reached the Ready phase
    pub const READY: &str = "Ready";
}

/// Event actions, shown in the ACTION column of `kubectl get events`
pub mod actions {
    /// Regular reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Listing remote app content
    pub const LIST_APPS: &str = "ListApps";
    /// Rotating credentials
    pub const ROTATE: &str = "Rotate";
    /// Replacing pods onto a new revision
    pub const ROLL_OUT: &str = "RollOut";
    /// Tearing down volumes
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_shares_across_tasks() {
        let shared: std::sync::Arc<dyn EventPublisher> = std::sync::Arc::new(NoopEventPublisher);
        let moved = shared.clone();
        std::thread::spawn(move || drop(moved)).join().unwrap();
        assert_eq!(std::sync::Arc::strong_count(&shared), 1);
    }

    #[test]
    fn reasons_are_pascal_case() {
        for reason in [
            reasons::VALIDATION_FAILED,
            reasons::RESOURCE_CREATED,
            reasons::SECRET_ROTATED,
            reasons::APP_LISTING_FAILED,
            reasons::OWNERSHIP_CONFLICT,
            reasons::VOLUMES_DELETED,
            reasons::POD_RECYCLED,
            reasons::READY,
        ] {
            assert!(reason.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(!reason.contains(' '));
        }
    }

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::OWNERSHIP_CONFLICT,
                actions::RECONCILE,
                Some("owned by another controller".to_string()),
            )
            .await;
    }
}
