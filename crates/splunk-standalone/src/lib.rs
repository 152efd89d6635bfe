//! Reconciliation engine for Standalone descriptors
//!
//! [`apply`] converges a single descriptor: validation, app source listing,
//! secrets, Services, ConfigMaps, the StatefulSet and its pods, then status. The
//! [`reconcile`] and [`error_policy`] adapters plug it into a
//! `kube::runtime::Controller`.

#![deny(missing_docs)]

pub mod apps;
pub mod builder;
pub mod clock;
pub mod controller;
pub mod converge;
pub mod deletion;
pub mod rollout;
pub mod secrets;
pub mod status;
pub mod validate;

pub use builder::{DefaultBuilder, ResourceBuilder, WorkloadInputs};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{apply, error_policy, reconcile, Context, ContextBuilder, EngineConfig};
pub use converge::{ensure, Applied, Converge};
