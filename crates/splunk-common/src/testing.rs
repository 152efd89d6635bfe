//! In-memory [`ObjectStore`] for tests
//!
//! Objects are kept as JSON keyed by (kind, namespace, name) and behave like
//! the API server where the reconciler can tell the difference:
//! resourceVersion bumps on every write, 409 on stale updates and duplicate
//! creates, 404 on missing objects, generation bumps on spec changes, status
//! preserved across plain updates, and finalizer-gated deletion.
//!
//! Every store call is recorded so tests can assert on exactly which writes
//! a reconcile pass issued. Seeding helpers (`insert`, `set_status`) are not
//! recorded.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::events::EventPublisher;
use crate::store::{object_key, selector_string, ObjectStore, StoredObject};
use crate::{Error, Result};

/// creationTimestamp stamped on every stored object
pub const CREATION_TIMESTAMP: &str = "2021-05-01T23:23:00Z";

/// Kind of store call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// get
    Get,
    /// list
    List,
    /// create
    Create,
    /// update
    Update,
    /// delete
    Delete,
    /// update_status
    UpdateStatus,
}

impl Verb {
    /// True for calls that write to the store
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Verb::Get | Verb::List)
    }
}

/// One recorded store call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    /// What was called
    pub verb: Verb,
    /// Kubernetes kind of the object
    pub kind: String,
    /// Object name, or the label selector for lists
    pub name: String,
}

struct Failure {
    verb: Verb,
    kind: String,
    name: Option<String>,
    code: u16,
    remaining: Option<usize>,
}

impl Failure {
    fn matches(&self, verb: Verb, kind: &str, name: &str) -> bool {
        self.verb == verb && self.kind == kind && self.name.as_deref().map_or(true, |n| n == name)
    }
}

type Key = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    next_rv: u64,
    calls: Vec<Call>,
    failures: Vec<Failure>,
}

impl Inner {
    fn record(&mut self, verb: Verb, kind: &str, name: &str) {
        self.calls.push(Call {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });
    }

    fn injected(&mut self, verb: Verb, kind: &str, name: &str) -> Result<()> {
        let Some(idx) = self
            .failures
            .iter()
            .position(|f| f.matches(verb, kind, name))
        else {
            return Ok(());
        };
        let code = self.failures[idx].code;
        if let Some(remaining) = self.failures[idx].remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.failures.remove(idx);
            }
        }
        Err(api_error(
            code,
            "Injected",
            format!("injected {:?} failure for {} {}", verb, kind, name),
        ))
    }

    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }
}

/// Build a Kubernetes API error with the given HTTP code
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    }))
}

fn kind_of<K: StoredObject>() -> String {
    K::kind(&()).to_string()
}

fn key(kind: &str, namespace: &str, name: &str) -> Key {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

fn meta_field<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    value.get("metadata").and_then(|m| m.get(field))
}

fn set_meta_field(value: &mut Value, field: &str, field_value: Option<Value>) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let meta = obj.entry("metadata").or_insert_with(|| json!({}));
    if let Some(meta) = meta.as_object_mut() {
        match field_value {
            Some(v) => {
                meta.insert(field.to_string(), v);
            }
            None => {
                meta.remove(field);
            }
        }
    }
}

fn set_status_field(value: &mut Value, status: Option<Value>) {
    if let Some(obj) = value.as_object_mut() {
        match status {
            Some(s) if !s.is_null() => {
                obj.insert("status".to_string(), s);
            }
            _ => {
                obj.remove("status");
            }
        }
    }
}

/// Everything except metadata and status
fn desired_part(value: &Value) -> Value {
    let mut copy = value.clone();
    if let Some(obj) = copy.as_object_mut() {
        obj.remove("metadata");
        obj.remove("status");
    }
    copy
}

fn has_finalizers(value: &Value) -> bool {
    meta_field(value, "finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn labels_match(value: &Value, selector: &BTreeMap<String, String>) -> bool {
    let labels = meta_field(value, "labels");
    selector.iter().all(|(k, v)| {
        labels
            .and_then(|l| l.get(k))
            .and_then(Value::as_str)
            .is_some_and(|actual| actual == v)
    })
}

fn decode<K: StoredObject>(value: &Value) -> Result<K> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::serialization_for_kind(kind_of::<K>(), e.to_string()))
}

/// In-memory object store with a call log and failure injection
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a call
    ///
    /// Unlike `create`, status is kept so tests can stage observed state.
    pub fn insert<K: StoredObject>(&self, obj: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let (namespace, name) = object_key(obj)?;
        let mut value = serde_json::to_value(obj)?;
        let mut inner = self.inner.lock();
        let rv = inner.bump_rv();
        set_meta_field(&mut value, "resourceVersion", Some(json!(rv)));
        if meta_field(&value, "uid").is_none() {
            set_meta_field(&mut value, "uid", Some(json!(uuid::Uuid::new_v4().to_string())));
        }
        if meta_field(&value, "generation").is_none() {
            set_meta_field(&mut value, "generation", Some(json!(1)));
        }
        set_meta_field(&mut value, "creationTimestamp", Some(json!(CREATION_TIMESTAMP)));
        inner
            .objects
            .insert(key(&kind, &namespace, &name), value.clone());
        decode(&value)
    }

    /// Replace an object's status without recording a call
    pub fn set_status<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<()> {
        let kind = kind_of::<K>();
        let mut inner = self.inner.lock();
        let rv = inner.bump_rv();
        let value = inner
            .objects
            .get_mut(&key(&kind, namespace, name))
            .ok_or_else(|| api_error(404, "NotFound", format!("{} {} not found", kind, name)))?;
        set_status_field(value, Some(status));
        set_meta_field(value, "resourceVersion", Some(json!(rv)));
        Ok(())
    }

    /// Read an object without recording a call
    pub fn get_stored<K: StoredObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let inner = self.inner.lock();
        inner
            .objects
            .get(&key(&kind_of::<K>(), namespace, name))
            .and_then(|v| decode(v).ok())
    }

    /// All objects of a kind in a namespace, without recording a call
    pub fn list_stored<K: StoredObject>(&self, namespace: &str) -> Vec<K> {
        let kind = kind_of::<K>();
        let inner = self.inner.lock();
        inner
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter_map(|(_, v)| decode(v).ok())
            .collect()
    }

    /// Every call recorded so far
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    /// Recorded calls that wrote to the store
    pub fn mutations(&self) -> Vec<Call> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.verb.is_mutation())
            .cloned()
            .collect()
    }

    /// Number of recorded calls of a verb against a kind
    pub fn count(&self, verb: Verb, kind: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.verb == verb && c.kind == kind)
            .count()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Fail every matching call with the given HTTP code
    pub fn fail(&self, verb: Verb, kind: &str, code: u16) {
        self.inner.lock().failures.push(Failure {
            verb,
            kind: kind.to_string(),
            name: None,
            code,
            remaining: None,
        });
    }

    /// Fail the next call against one named object with the given HTTP code
    pub fn fail_once(&self, verb: Verb, kind: &str, name: &str, code: u16) {
        self.inner.lock().failures.push(Failure {
            verb,
            kind: kind.to_string(),
            name: Some(name.to_string()),
            code,
            remaining: Some(1),
        });
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let kind = kind_of::<K>();
        let mut inner = self.inner.lock();
        inner.record(Verb::Get, &kind, name);
        inner.injected(Verb::Get, &kind, name)?;
        inner
            .objects
            .get(&key(&kind, namespace, name))
            .map(decode)
            .transpose()
    }

    async fn list<K: StoredObject>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let kind = kind_of::<K>();
        let rendered = selector_string(selector);
        let mut inner = self.inner.lock();
        inner.record(Verb::List, &kind, &rendered);
        inner.injected(Verb::List, &kind, &rendered)?;
        inner
            .objects
            .iter()
            .filter(|((k, ns, _), v)| *k == kind && ns == namespace && labels_match(v, selector))
            .map(|(_, v)| decode(v))
            .collect()
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let (namespace, name) = object_key(obj)?;
        let mut value = serde_json::to_value(obj)?;
        let mut inner = self.inner.lock();
        inner.record(Verb::Create, &kind, &name);
        inner.injected(Verb::Create, &kind, &name)?;

        let k = key(&kind, &namespace, &name);
        if inner.objects.contains_key(&k) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} {} already exists", kind, name),
            ));
        }

        let rv = inner.bump_rv();
        set_meta_field(&mut value, "resourceVersion", Some(json!(rv)));
        set_meta_field(&mut value, "uid", Some(json!(uuid::Uuid::new_v4().to_string())));
        set_meta_field(&mut value, "generation", Some(json!(1)));
        set_meta_field(&mut value, "creationTimestamp", Some(json!(CREATION_TIMESTAMP)));
        set_meta_field(&mut value, "deletionTimestamp", None);
        set_status_field(&mut value, None);
        inner.objects.insert(k, value.clone());
        decode(&value)
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let (namespace, name) = object_key(obj)?;
        let mut value = serde_json::to_value(obj)?;
        let mut inner = self.inner.lock();
        inner.record(Verb::Update, &kind, &name);
        inner.injected(Verb::Update, &kind, &name)?;

        let k = key(&kind, &namespace, &name);
        let stored = inner
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("{} {} not found", kind, name)))?;

        let incoming_rv = meta_field(&value, "resourceVersion").cloned();
        if incoming_rv.is_some() && incoming_rv.as_ref() != meta_field(&stored, "resourceVersion") {
            return Err(api_error(
                409,
                "Conflict",
                format!("{} {} has been modified", kind, name),
            ));
        }

        let generation = meta_field(&stored, "generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let generation = if desired_part(&stored) != desired_part(&value) {
            generation + 1
        } else {
            generation
        };

        let rv = inner.bump_rv();
        set_meta_field(&mut value, "resourceVersion", Some(json!(rv)));
        set_meta_field(&mut value, "generation", Some(json!(generation)));
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            set_meta_field(&mut value, field, meta_field(&stored, field).cloned());
        }
        set_status_field(&mut value, stored.get("status").cloned());

        if meta_field(&value, "deletionTimestamp").is_some() && !has_finalizers(&value) {
            inner.objects.remove(&k);
        } else {
            inner.objects.insert(k, value.clone());
        }
        decode(&value)
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let kind = kind_of::<K>();
        let mut inner = self.inner.lock();
        inner.record(Verb::Delete, &kind, name);
        inner.injected(Verb::Delete, &kind, name)?;

        let k = key(&kind, namespace, name);
        let Some(stored) = inner.objects.get(&k).cloned() else {
            return Ok(());
        };
        if has_finalizers(&stored) {
            let rv = inner.bump_rv();
            if let Some(value) = inner.objects.get_mut(&k) {
                set_meta_field(value, "deletionTimestamp", Some(json!(CREATION_TIMESTAMP)));
                set_meta_field(value, "resourceVersion", Some(json!(rv)));
            }
        } else {
            inner.objects.remove(&k);
        }
        Ok(())
    }

    async fn update_status<K: StoredObject>(&self, obj: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let (namespace, name) = object_key(obj)?;
        let incoming = serde_json::to_value(obj)?;
        let mut inner = self.inner.lock();
        inner.record(Verb::UpdateStatus, &kind, &name);
        inner.injected(Verb::UpdateStatus, &kind, &name)?;

        let k = key(&kind, &namespace, &name);
        let mut stored = inner
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("{} {} not found", kind, name)))?;

        let incoming_rv = meta_field(&incoming, "resourceVersion").cloned();
        if incoming_rv.is_some() && incoming_rv.as_ref() != meta_field(&stored, "resourceVersion") {
            return Err(api_error(
                409,
                "Conflict",
                format!("{} {} has been modified", kind, name),
            ));
        }

        let rv = inner.bump_rv();
        set_status_field(&mut stored, incoming.get("status").cloned());
        set_meta_field(&mut stored, "resourceVersion", Some(json!(rv)));
        inner.objects.insert(k, stored.clone());
        decode(&stored)
    }
}

/// One Event captured by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Normal or Warning
    pub warning: bool,
    /// Event reason
    pub reason: String,
    /// Event note
    pub note: Option<String>,
}

/// Event publisher that keeps everything it is given
#[derive(Clone, Default)]
pub struct RecordingEventPublisher {
    events: std::sync::Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventPublisher {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Reasons published so far, in order
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}
