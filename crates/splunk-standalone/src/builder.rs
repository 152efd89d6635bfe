//! Desired-state builders for the objects a standalone instance owns
//!
//! Builders are pure: the same descriptor always yields the same objects, so
//! drift can be detected by comparing against what is stored.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvVar, ExecAction, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm,
    PodAntiAffinity, PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use rand::distributions::Alphanumeric;
use rand::Rng;

use splunk_common::crd::{AppDeploymentContext, AppEntry, Standalone, StorageConfig};
use splunk_common::naming::{self, INSTANCE_TYPE};
use splunk_common::{
    deterministic_hash, Error, Result, COMPONENT_VERSIONED_SECRETS, LABEL_COMPONENT,
    LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_NAME, LABEL_PART_OF, OPERATOR_NAME,
    TEMPLATE_HASH_ANNOTATION,
};

/// Image used when the descriptor does not name one
pub const DEFAULT_IMAGE: &str = "splunk/splunk";

/// Container name inside every pod
pub const CONTAINER_NAME: &str = "splunk";

/// Key of the app listing inside its ConfigMap
pub const APP_LIST_KEY: &str = "app-list.json";

/// Key of the SmartStore configuration inside its ConfigMap
pub const INDEXES_CONF_KEY: &str = "indexes.conf";

/// Keys generated into the namespace admin secret
pub const ADMIN_SECRET_KEYS: [&str; 5] = [
    "hec_token",
    "idxc_secret",
    "pass4SymmKey",
    "password",
    "shc_secret",
];

const SECRETS_VOLUME: &str = "mnt-splunk-secrets";
const SECRETS_MOUNT: &str = "/mnt/splunk-secrets";
const SMARTSTORE_VOLUME: &str = "mnt-splunk-operator";
const SMARTSTORE_MOUNT: &str = "/mnt/splunk-operator/local";
const APP_LIST_VOLUME: &str = "mnt-app-listing";
const APP_LIST_MOUNT: &str = "/mnt/app-listing";

const ETC_CAPACITY: &str = "10Gi";
const VAR_CAPACITY: &str = "100Gi";
const RUN_AS_USER: i64 = 41812;
const DEFAULT_MODE: i32 = 420;

/// Ports exposed by the container and both services
pub const PORTS: [(&str, i32); 4] = [
    ("http-splunkweb", 8000),
    ("http-hec", 8088),
    ("https-splunkd", 8089),
    ("tcp-s2s", 9997),
];

/// Inputs to the workload that come from other converged objects
#[derive(Clone, Debug)]
pub struct WorkloadInputs<'a> {
    /// Versioned secret mounted into the pods
    pub secret_name: &'a str,
    /// Image used when the descriptor does not set one
    pub default_image: &'a str,
    /// Mount the SmartStore ConfigMap
    pub smartstore: bool,
    /// Mount the app listing ConfigMap
    pub app_list: bool,
}

/// Builds the desired form of every owned object
///
/// The engine only talks to this trait, so alternate layouts can be swapped
/// in without touching convergence.
pub trait ResourceBuilder: Send + Sync {
    /// Namespace admin secret with freshly generated credentials
    fn admin_secret(&self, namespace: &str) -> Secret;

    /// Governing headless Service of the StatefulSet
    fn headless_service(&self, cr: &Standalone) -> Service;

    /// Client-facing Service
    fn service(&self, cr: &Standalone) -> Service;

    /// Versioned secret carrying the mounted credentials
    fn versioned_secret(
        &self,
        cr: &Standalone,
        version: u32,
        data: BTreeMap<String, ByteString>,
    ) -> Secret;

    /// ConfigMap with the rendered `indexes.conf`
    fn smartstore_config(&self, cr: &Standalone) -> ConfigMap;

    /// ConfigMap with the remote app listing
    fn app_list_config(&self, cr: &Standalone, apps: &AppDeploymentContext) -> Result<ConfigMap>;

    /// The StatefulSet running the instance
    fn stateful_set(&self, cr: &Standalone, inputs: &WorkloadInputs<'_>) -> Result<StatefulSet>;
}

/// Labels selecting the pods of an instance
pub fn selector_labels(cr_name: &str) -> BTreeMap<String, String> {
    let instance = naming::standalone_name(cr_name);
    BTreeMap::from([
        (LABEL_COMPONENT.to_string(), INSTANCE_TYPE.to_string()),
        (LABEL_INSTANCE.to_string(), instance.clone()),
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (LABEL_NAME.to_string(), INSTANCE_TYPE.to_string()),
        (LABEL_PART_OF.to_string(), instance),
    ])
}

/// Labels identifying the versioned secrets of an instance
pub fn versioned_secret_labels(cr_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            LABEL_COMPONENT.to_string(),
            COMPONENT_VERSIONED_SECRETS.to_string(),
        ),
        (
            LABEL_INSTANCE.to_string(),
            naming::standalone_name(cr_name),
        ),
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
    ])
}

/// Hash of a StatefulSet's pod template as recorded on the object
pub fn template_hash(sts: &StatefulSet) -> Option<&str> {
    sts.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(TEMPLATE_HASH_ANNOTATION))
        .map(String::as_str)
}

fn owned_meta(cr: &Standalone, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cr.namespace(),
        labels: Some(labels),
        owner_references: cr.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_hec_token() -> String {
    let mut rng = rand::thread_rng();
    let hex = |n: usize, rng: &mut rand::rngs::ThreadRng| -> String {
        (0..n)
            .map(|_| format!("{:X}", rng.gen_range(0..16u8)))
            .collect()
    };
    let groups = [8, 4, 4, 4, 12].map(|n| hex(n, &mut rng));
    groups.join("-")
}

fn service_ports() -> Vec<ServicePort> {
    PORTS
        .iter()
        .map(|(name, port)| ServicePort {
            name: Some(name.to_string()),
            port: *port,
            target_port: Some(IntOrString::Int(*port)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect()
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn exec_probe(command: &[&str], initial_delay: i32, timeout: i32, period: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command.iter().map(|c| c.to_string()).collect()),
        }),
        initial_delay_seconds: Some(initial_delay),
        timeout_seconds: Some(timeout),
        period_seconds: Some(period),
        ..Default::default()
    }
}

fn default_resources() -> ResourceRequirements {
    let quantities = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };
    ResourceRequirements {
        limits: Some(quantities("4", "8Gi")),
        requests: Some(quantities("100m", "512Mi")),
        ..Default::default()
    }
}

fn defaults_url(cr: &Standalone) -> String {
    let mut urls = format!("{}/default.yml", SECRETS_MOUNT);
    for extra in [&cr.spec.defaults_url_apps, &cr.spec.defaults_url] {
        if let Some(url) = extra.as_deref().filter(|u| !u.is_empty()) {
            urls = format!("{},{}", url, urls);
        }
    }
    urls
}

fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            default_mode: Some(DEFAULT_MODE),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn config_map_volume(name: &str, config_map: String) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.into(),
            default_mode: Some(DEFAULT_MODE),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// Storage for one of /opt/splunk/{etc,var}
///
/// Persistent storage yields a claim template; ephemeral storage an emptyDir.
fn storage(
    cr: &Standalone,
    suffix: &str,
    config: &StorageConfig,
    default_capacity: &str,
    volumes: &mut Vec<Volume>,
    mounts: &mut Vec<VolumeMount>,
    claims: &mut Vec<PersistentVolumeClaim>,
) {
    let path = format!("/opt/splunk/{}", suffix);
    if config.ephemeral_storage {
        let name = format!("mnt-splunk-{}", suffix);
        volumes.push(Volume {
            name: name.clone(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        mounts.push(mount(&name, &path));
        return;
    }

    let name = format!("pvc-{}", suffix);
    mounts.push(mount(&name, &path));
    claims.push(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cr.namespace(),
            labels: Some(selector_labels(&cr.name_any())),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(config.capacity_or(default_capacity).to_string()),
                )])),
                ..Default::default()
            }),
            storage_class_name: config.storage_class_name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    });
}

fn anti_affinity(instance: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(vec![LabelSelectorRequirement {
                                key: LABEL_INSTANCE.to_string(),
                                operator: "In".to_string(),
                                values: Some(vec![instance.to_string()]),
                            }]),
                            ..Default::default()
                        }),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Render `indexes.conf` for the SmartStore volumes and indexes
pub fn render_indexes_conf(cr: &Standalone) -> String {
    let smartstore = &cr.spec.smartstore;
    let mut conf = String::new();
    for vol in &smartstore.volumes {
        conf.push_str(&format!(
            "[volume:{}]\nstorageType = remote\npath = s3://{}\nremote.s3.endpoint = {}\n\n",
            vol.name, vol.path, vol.endpoint
        ));
    }
    for index in &smartstore.indexes {
        let Some(vol) = smartstore.volume_for(index) else {
            continue;
        };
        conf.push_str(&format!(
            "[{name}]\nremotePath = volume:{vol}/{remote}\n\
             homePath = $SPLUNK_DB/{name}/db\n\
             coldPath = $SPLUNK_DB/{name}/colddb\n\
             thawedPath = $SPLUNK_DB/{name}/thaweddb\n\n",
            name = index.name,
            vol = vol.name,
            remote = index.effective_remote_path(),
        ));
    }
    conf
}

/// Standard layout matching the Splunk container image's expectations
#[derive(Clone, Debug, Default)]
pub struct DefaultBuilder;

impl ResourceBuilder for DefaultBuilder {
    fn admin_secret(&self, namespace: &str) -> Secret {
        let data = ADMIN_SECRET_KEYS
            .iter()
            .map(|key| {
                let value = match *key {
                    "hec_token" => random_hec_token(),
                    _ => random_string(24),
                };
                (key.to_string(), ByteString(value.into_bytes()))
            })
            .collect();
        Secret {
            metadata: ObjectMeta {
                name: Some(naming::namespace_secret_name(namespace)),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    fn headless_service(&self, cr: &Standalone) -> Service {
        let name = cr.name_any();
        Service {
            metadata: owned_meta(cr, naming::headless_service_name(&name), selector_labels(&name)),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector_labels(&name)),
                ports: Some(service_ports()),
                publish_not_ready_addresses: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(&self, cr: &Standalone) -> Service {
        let name = cr.name_any();
        let template = &cr.spec.service_template;
        let mut labels = template.labels.clone();
        labels.extend(selector_labels(&name));

        let mut meta = owned_meta(cr, naming::service_name(&name), labels);
        if !template.annotations.is_empty() {
            meta.annotations = Some(template.annotations.clone());
        }
        let service_type = template
            .service_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or("ClusterIP");

        Service {
            metadata: meta,
            spec: Some(ServiceSpec {
                type_: Some(service_type.to_string()),
                selector: Some(selector_labels(&name)),
                ports: Some(service_ports()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn versioned_secret(
        &self,
        cr: &Standalone,
        version: u32,
        data: BTreeMap<String, ByteString>,
    ) -> Secret {
        let name = cr.name_any();
        Secret {
            metadata: owned_meta(
                cr,
                naming::versioned_secret_name(&name, version),
                versioned_secret_labels(&name),
            ),
            data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    fn smartstore_config(&self, cr: &Standalone) -> ConfigMap {
        let name = cr.name_any();
        ConfigMap {
            metadata: owned_meta(cr, naming::smartstore_config_name(&name), selector_labels(&name)),
            data: Some(BTreeMap::from([(
                INDEXES_CONF_KEY.to_string(),
                render_indexes_conf(cr),
            )])),
            ..Default::default()
        }
    }

    fn app_list_config(&self, cr: &Standalone, apps: &AppDeploymentContext) -> Result<ConfigMap> {
        let name = cr.name_any();
        let listing: BTreeMap<&str, &[AppEntry]> = apps
            .sources
            .iter()
            .map(|(source, state)| (source.as_str(), state.objects.as_slice()))
            .collect();
        let json = serde_json::to_string_pretty(&listing)
            .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))?;
        Ok(ConfigMap {
            metadata: owned_meta(cr, naming::app_list_config_name(&name), selector_labels(&name)),
            data: Some(BTreeMap::from([(APP_LIST_KEY.to_string(), json)])),
            ..Default::default()
        })
    }

    fn stateful_set(&self, cr: &Standalone, inputs: &WorkloadInputs<'_>) -> Result<StatefulSet> {
        let name = cr.name_any();
        let instance = naming::standalone_name(&name);
        let spec = &cr.spec;

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        let mut claims = Vec::new();
        storage(
            cr,
            "etc",
            &spec.etc_volume_storage_config,
            ETC_CAPACITY,
            &mut volumes,
            &mut mounts,
            &mut claims,
        );
        storage(
            cr,
            "var",
            &spec.var_volume_storage_config,
            VAR_CAPACITY,
            &mut volumes,
            &mut mounts,
            &mut claims,
        );

        volumes.push(secret_volume(SECRETS_VOLUME, inputs.secret_name));
        mounts.push(mount(SECRETS_VOLUME, SECRETS_MOUNT));
        if inputs.smartstore {
            volumes.push(config_map_volume(
                SMARTSTORE_VOLUME,
                naming::smartstore_config_name(&name),
            ));
            mounts.push(mount(SMARTSTORE_VOLUME, SMARTSTORE_MOUNT));
        }
        if inputs.app_list {
            volumes.push(config_map_volume(
                APP_LIST_VOLUME,
                naming::app_list_config_name(&name),
            ));
            mounts.push(mount(APP_LIST_VOLUME, APP_LIST_MOUNT));
        }

        let mut env_vars = vec![
            env("SPLUNK_HOME", "/opt/splunk"),
            env("SPLUNK_START_ARGS", "--accept-license"),
            env("SPLUNK_DEFAULTS_URL", defaults_url(cr)),
            env("SPLUNK_HOME_OWNERSHIP_ENFORCEMENT", "false"),
            env("SPLUNK_ROLE", "splunk_standalone"),
            env("SPLUNK_DECLARATIVE_ADMIN_PASSWORD", "true"),
        ];
        env_vars.extend(spec.extra_env.iter().map(|e| env(&e.name, e.value.clone())));

        let image = spec
            .image
            .as_deref()
            .filter(|i| !i.is_empty())
            .unwrap_or(inputs.default_image);
        let pull_policy = spec
            .image_pull_policy
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("IfNotPresent");

        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(image.to_string()),
            image_pull_policy: Some(pull_policy.to_string()),
            ports: Some(
                PORTS
                    .iter()
                    .map(|(port_name, port)| ContainerPort {
                        name: Some(port_name.to_string()),
                        container_port: *port,
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            env: Some(env_vars),
            resources: Some(spec.resources.clone().unwrap_or_else(default_resources)),
            volume_mounts: Some(mounts),
            liveness_probe: Some(exec_probe(&["/sbin/checkstate.sh"], 300, 30, 30)),
            readiness_probe: Some(exec_probe(
                &[
                    "/bin/grep",
                    "started",
                    "/opt/container_artifact/splunk-container.state",
                ],
                10,
                5,
                5,
            )),
            ..Default::default()
        };

        let template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(selector_labels(&name)),
                annotations: Some(BTreeMap::from([
                    (
                        "traffic.sidecar.istio.io/excludeOutboundPorts".to_string(),
                        "8089,8191,9997".to_string(),
                    ),
                    (
                        "traffic.sidecar.istio.io/includeInboundPorts".to_string(),
                        "8000,8088".to_string(),
                    ),
                ])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                volumes: Some(volumes),
                security_context: Some(PodSecurityContext {
                    run_as_user: Some(RUN_AS_USER),
                    run_as_non_root: Some(true),
                    fs_group: Some(RUN_AS_USER),
                    ..Default::default()
                }),
                affinity: Some(anti_affinity(&instance)),
                scheduler_name: Some(
                    spec.scheduler_name
                        .clone()
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| "default-scheduler".to_string()),
                ),
                service_account_name: spec.service_account.clone().filter(|s| !s.is_empty()),
                ..Default::default()
            }),
        };

        let hash = deterministic_hash(&serde_json::to_string(&template)?);
        let mut meta = owned_meta(cr, instance, selector_labels(&name));
        meta.annotations = Some(BTreeMap::from([(TEMPLATE_HASH_ANNOTATION.to_string(), hash)]));

        Ok(StatefulSet {
            metadata: meta,
            spec: Some(StatefulSetSpec {
                replicas: Some(spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(selector_labels(&name)),
                    ..Default::default()
                },
                template,
                volume_claim_templates: (!claims.is_empty()).then_some(claims),
                service_name: naming::headless_service_name(&name).into(),
                pod_management_policy: Some("Parallel".to_string()),
                update_strategy: Some(k8s_openapi::api::apps::v1::StatefulSetUpdateStrategy {
                    type_: Some("OnDelete".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
