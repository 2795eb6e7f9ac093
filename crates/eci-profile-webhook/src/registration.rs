//! MutatingWebhookConfiguration registration.
//!
//! The configuration is upserted under a fixed name on every start: created
//! when absent, otherwise only its `webhooks` array is replaced with a JSON
//! Patch. Clusters at 1.16 or newer get an `admissionregistration.k8s.io/v1`
//! object and any stale v1beta1 object of the same name is removed first.
//! Older clusters get the legacy v1beta1 shape.

use std::fmt;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::ByteString;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ObjectMeta, Patch, PatchParams,
    PostParams,
};
use kube::{Api, Client};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::error::{BootstrapError, Result};

/// Webhook entry name in the v1 configuration.
pub const WEBHOOK_NAME_V1: &str = "eci-profile.eci.aliyun.com";

/// Webhook entry name in the legacy v1beta1 configuration.
pub const WEBHOOK_NAME_V1BETA1: &str = "autoscaler.eci.aliyun.com";

const ADMISSION_V1_MIN_VERSION: semver::Version = semver::Version::new(1, 16, 0);
const TIMEOUT_SECONDS: i32 = 5;

/// Which `admissionregistration.k8s.io` version to register with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionApi {
    /// `admissionregistration.k8s.io/v1`, Kubernetes 1.16+.
    V1,
    /// `admissionregistration.k8s.io/v1beta1`.
    V1Beta1,
}

impl AdmissionApi {
    /// Pick the API for a server `gitVersion` such as `v1.31.2-eks-7f9249a`.
    ///
    /// Pre-release and build suffixes are ignored.
    ///
    /// # Errors
    ///
    /// Fails if the version is not semver.
    pub fn for_server_version(git_version: &str) -> Result<Self> {
        let version = semver::Version::parse(git_version.trim_start_matches('v')).map_err(
            |source| BootstrapError::Version {
                version: git_version.to_string(),
                source,
            },
        )?;
        let release = semver::Version::new(version.major, version.minor, version.patch);
        Ok(if release >= ADMISSION_V1_MIN_VERSION {
            Self::V1
        } else {
            Self::V1Beta1
        })
    }

    /// Query the API server and pick the API it supports.
    ///
    /// # Errors
    ///
    /// Fails if the version query fails or returns a non-semver version.
    pub async fn detect(client: &Client) -> Result<Self> {
        let info = client.apiserver_version().await?;
        let api = Self::for_server_version(&info.git_version)?;
        info!(
            server_version = %info.git_version,
            major = %info.major,
            minor = %info.minor,
            supports_admission_v1 = api == Self::V1,
            "detected API server version"
        );
        Ok(api)
    }
}

impl fmt::Display for AdmissionApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => f.write_str("v1"),
            Self::V1Beta1 => f.write_str("v1beta1"),
        }
    }
}

/// Build the v1 MutatingWebhookConfiguration.
#[must_use]
pub fn mutating_webhook_v1(config: &WebhookConfig, ca_bundle: &[u8]) -> MutatingWebhookConfiguration {
    let webhook = MutatingWebhook {
        name: WEBHOOK_NAME_V1.to_string(),
        admission_review_versions: vec!["v1".to_string(), "v1beta1".to_string()],
        client_config: WebhookClientConfig {
            ca_bundle: Some(ByteString(ca_bundle.to_vec())),
            service: Some(ServiceReference {
                name: config.service.clone(),
                namespace: config.namespace.clone(),
                path: Some(config.path.clone()),
                port: Some(config.port),
            }),
            url: None,
        },
        rules: Some(vec![RuleWithOperations {
            operations: Some(vec!["CREATE".to_string()]),
            api_groups: Some(vec![String::new()]),
            api_versions: Some(vec!["v1".to_string()]),
            resources: Some(vec!["pods".to_string(), "pods/binding".to_string()]),
            scope: Some("*".to_string()),
        }]),
        failure_policy: Some("Ignore".to_string()),
        match_policy: Some("Equivalent".to_string()),
        side_effects: "NoneOnDryRun".to_string(),
        timeout_seconds: Some(TIMEOUT_SECONDS),
        reinvocation_policy: Some("Never".to_string()),
        ..Default::default()
    };

    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(config.service.clone()),
            ..Default::default()
        },
        webhooks: Some(vec![webhook]),
    }
}

/// Build the legacy v1beta1 MutatingWebhookConfiguration.
#[must_use]
pub fn mutating_webhook_v1beta1(config: &WebhookConfig, ca_bundle: &[u8]) -> Value {
    json!({
        "apiVersion": "admissionregistration.k8s.io/v1beta1",
        "kind": "MutatingWebhookConfiguration",
        "metadata": {
            "name": config.service,
        },
        "webhooks": [{
            "name": WEBHOOK_NAME_V1BETA1,
            "admissionReviewVersions": ["v1beta1"],
            "clientConfig": {
                "caBundle": ByteString(ca_bundle.to_vec()),
                "service": {
                    "name": config.service,
                    "namespace": config.namespace,
                    "path": config.path,
                    "port": config.port,
                },
            },
            "rules": [{
                "operations": ["CREATE"],
                "apiGroups": [""],
                "apiVersions": ["v1"],
                "resources": ["pods", "pods/binding"],
                "scope": "*",
            }],
            "failurePolicy": "Ignore",
            "matchPolicy": "Equivalent",
            "sideEffects": "Unknown",
            "timeoutSeconds": TIMEOUT_SECONDS,
            "reinvocationPolicy": "Never",
        }],
    })
}

/// JSON Patch replacing the whole `webhooks` array.
///
/// # Errors
///
/// Fails if `webhooks` cannot be encoded.
pub fn replace_webhooks_patch(webhooks: &impl serde::Serialize) -> Result<json_patch::Patch> {
    let patch = json!([{
        "op": "replace",
        "path": "/webhooks",
        "value": serde_json::to_value(webhooks)?,
    }]);
    Ok(serde_json::from_value(patch)?)
}

fn legacy_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(
        "admissionregistration.k8s.io",
        "v1beta1",
        "MutatingWebhookConfiguration",
    );
    ApiResource::from_gvk_with_plural(&gvk, "mutatingwebhookconfigurations")
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Upserts the webhook's MutatingWebhookConfiguration.
pub struct WebhookRegistrar {
    client: Client,
    config: WebhookConfig,
}

impl WebhookRegistrar {
    /// Create a registrar.
    #[must_use]
    pub fn new(client: Client, config: WebhookConfig) -> Self {
        Self { client, config }
    }

    /// Configuration object name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.service
    }

    /// Register against `api` with `ca_bundle` as the trusted CA.
    ///
    /// # Errors
    ///
    /// Fails if the lookup, create or patch call fails. Removing a stale
    /// v1beta1 object is best effort.
    pub async fn register(&self, api: AdmissionApi, ca_bundle: &[u8]) -> Result<()> {
        info!(name = self.name(), %api, "registering mutating webhook");
        match api {
            AdmissionApi::V1 => self.register_v1(ca_bundle).await?,
            AdmissionApi::V1Beta1 => self.register_v1beta1(ca_bundle).await?,
        }
        info!(name = self.name(), %api, "registered mutating webhook");
        Ok(())
    }

    async fn register_v1(&self, ca_bundle: &[u8]) -> Result<()> {
        self.delete_legacy().await;

        let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        let desired = mutating_webhook_v1(&self.config, ca_bundle);

        let existing = api.get_opt(self.name()).await.map_err(|e| self.failed(e))?;
        if existing.is_none() {
            info!(name = self.name(), "creating v1 MutatingWebhookConfiguration");
            api.create(&PostParams::default(), &desired)
                .await
                .map_err(|e| self.failed(e))?;
            return Ok(());
        }

        let patch = replace_webhooks_patch(&desired.webhooks)?;
        api.patch(self.name(), &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map_err(|e| self.failed(e))?;
        info!(name = self.name(), "patched v1 MutatingWebhookConfiguration");
        Ok(())
    }

    async fn register_v1beta1(&self, ca_bundle: &[u8]) -> Result<()> {
        let resource = legacy_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let desired = mutating_webhook_v1beta1(&self.config, ca_bundle);

        let existing = api.get_opt(self.name()).await.map_err(|e| self.failed(e))?;
        if existing.is_none() {
            info!(name = self.name(), "creating v1beta1 MutatingWebhookConfiguration");
            let object: DynamicObject = serde_json::from_value(desired)?;
            api.create(&PostParams::default(), &object)
                .await
                .map_err(|e| self.failed(e))?;
            return Ok(());
        }

        let patch = replace_webhooks_patch(&desired["webhooks"])?;
        api.patch(self.name(), &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map_err(|e| self.failed(e))?;
        info!(name = self.name(), "patched v1beta1 MutatingWebhookConfiguration");
        Ok(())
    }

    async fn delete_legacy(&self) {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &legacy_resource());
        match api.delete(self.name(), &DeleteParams::default()).await {
            Ok(_) => info!(name = self.name(), "deleted v1beta1 MutatingWebhookConfiguration"),
            Err(e) if is_not_found(&e) => {}
            Err(e) => warn!(
                name = self.name(),
                error = %e,
                "failed to delete v1beta1 MutatingWebhookConfiguration"
            ),
        }
    }

    fn failed(&self, source: kube::Error) -> BootstrapError {
        BootstrapError::Registration {
            name: self.name().to_string(),
            source,
        }
    }
}
