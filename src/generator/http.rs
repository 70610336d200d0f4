//! Multipart HTTP client for the manifest generator and the config validator.
//!
//! Both endpoints take the same body: the main configuration as `config`, one part per
//! profile (`profiles__<svc>-local.yml`), per service settings block
//! (`service-settings__<svc>.yml`) and supporting file (`files__<name>`).

use super::{ConfigValidator, ManifestGenerator, ValidationMessage};
use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use crate::generated::GeneratedManifestSet;
use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error};

const MANIFESTS_PATH: &str = "/v1/spinnaker/manifests";
const VALIDATE_PATH: &str = "/v1/spinnaker/validate";

/// `(part name, body)` pairs of the request body, in a stable order
pub fn payload_parts(svc: &SpinnakerService) -> Result<Vec<(String, String)>> {
    let cfg = &svc.spec.spinnaker_config;
    let mut parts = vec![("config".to_string(), serde_yaml::to_string(&cfg.config)?)];
    for (service, profile) in &cfg.profiles {
        parts.push((
            format!("profiles__{service}-local.yml"),
            serde_yaml::to_string(profile)?,
        ));
    }
    for (service, settings) in &cfg.service_settings {
        parts.push((
            format!("service-settings__{service}.yml"),
            serde_yaml::to_string(settings)?,
        ));
    }
    for (name, content) in &cfg.files {
        parts.push((format!("files__{name}"), content.clone()));
    }
    Ok(parts)
}

fn form(svc: &SpinnakerService) -> Result<Form> {
    let mut form = Form::new();
    for (name, body) in payload_parts(svc)? {
        let part = Part::text(body).file_name(name.clone());
        form = form.part(name, part);
    }
    Ok(form)
}

/// Client for a generator service exposing both endpoints
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: Client,
    base_url: String,
}

impl HttpGenerator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OperatorError::generator(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, url: &str, svc: &SpinnakerService) -> std::result::Result<String, String> {
        let body = form(svc).map_err(|e| e.to_string())?;
        let response = self
            .client
            .post(url)
            .multipart(body)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("failed to read response from {url}: {e}"))?;
        if !status.is_success() {
            return Err(format!("{url} answered {status}: {text}"));
        }
        Ok(text)
    }
}

#[async_trait]
impl ManifestGenerator for HttpGenerator {
    async fn generate(&self, svc: &SpinnakerService) -> Result<GeneratedManifestSet> {
        let url = format!("{}{MANIFESTS_PATH}", self.base_url);
        let start = Instant::now();
        let result = self.post(&url, svc).await;
        metrics::observe_generator_duration(start.elapsed().as_secs_f64());

        let text = result.map_err(|e| {
            error!(error = %e, "manifest generation failed");
            OperatorError::generator(e)
        })?;
        let manifests: GeneratedManifestSet = serde_json::from_str(&text)
            .map_err(|e| OperatorError::generator(format!("invalid generator response: {e}")))?;
        debug!(objects = manifests.object_count(), "manifests generated");
        Ok(manifests)
    }
}

#[async_trait]
impl ConfigValidator for HttpGenerator {
    async fn validate(
        &self,
        svc: &SpinnakerService,
        fail_fast: bool,
        skip_validators: &[String],
    ) -> Result<Vec<ValidationMessage>> {
        let url = format!(
            "{}{VALIDATE_PATH}?failFast={fail_fast}&skipValidators={}",
            self.base_url,
            skip_validators.join(",")
        );
        let text = self.post(&url, svc).await.map_err(OperatorError::Validator)?;
        serde_json::from_str(&text)
            .map_err(|e| OperatorError::Validator(format!("invalid validator response: {e}")))
    }
}
