//! Export of `tracing` spans to Cloud Trace via OTLP/HTTP.
//!
//! The exporter is a regular [`tracing_subscriber::Layer`] that is installed next to the log
//! output, see [`gcsprobe_observability::init_tracing`]. All spans at `DEBUG` and above are
//! exported, which covers the benchmark phases as well as the instrumented transport calls.
//!
//! The exporter uses a blocking HTTP client on a background thread. Hence, [`init_telemetry`]
//! and dropping the [`TelemetryGuard`] must both happen outside of the async runtime.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use gcsprobe_observability::ExportLayer;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::resource::ResourceDetector;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, SpanExporter};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::Layer;

use crate::auth::{CLOUD_PLATFORM_SCOPE, DefaultCredentials};
use crate::config::Telemetry;

/// Name of the instrumentation scope of all exported spans.
const TRACER_NAME: &str = "tracebench";

/// Header selecting the project that is billed for and receives the spans.
const USER_PROJECT_HEADER: &str = "x-goog-user-project";

/// Credentials for the telemetry endpoint.
#[derive(Clone)]
pub struct ExportAuth {
    /// OAuth bearer token with the `cloud-platform` scope.
    pub token: String,
    /// Project that receives the spans.
    pub project_id: String,
}

impl fmt::Debug for ExportAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportAuth")
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

/// Obtains a token and the target project for span export.
///
/// The project is taken from the configuration, then from `GOOGLE_CLOUD_PROJECT`, and finally
/// from the default credentials.
pub async fn authenticate(
    credentials: &DefaultCredentials,
    config: &Telemetry,
) -> Result<ExportAuth> {
    let token = credentials
        .token(&[CLOUD_PLATFORM_SCOPE])
        .await
        .context("failed to obtain token for span export")?;

    let configured = config
        .project_id
        .clone()
        .or_else(|| std::env::var("GOOGLE_CLOUD_PROJECT").ok());
    let project_id = match configured {
        Some(project_id) => project_id,
        None => credentials
            .project_id()
            .await
            .context("failed to determine project for span export")?,
    };

    Ok(ExportAuth { token, project_id })
}

/// Flushes and shuts down the tracer provider when dropped.
pub struct TelemetryGuard {
    provider: SdkTracerProvider,
}

impl fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryGuard").finish_non_exhaustive()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(error) = self.provider.force_flush() {
            tracing::error!(%error, "failed to flush spans");
        }
        if let Err(error) = self.provider.shutdown() {
            tracing::error!(%error, "failed to shut down tracer provider");
        }
    }
}

/// Creates the span exporter and registers the global tracer provider.
///
/// Returns the guard that flushes pending spans, and the layer that feeds `tracing` spans into
/// the exporter. The layer must be passed to [`gcsprobe_observability::init_tracing`].
pub fn init_telemetry(
    config: &Telemetry,
    auth: ExportAuth,
) -> Result<(TelemetryGuard, ExportLayer)> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(&config.endpoint)
        .with_headers(export_headers(&auth))
        .build()
        .context("failed to create span exporter")?;

    let resource = Resource::builder()
        .with_detector(Box::new(GcpDetector::from_env()))
        .with_service_name(config.service_name.clone())
        .with_attribute(KeyValue::new("gcp.project_id", auth.project_id))
        .build();

    Ok(install(exporter, resource))
}

/// Registers a tracer provider that batches spans into `exporter`.
fn install<E>(exporter: E, resource: Resource) -> (TelemetryGuard, ExportLayer)
where
    E: SpanExporter + 'static,
{
    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource)
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());

    let layer = tracing_opentelemetry::layer()
        .with_tracer(provider.tracer(TRACER_NAME))
        .with_filter(LevelFilter::DEBUG)
        .boxed();

    (TelemetryGuard { provider }, layer)
}

fn export_headers(auth: &ExportAuth) -> HashMap<String, String> {
    HashMap::from([
        ("authorization".to_owned(), format!("Bearer {}", auth.token)),
        (USER_PROJECT_HEADER.to_owned(), auth.project_id.clone()),
    ])
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Detects the Google Cloud platform the process runs on from its environment.
///
/// Only environment variables set by the respective platform are inspected, the metadata server
/// is never queried. Outside of Google Cloud, the detected resource is empty.
pub struct GcpDetector {
    lookup: Lookup,
}

impl GcpDetector {
    /// Creates a detector reading the process environment.
    pub fn from_env() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a detector reading variables from `lookup`.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.is_empty())
    }

    fn attributes(&self) -> Vec<KeyValue> {
        let mut attributes = Vec::new();

        if let Some(function) = self.var("FUNCTION_TARGET") {
            attributes.push(KeyValue::new("cloud.platform", "gcp_cloud_functions"));
            attributes.push(KeyValue::new("faas.name", self.var("K_SERVICE").unwrap_or(function)));
            if let Some(version) = self.var("K_REVISION") {
                attributes.push(KeyValue::new("faas.version", version));
            }
        } else if let Some(service) = self.var("K_SERVICE") {
            attributes.push(KeyValue::new("cloud.platform", "gcp_cloud_run"));
            attributes.push(KeyValue::new("faas.name", service));
            if let Some(revision) = self.var("K_REVISION") {
                attributes.push(KeyValue::new("faas.version", revision));
            }
        } else if let Some(job) = self.var("CLOUD_RUN_JOB") {
            attributes.push(KeyValue::new("cloud.platform", "gcp_cloud_run"));
            attributes.push(KeyValue::new("faas.name", job));
            if let Some(execution) = self.var("CLOUD_RUN_EXECUTION") {
                attributes.push(KeyValue::new("gcp.cloud_run.job.execution", execution));
            }
            if let Some(index) = self.var("CLOUD_RUN_TASK_INDEX") {
                attributes.push(KeyValue::new("gcp.cloud_run.job.task_index", index));
            }
        } else if let Some(service) = self.var("GAE_SERVICE") {
            attributes.push(KeyValue::new("cloud.platform", "gcp_app_engine"));
            attributes.push(KeyValue::new("faas.name", service));
            if let Some(version) = self.var("GAE_VERSION") {
                attributes.push(KeyValue::new("faas.version", version));
            }
            if let Some(instance) = self.var("GAE_INSTANCE") {
                attributes.push(KeyValue::new("faas.instance", instance));
            }
        } else if self.var("KUBERNETES_SERVICE_HOST").is_some() {
            attributes.push(KeyValue::new("cloud.platform", "gcp_kubernetes_engine"));
            if let Some(pod) = self.var("HOSTNAME") {
                attributes.push(KeyValue::new("k8s.pod.name", pod));
            }
        }

        if !attributes.is_empty() {
            attributes.push(KeyValue::new("cloud.provider", "gcp"));
        }
        if let Some(project) = self.var("GOOGLE_CLOUD_PROJECT") {
            attributes.push(KeyValue::new("cloud.account.id", project));
        }

        attributes
    }
}

impl fmt::Debug for GcpDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpDetector").finish_non_exhaustive()
    }
}

impl ResourceDetector for GcpDetector {
    fn detect(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(self.attributes())
            .build()
    }
}
