//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager / reporting component name
pub const OPERATOR_NAME: &str = "spinnaker-operator";

/// Label stamped on every object the operator generates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8383;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default manifest generator / config validator endpoint
pub const DEFAULT_GENERATOR_URL: &str = "http://localhost:8064";

/// Default timeout for calls to the manifest generator and config validator
pub const DEFAULT_GENERATOR_TIMEOUT_SECS: u64 = 120;

/// Default timeout for a single secret backend call
pub const DEFAULT_SECRET_BACKEND_TIMEOUT_SECS: u64 = 30;

/// Public port used by the service expose strategy when nothing else is configured
pub const DEFAULT_EXPOSE_PORT: i32 = 80;

/// Requeue interval once a resource is converged (seconds)
pub const DEFAULT_CONVERGED_REQUEUE_SECS: u64 = 300;

/// Requeue interval while services are still rolling out (seconds)
pub const DEFAULT_ROLLOUT_REQUEUE_SECS: u64 = 15;

/// Default Fibonacci backoff floor for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Default Fibonacci backoff ceiling for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Status hash key for the logical configuration. Part of the CR status schema.
pub const CONFIG_HASH_KEY: &str = "config";

/// Status hash key for kustomize overlays. Part of the CR status schema.
pub const KUSTOMIZE_HASH_KEY: &str = "kustomize";

/// Status phase values
pub const STATUS_UPDATING: &str = "Updating";
pub const STATUS_OK: &str = "OK";
pub const STATUS_FAILURE: &str = "Failure";

/// Kubernetes Service names are the logical service name with this prefix
pub const SERVICE_NAME_PREFIX: &str = "spin-";

/// API gateway logical service name
pub const GATE: &str = "gate";

/// UI logical service name
pub const DECK: &str = "deck";

/// Default listen port of the API gateway
pub const GATE_DEFAULT_PORT: i32 = 8084;

/// Default listen port of the UI
pub const DECK_DEFAULT_PORT: i32 = 9000;

/// User-pinnable API base URL
pub const API_OVERRIDE_URL_PATH: &str = "security.apiSecurity.overrideBaseUrl";

/// User-pinnable UI base URL
pub const UI_OVERRIDE_URL_PATH: &str = "security.uiSecurity.overrideBaseUrl";

/// Annotation that turns a load balancer into a TLS listener on AWS
pub const AWS_SSL_CERT_ANNOTATION: &str = "service.beta.kubernetes.io/aws-load-balancer-ssl-cert";

/// Services running on the JVM (Spring Boot), which read archaius and spring settings
pub const JAVA_SERVICES: &[&str] = &[
    "clouddriver",
    "echo",
    "fiat",
    "front50",
    "gate",
    "igor",
    "kayenta",
    "keel",
    "orca",
    "rosco",
];

/// Every service that can receive per-service settings
pub const ALL_SERVICES: &[&str] = &[
    "clouddriver",
    "deck",
    "echo",
    "fiat",
    "front50",
    "gate",
    "igor",
    "kayenta",
    "keel",
    "orca",
    "rosco",
];

/// Key of the global block inside `service-settings`
pub const GLOBAL_SETTINGS_KEY: &str = "spinnaker";

/// Service that never receives the global settings block
pub const GLOBAL_SETTINGS_EXCLUDED_SERVICE: &str = "deck";

/// Base directory for file-mounted secrets, one sub-directory per service
pub const SECRETS_MOUNT_BASE: &str = "/var/secrets";
