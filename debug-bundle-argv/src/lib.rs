//! Translates a [`DebugBundleParameters`] record into the argument vector
//! for the external debug-bundle collector binary.
//!
//! Pure, synchronous, no I/O: [`build_argv`] either returns a complete
//! argv or an [`ArgvError`] describing why the parameters were rejected,
//! with no partial side effects either way.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SASL authentication parameters passed through to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scram {
    pub username: String,
    pub password: String,
    pub mechanism: String,
}

/// Recognized optional fields of a debug-bundle collection request.
///
/// Each set field contributes exactly the flags documented on it; unset
/// fields contribute nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugBundleParameters {
    pub authn: Option<Scram>,
    pub controller_logs_size_limit_bytes: Option<u64>,
    pub cpu_profiler_wait_seconds: Option<u64>,
    pub logs_since: Option<String>,
    pub logs_size_limit_bytes: Option<u64>,
    pub logs_until: Option<String>,
    pub metrics_interval_seconds: Option<u64>,
    pub partition: Vec<String>,
    pub tls_enabled: Option<bool>,
    pub tls_insecure_skip_verify: Option<bool>,
    pub k8s_namespace: Option<String>,
}

/// Errors from building an argument vector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgvError {
    #[error(
        "k8s_namespace '{namespace}' is not a valid RFC-1123 label \
         (non-empty, <=63 chars, alphanumeric ends, [A-Za-z0-9-] interior)"
    )]
    InvalidNamespace { namespace: String },
}

/// Substring that marks an argv token as carrying a SASL password.
///
/// Tokens containing this are scrubbed by [`redacted_argv`] before being
/// handed to a log line.
const PASSWORD_FLAG: &str = "-Xpass=";

/// Build the argument vector for invoking the collector binary.
///
/// Ordering: the fixed leading arguments, then each optional group in the
/// order the fields are documented, skipping anything left unset.
pub fn build_argv(
    collector_path: &Path,
    bundle_file_path: &Path,
    params: &DebugBundleParameters,
) -> Result<Vec<String>, ArgvError> {
    if let Some(namespace) = &params.k8s_namespace {
        validate_rfc1123_label(namespace)?;
    }

    let mut argv = vec![
        collector_path.display().to_string(),
        "debug".to_string(),
        "bundle".to_string(),
        "--output".to_string(),
        bundle_file_path.display().to_string(),
        "--verbose".to_string(),
    ];

    if let Some(scram) = &params.authn {
        argv.push(format!("-Xuser={}", scram.username));
        argv.push(format!("{PASSWORD_FLAG}{}", scram.password));
        argv.push(format!("-Xsasl.mechanism={}", scram.mechanism));
    }
    if let Some(n) = params.controller_logs_size_limit_bytes {
        argv.push("--controller-logs-size-limit".to_string());
        argv.push(format!("{n}B"));
    }
    if let Some(n) = params.cpu_profiler_wait_seconds {
        argv.push("--cpu-profiler-wait".to_string());
        argv.push(format!("{n}s"));
    }
    if let Some(v) = &params.logs_since {
        argv.push("--logs-since".to_string());
        argv.push(v.clone());
    }
    if let Some(n) = params.logs_size_limit_bytes {
        argv.push("--logs-size-limit".to_string());
        argv.push(format!("{n}B"));
    }
    if let Some(v) = &params.logs_until {
        argv.push("--logs-until".to_string());
        argv.push(v.clone());
    }
    if let Some(n) = params.metrics_interval_seconds {
        argv.push("--metrics-interval".to_string());
        argv.push(format!("{n}s"));
    }
    if !params.partition.is_empty() {
        argv.push("--partition".to_string());
        argv.push(params.partition.join(" "));
    }
    if let Some(b) = params.tls_enabled {
        argv.push(format!("-Xtls.enabled={b}"));
    }
    if let Some(b) = params.tls_insecure_skip_verify {
        argv.push(format!("-Xtls.insecure_skip_verify={b}"));
    }
    if let Some(namespace) = &params.k8s_namespace {
        argv.push("--namespace".to_string());
        argv.push(namespace.clone());
    }

    Ok(argv)
}

/// Join an argv for a debug log line, redacting any token carrying a
/// SASL password so secrets never reach the log.
pub fn redacted_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|tok| {
            if tok.contains(PASSWORD_FLAG) {
                format!("{PASSWORD_FLAG}<redacted>")
            } else {
                tok.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate_rfc1123_label(namespace: &str) -> Result<(), ArgvError> {
    let invalid = || ArgvError::InvalidNamespace {
        namespace: namespace.to_string(),
    };

    if namespace.is_empty() || namespace.len() > 63 {
        return Err(invalid());
    }
    let bytes = namespace.as_bytes();
    let is_alphanumeric = |b: u8| b.is_ascii_alphanumeric();
    if !is_alphanumeric(bytes[0]) || !is_alphanumeric(*bytes.last().unwrap()) {
        return Err(invalid());
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(invalid());
    }
    Ok(())
}
