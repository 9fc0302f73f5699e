//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Parse and normalize endpoint addresses
//! - Validate value ranges (thresholds > 0, backoff base <= cap, jitter in [0, 1])
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DriverConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::DriverConfig;

/// Scheme assumed for endpoints written as bare `host:port`.
const DEFAULT_SCHEME: &str = "grpc";

/// One semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("endpoint {endpoint:?} is invalid: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("endpoint {0:?} is listed more than once")]
    DuplicateEndpoint(String),

    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} base delay exceeds its cap")]
    BackoffInverted { field: &'static str },

    #[error("retry.jitter must be within [0, 1]")]
    JitterOutOfRange,
}

/// Parse an endpoint into its canonical `host:port` form.
pub fn parse_endpoint(raw: &str) -> Result<String, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty address"));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{DEFAULT_SCHEME}://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    let port = url.port().ok_or_else(|| invalid("missing port"))?;
    if !matches!(url.path(), "" | "/") {
        return Err(invalid("unexpected path"));
    }

    Ok(format!("{host}:{port}"))
}

/// Parse every endpoint, returning canonical addresses in input order with
/// duplicates dropped.
pub fn parse_endpoints(raw: &[String]) -> Result<Vec<String>, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(raw.len());

    for endpoint in raw {
        match parse_endpoint(endpoint) {
            Ok(addr) if seen.insert(addr.clone()) => parsed.push(addr),
            Ok(addr) => errors.push(ValidationError::DuplicateEndpoint(addr)),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(errors)
    }
}

/// Validate a configuration.
///
/// An empty endpoint list is accepted only when discovery is enabled, since
/// the worker can fill the pool later.
pub fn validate_config(config: &DriverConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = match parse_endpoints(&config.endpoints) {
        Ok(_) => Vec::new(),
        Err(errors) => errors,
    };

    if config.endpoints.is_empty() && !config.discovery.enabled {
        errors.push(ValidationError::NoEndpoints);
    }

    let retry = &config.retry;
    for (field, value) in [
        ("retry.fast_base_ms", retry.fast_base_ms),
        ("retry.slow_base_ms", retry.slow_base_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }
    if retry.fast_base_ms > retry.fast_max_ms {
        errors.push(ValidationError::BackoffInverted {
            field: "retry.fast",
        });
    }
    if retry.slow_base_ms > retry.slow_max_ms {
        errors.push(ValidationError::BackoffInverted {
            field: "retry.slow",
        });
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        errors.push(ValidationError::JitterOutOfRange);
    }

    let pool = &config.pool;
    if pool.max_leases_per_endpoint == 0 {
        errors.push(ValidationError::Zero {
            field: "pool.max_leases_per_endpoint",
        });
    }
    if pool.healthy_threshold == 0 {
        errors.push(ValidationError::Zero {
            field: "pool.healthy_threshold",
        });
    }
    if pool.unhealthy_threshold == 0 {
        errors.push(ValidationError::Zero {
            field: "pool.unhealthy_threshold",
        });
    }

    if config.discovery.enabled {
        if config.discovery.interval_secs == 0 {
            errors.push(ValidationError::Zero {
                field: "discovery.interval_secs",
            });
        }
        if config.discovery.timeout_secs == 0 {
            errors.push(ValidationError::Zero {
                field: "discovery.timeout_secs",
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_forms() {
        assert_eq!(parse_endpoint("localhost:2135").unwrap(), "localhost:2135");
        assert_eq!(
            parse_endpoint("grpcs://db.example.com:2135").unwrap(),
            "db.example.com:2135"
        );
        assert_eq!(parse_endpoint(" 10.0.0.1:2136 ").unwrap(), "10.0.0.1:2136");
        assert!(parse_endpoint("localhost").is_err());
        assert!(parse_endpoint("").is_err());
        assert!(parse_endpoint("grpc://host:2135/path").is_err());
    }

    #[test]
    fn test_duplicates_are_reported() {
        let raw = vec!["a:1".to_string(), "grpc://a:1".to_string()];
        let errors = parse_endpoints(&raw).unwrap_err();
        assert_eq!(errors, vec![ValidationError::DuplicateEndpoint("a:1".into())]);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = DriverConfig::default();
        config.endpoints = vec!["nope".to_string()];
        config.retry.jitter = 2.0;
        config.pool.healthy_threshold = 0;
        config.retry.fast_base_ms = 1_000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_empty_endpoints_need_discovery() {
        let mut config = DriverConfig::default();
        assert!(validate_config(&config).is_ok());

        config.discovery.enabled = false;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::NoEndpoints]
        );
    }
}
