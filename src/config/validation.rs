//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, failover within the global budget)
//! - Check that every datacenter has a usable address source
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - An unknown local datacenter is not an error; the selector reports and ignores it

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ClientConfig, SourceConfig};
use crate::net::Address;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.datacenters.is_empty() {
        errors.push(ValidationError::new("datacenters", "at least one datacenter is required"));
    }

    let mut names = HashSet::new();
    for (i, dc) in config.datacenters.iter().enumerate() {
        let field = format!("datacenters[{}]", i);
        if dc.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !names.insert(dc.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate datacenter '{}'", dc.name),
            ));
        }

        match &dc.source {
            SourceConfig::Http { balancer, .. } => {
                if balancer.trim().is_empty() {
                    errors.push(ValidationError::new(format!("{}.source.balancer", field), "must not be empty"));
                }
            }
            SourceConfig::Rpc { .. } => {
                if dc.initial_proxies.is_empty() {
                    errors.push(ValidationError::new(
                        format!("{}.initial_proxies", field),
                        "rpc source needs at least one initial proxy to ask",
                    ));
                }
            }
            SourceConfig::Static { proxies } => {
                if proxies.is_empty() {
                    errors.push(ValidationError::new(
                        format!("{}.source.proxies", field),
                        "static source needs at least one proxy",
                    ));
                }
                check_addresses(&mut errors, &format!("{}.source.proxies", field), proxies);
            }
        }
        check_addresses(&mut errors, &format!("{}.initial_proxies", field), &dc.initial_proxies);
    }

    if config.pool.max_size == 0 {
        errors.push(ValidationError::new("pool.max_size", "must be greater than zero"));
    }
    if config.balancing.fan_out == 0 {
        errors.push(ValidationError::new("balancing.fan_out", "must be greater than zero"));
    }

    if config.discovery.refresh_period_ms == 0 {
        errors.push(ValidationError::new("discovery.refresh_period_ms", "must be greater than zero"));
    }
    if config.discovery.fetch_timeout_ms == 0 {
        errors.push(ValidationError::new("discovery.fetch_timeout_ms", "must be greater than zero"));
    }

    let timeouts = &config.timeouts;
    if timeouts.global_ms == 0 {
        errors.push(ValidationError::new("timeouts.global_ms", "must be greater than zero"));
    }
    if timeouts.failover_ms == 0 {
        errors.push(ValidationError::new("timeouts.failover_ms", "must be greater than zero"));
    }
    if timeouts.failover_ms > timeouts.global_ms {
        errors.push(ValidationError::new(
            "timeouts.failover_ms",
            format!(
                "failover timeout ({} ms) exceeds global timeout ({} ms)",
                timeouts.failover_ms, timeouts.global_ms
            ),
        ));
    }

    let health = &config.health;
    if health.latency_window == 0 {
        errors.push(ValidationError::new("health.latency_window", "must be greater than zero"));
    }
    if !(health.quantile > 0.0 && health.quantile <= 1.0) {
        errors.push(ValidationError::new("health.quantile", "must be in (0, 1]"));
    }
    if health.ping_enabled && (health.ping_interval_ms == 0 || health.ping_timeout_ms == 0) {
        errors.push(ValidationError::new(
            "health",
            "ping interval and timeout must be greater than zero when pings are enabled",
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addresses(errors: &mut Vec<ValidationError>, field: &str, raw: &[String]) {
    for entry in raw {
        if let Err(e) = entry.parse::<Address>() {
            errors.push(ValidationError::new(field, e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DatacenterConfig;

    fn dc(name: &str, proxies: &[&str]) -> DatacenterConfig {
        DatacenterConfig {
            name: name.into(),
            source: SourceConfig::Static {
                proxies: proxies.iter().map(|p| p.to_string()).collect(),
            },
            initial_proxies: Vec::new(),
        }
    }

    #[test]
    fn valid_config_passes() {
        let config = ClientConfig {
            datacenters: vec![dc("a", &["p1:9013"]), dc("b", &["p2:9013"])],
            ..ClientConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ClientConfig {
            datacenters: vec![dc("a", &["p1:9013"]), dc("a", &["not-an-address"])],
            ..ClientConfig::default()
        };
        config.timeouts.global_ms = 100;
        config.timeouts.failover_ms = 200;
        config.health.quantile = 0.0;
        config.balancing.fan_out = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"datacenters[1].name"));
        assert!(fields.contains(&"datacenters[1].source.proxies"));
        assert!(fields.contains(&"timeouts.failover_ms"));
        assert!(fields.contains(&"health.quantile"));
        assert!(fields.contains(&"balancing.fan_out"));
    }

    #[test]
    fn empty_datacenter_list_is_rejected() {
        let errors = validate_config(&ClientConfig::default()).unwrap_err();
        assert_eq!(errors[0].field, "datacenters");
    }

    #[test]
    fn unknown_local_datacenter_is_accepted() {
        let config = ClientConfig {
            local_datacenter: Some("nowhere".into()),
            datacenters: vec![dc("a", &["p1:9013"])],
            ..ClientConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rpc_source_needs_initial_proxies() {
        let mut rpc = DatacenterConfig {
            name: "a".into(),
            source: SourceConfig::Rpc { role: None },
            initial_proxies: Vec::new(),
        };
        let config = ClientConfig {
            datacenters: vec![rpc.clone()],
            ..ClientConfig::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "datacenters[0].initial_proxies");

        rpc.initial_proxies = vec!["seed:9013".into()];
        let config = ClientConfig {
            datacenters: vec![rpc],
            ..ClientConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }
}
