//! Configuration validation.
//!
//! Collects every problem instead of stopping at the first one.

use crate::AppConfig;
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// Rejected by the job engine.
    Jobs { message: String },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Socket address is invalid.
    InvalidAddress { name: String, value: String },
    /// Sampling ratio must be between 0.0 and 1.0.
    InvalidSamplingRatio { value: f64 },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String, value: u64 },
    /// Log level is invalid.
    InvalidLogLevel { value: String },
    /// Log format is invalid.
    InvalidLogFormat { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jobs { message } => write!(f, "Invalid job engine configuration: {message}"),
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {url_type} URL: {message}")
            }
            Self::InvalidAddress { name, value } => {
                write!(f, "Invalid {name} address: '{value}' (expected host:port)")
            }
            Self::InvalidSamplingRatio { value } => {
                write!(f, "Invalid sampling ratio: {value} (must be between 0.0 and 1.0)")
            }
            Self::NonPositiveTimeout { name, value } => {
                write!(f, "Timeout '{name}' must be positive, got {value}")
            }
            Self::InvalidLogLevel { value } => {
                write!(
                    f,
                    "Invalid log level: '{value}' (valid: trace, debug, info, warn, error)"
                )
            }
            Self::InvalidLogFormat { value } => {
                write!(f, "Invalid log format: '{value}' (valid: pretty, json)")
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

#[derive(Debug, Default)]
struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];
    const VALID_LOG_FORMATS: &'static [&'static str] = &["pretty", "json"];

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::default();

        Self::validate_jobs(config, &mut result);
        Self::validate_webhooks(config, &mut result);
        Self::validate_observability(config, &mut result);

        result.into_result()
    }

    fn validate_jobs(config: &AppConfig, result: &mut ValidationResult) {
        if let Err(e) = config.jobs.validate() {
            result.add_error(ConfigValidationError::Jobs {
                message: e.to_string(),
            });
        }
    }

    fn validate_webhooks(config: &AppConfig, result: &mut ValidationResult) {
        if config.webhooks.request_timeout_secs == 0 {
            result.add_error(ConfigValidationError::NonPositiveTimeout {
                name: "webhooks.request_timeout_secs".to_string(),
                value: 0,
            });
        }

        for endpoint in &config.webhooks.endpoints {
            match Url::parse(&endpoint.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => result.add_error(ConfigValidationError::InvalidUrl {
                    url_type: "webhook endpoint".to_string(),
                    message: format!("Expected an http(s) URL: {}", endpoint.url),
                }),
            }
        }
    }

    fn validate_observability(config: &AppConfig, result: &mut ValidationResult) {
        let observability = &config.observability;

        let level = observability.log_level.to_lowercase();
        if !Self::VALID_LOG_LEVELS.contains(&level.as_str()) {
            result.add_error(ConfigValidationError::InvalidLogLevel {
                value: observability.log_level.clone(),
            });
        }

        let format = observability.log_format.to_lowercase();
        if !Self::VALID_LOG_FORMATS.contains(&format.as_str()) {
            result.add_error(ConfigValidationError::InvalidLogFormat {
                value: observability.log_format.clone(),
            });
        }

        if !(0.0..=1.0).contains(&observability.sampling_ratio) {
            result.add_error(ConfigValidationError::InvalidSamplingRatio {
                value: observability.sampling_ratio,
            });
        }

        if let Some(endpoint) = &observability.otlp_endpoint {
            if Url::parse(endpoint).is_err() {
                result.add_error(ConfigValidationError::InvalidUrl {
                    url_type: "otlp_endpoint".to_string(),
                    message: format!("Invalid URL format: {endpoint}"),
                });
            }
        }

        if observability.metrics_enabled
            && observability.metrics_addr.parse::<std::net::SocketAddr>().is_err()
        {
            result.add_error(ConfigValidationError::InvalidAddress {
                name: "metrics".to_string(),
                value: observability.metrics_addr.clone(),
            });
        }
    }
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}
