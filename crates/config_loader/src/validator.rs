//! Profile validation
//!
//! Rules:
//! - email settings pass their field constraints (addresses, ports, rates)
//! - backend base_url is an http(s) URL and the request timeout is non-zero
//! - poll intervals are non-zero
//! - query concurrency is non-zero

use contracts::{ContractError, DispatchProfile, EmailConfig};
use validator::Validate;

/// Validate a DispatchProfile
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(profile: &DispatchProfile) -> Result<(), ContractError> {
    validate_email(&profile.email)?;
    validate_backend(profile)?;
    validate_dispatch(profile)?;
    Ok(())
}

/// Field constraints declared on EmailConfig.
///
/// Fields are reported in name order so the same profile always yields the
/// same error.
pub fn validate_email(email: &EmailConfig) -> Result<(), ContractError> {
    let Err(errors) = email.validate() else {
        return Ok(());
    };

    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let Some((field, field_errors)) = fields.first() else {
        return Err(ContractError::config_validation("email", errors.to_string()));
    };
    let message = field_errors
        .first()
        .map(|err| {
            err.message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| err.code.to_string())
        })
        .unwrap_or_else(|| "invalid value".to_string());

    Err(ContractError::config_validation(
        format!("email.{field}"),
        message,
    ))
}

fn validate_backend(profile: &DispatchProfile) -> Result<(), ContractError> {
    let backend = &profile.backend;

    if !(backend.base_url.starts_with("http://") || backend.base_url.starts_with("https://")) {
        return Err(ContractError::config_validation(
            "backend.base_url",
            format!("expected an http(s) URL, got '{}'", backend.base_url),
        ));
    }

    if backend.request_timeout_ms == 0 {
        return Err(ContractError::config_validation(
            "backend.request_timeout_ms",
            "request_timeout_ms must be > 0",
        ));
    }

    Ok(())
}

fn validate_dispatch(profile: &DispatchProfile) -> Result<(), ContractError> {
    let dispatch = &profile.dispatch;

    if dispatch.bulk_poll_interval_ms == 0 {
        return Err(ContractError::config_validation(
            "dispatch.bulk_poll_interval_ms",
            "bulk_poll_interval_ms must be > 0",
        ));
    }

    if dispatch.job_poll_interval_ms == 0 {
        return Err(ContractError::config_validation(
            "dispatch.job_poll_interval_ms",
            "job_poll_interval_ms must be > 0",
        ));
    }

    if dispatch.query_concurrency == 0 {
        return Err(ContractError::config_validation(
            "dispatch.query_concurrency",
            "query_concurrency must be > 0",
        ));
    }

    Ok(())
}
