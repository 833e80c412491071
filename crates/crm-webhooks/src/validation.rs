//! Validation of subscription configuration.
//!
//! Everything here runs at create/update time so a subscription that reaches
//! the delivery engine is already well-formed.

use std::net::IpAddr;

use crate::error::WebhookError;
use crate::models::{WebhookEventType, MAX_RETRY_COUNT, MAX_TIMEOUT_SECONDS};

/// Validate a webhook target URL.
///
/// Requires an absolute `http` or `https` URL with a host. Unless
/// `allow_private_hosts` is set, loopback, private and internal hosts are
/// rejected.
pub fn validate_webhook_url(url: &str, allow_private_hosts: bool) -> Result<(), WebhookError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(WebhookError::InvalidUrl(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| WebhookError::InvalidUrl("URL must have a host".to_string()))?;

    if !allow_private_hosts {
        validate_host_not_internal(host)?;
    }

    Ok(())
}

/// Reject loopback, private, link-local, CGNAT and internal-only hostnames.
pub fn validate_host_not_internal(host: &str) -> Result<(), WebhookError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(WebhookError::SsrfDetected(format!(
                "Destination host {host} is a private/internal address"
            )));
        }
    }

    let lower = host.to_ascii_lowercase();
    if lower == "localhost" || lower.ends_with(".internal") || lower.ends_with(".local") {
        return Err(WebhookError::SsrfDetected(format!(
            "Destination host {host} is a restricted internal hostname"
        )));
    }

    Ok(())
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Parse a non-empty list of event names into event kinds.
///
/// Unknown names are rejected; duplicates are collapsed keeping first
/// occurrence order.
pub fn validate_event_types(event_types: &[String]) -> Result<Vec<WebhookEventType>, WebhookError> {
    if event_types.is_empty() {
        return Err(WebhookError::Validation(
            "At least one event type is required".to_string(),
        ));
    }

    let mut parsed = Vec::with_capacity(event_types.len());
    for name in event_types {
        let event = WebhookEventType::parse(name)
            .ok_or_else(|| WebhookError::Validation(format!("Unknown event type: {name}")))?;
        if !parsed.contains(&event) {
            parsed.push(event);
        }
    }
    Ok(parsed)
}

pub fn validate_retry_count(retry_count: i32) -> Result<(), WebhookError> {
    if !(1..=MAX_RETRY_COUNT).contains(&retry_count) {
        return Err(WebhookError::Validation(format!(
            "retry_count must be between 1 and {MAX_RETRY_COUNT}"
        )));
    }
    Ok(())
}

pub fn validate_timeout_seconds(timeout_seconds: i32) -> Result<(), WebhookError> {
    if !(1..=MAX_TIMEOUT_SECONDS).contains(&timeout_seconds) {
        return Err(WebhookError::Validation(format!(
            "timeout_seconds must be between 1 and {MAX_TIMEOUT_SECONDS}"
        )));
    }
    Ok(())
}
