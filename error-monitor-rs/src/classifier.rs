//! # Failure Classification
//!
//! Pure keyword-based mapping from a raw failure (message + originating
//! endpoint + free-form context) to a category, severity, user impact and
//! suggested action. Total: unmatched input classifies as `unknown`.
//!
//! The keyword taxonomy is configuration data; the rule table below is
//! evaluated in a fixed priority order so specific categories win over
//! generic ones.

use crate::types::{Classification, ErrorCategory, Severity};

struct Rule {
    category: ErrorCategory,
    default_severity: Severity,
    keywords: &'static [&'static str],
}

// Priority order: an auth-flavored message at an API endpoint must
// classify as auth-failure, not generic-api-error.
const RULES: &[Rule] = &[
    Rule {
        category: ErrorCategory::AuthFailure,
        default_severity: Severity::Critical,
        keywords: &[
            "unauthorized",
            "forbidden",
            "authentication failed",
            "invalid token",
            "token expired",
            "access denied",
            "permission denied",
            "invalid credentials",
            "invalid api key",
            "401",
            "403",
        ],
    },
    Rule {
        category: ErrorCategory::RateLimit,
        default_severity: Severity::Warning,
        keywords: &[
            "rate limit",
            "too many requests",
            "quota exceeded",
            "throttled",
            "429",
        ],
    },
    Rule {
        category: ErrorCategory::ConnectionFailure,
        default_severity: Severity::Critical,
        keywords: &[
            "econnrefused",
            "econnreset",
            "connection refused",
            "connection reset",
            "connection closed",
            "socket hang up",
            "enotfound",
            "etimedout",
            "network unreachable",
            "dns",
            "timed out",
            "unreachable host",
        ],
    },
    Rule {
        category: ErrorCategory::ResourceExhaustion,
        default_severity: Severity::Critical,
        keywords: &[
            "out of memory",
            "oom",
            "heap limit",
            "enospc",
            "no space left",
            "disk full",
            "too many open files",
            "emfile",
            "resource exhausted",
        ],
    },
    Rule {
        category: ErrorCategory::DeploymentFailure,
        default_severity: Severity::Critical,
        keywords: &[
            "deployment failed",
            "deploy failed",
            "rollout failed",
            "migration failed",
            "startup failed",
            "failed to start",
            "version mismatch",
        ],
    },
    Rule {
        category: ErrorCategory::GenericApiError,
        default_severity: Severity::Warning,
        keywords: &[
            "internal server error",
            "bad gateway",
            "service unavailable",
            "gateway timeout",
            "api error",
            "upstream error",
            "500",
            "502",
            "503",
            "504",
        ],
    },
];

// Endpoint fragments that mark an administrative or authentication
// surface; failures there escalate.
const SENSITIVE_ENDPOINT_MARKERS: &[&str] = &["/admin", "/auth", "login", "account"];

/// Classifies a raw failure. Pure and total: always returns a value, and
/// identical inputs always classify identically.
pub fn classify(
    message: &str,
    endpoint: Option<&str>,
    context: Option<&serde_json::Map<String, serde_json::Value>>,
) -> Classification {
    let message_lower = message.to_lowercase();
    let endpoint_lower = endpoint.map(|e| e.to_lowercase());

    let matched = RULES.iter().find(|rule| {
        rule.keywords.iter().any(|keyword| {
            message_lower.contains(keyword)
                || endpoint_lower
                    .as_deref()
                    .map_or(false, |e| e.contains(keyword))
        })
    });

    let (category, default_severity) = match matched {
        Some(rule) => (rule.category, rule.default_severity),
        // An unmatched failure that names an endpoint is still an API
        // failure of some kind; without one we know nothing.
        None if endpoint.is_some() => (ErrorCategory::GenericApiError, Severity::Warning),
        None => (ErrorCategory::Unknown, Severity::Warning),
    };

    let severity = escalate(category, default_severity, endpoint_lower.as_deref(), context);
    let (user_impact, suggested_action) = impact_for(category, severity);

    Classification {
        category,
        severity,
        user_impact: user_impact.to_string(),
        suggested_action: suggested_action.to_string(),
    }
}

// Severity escalation: generic API failures on an administrative or
// authentication surface are critical, and the application can force
// escalation with a boolean `fatal`/`critical` context flag.
fn escalate(
    category: ErrorCategory,
    severity: Severity,
    endpoint: Option<&str>,
    context: Option<&serde_json::Map<String, serde_json::Value>>,
) -> Severity {
    if severity == Severity::Critical {
        return severity;
    }

    if category == ErrorCategory::GenericApiError {
        if let Some(endpoint) = endpoint {
            if SENSITIVE_ENDPOINT_MARKERS
                .iter()
                .any(|marker| endpoint.contains(marker))
            {
                return Severity::Critical;
            }
        }
    }

    let flagged = context.map_or(false, |c| {
        ["fatal", "critical"]
            .iter()
            .any(|flag| c.get(*flag).and_then(|v| v.as_bool()).unwrap_or(false))
    });
    if flagged {
        return Severity::Critical;
    }

    severity
}

/// User impact and suggested action, looked up by `(category, severity)`
fn impact_for(category: ErrorCategory, severity: Severity) -> (&'static str, &'static str) {
    match (category, severity) {
        (ErrorCategory::ConnectionFailure, _) => (
            "Catalog data may be stale or unavailable while the upstream connection is down.",
            "Check network connectivity and upstream service health, then retry the operation.",
        ),
        (ErrorCategory::RateLimit, _) => (
            "Some catalog requests are being rejected until the rate window resets.",
            "Reduce request volume or raise the provider quota before retrying.",
        ),
        (ErrorCategory::AuthFailure, _) => (
            "Catalog integrations cannot authenticate; dependent features are unavailable.",
            "Rotate or renew the affected credentials and verify token expiry settings.",
        ),
        (ErrorCategory::ResourceExhaustion, _) => (
            "The service is degraded and may drop requests under current load.",
            "Free resources or scale the instance, and inspect for leaks.",
        ),
        (ErrorCategory::DeploymentFailure, _) => (
            "The latest rollout is unhealthy; users may see inconsistent behavior.",
            "Roll back to the previous release and inspect the deploy logs.",
        ),
        (ErrorCategory::GenericApiError, Severity::Critical) => (
            "A sensitive endpoint is failing; dependent administrative features are unavailable.",
            "Inspect the failing endpoint's logs and recent changes immediately.",
        ),
        (ErrorCategory::GenericApiError, _) => (
            "An API endpoint is returning errors; affected requests fail.",
            "Inspect the endpoint's recent logs and upstream dependencies.",
        ),
        (ErrorCategory::Unknown, _) => (
            "Impact not classified; review the error details.",
            "Investigate the raw message and add a classification rule if it recurs.",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_wins_over_generic_api() {
        let classification = classify(
            "request failed: 401 unauthorized",
            Some("/api/catalog/items"),
            None,
        );
        assert_eq!(classification.category, ErrorCategory::AuthFailure);
        assert_eq!(classification.severity, Severity::Critical);
    }

    #[test]
    fn test_rate_limit_classifies_as_warning() {
        let classification = classify("upstream said: too many requests", None, None);
        assert_eq!(classification.category, ErrorCategory::RateLimit);
        assert_eq!(classification.severity, Severity::Warning);
    }

    #[test]
    fn test_unmatched_message_is_unknown_warning() {
        let classification = classify("something odd happened", None, None);
        assert_eq!(classification.category, ErrorCategory::Unknown);
        assert_eq!(classification.severity, Severity::Warning);
        assert!(!classification.user_impact.is_empty());
        assert!(!classification.suggested_action.is_empty());
    }

    #[test]
    fn test_unmatched_with_endpoint_is_generic_api() {
        let classification = classify("unexpected payload shape", Some("/api/search"), None);
        assert_eq!(classification.category, ErrorCategory::GenericApiError);
        assert_eq!(classification.severity, Severity::Warning);
    }

    #[test]
    fn test_admin_endpoint_escalates_generic_api() {
        let classification = classify("internal server error", Some("/admin/imports"), None);
        assert_eq!(classification.category, ErrorCategory::GenericApiError);
        assert_eq!(classification.severity, Severity::Critical);
    }

    #[test]
    fn test_context_flag_escalates() {
        let mut context = serde_json::Map::new();
        context.insert("fatal".to_string(), serde_json::Value::Bool(true));

        let classification = classify("something odd happened", None, Some(&context));
        assert_eq!(classification.category, ErrorCategory::Unknown);
        assert_eq!(classification.severity, Severity::Critical);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let a = classify("connection refused", Some("/api/x"), None);
        let b = classify("connection refused", Some("/api/x"), None);
        assert_eq!(a, b);
    }
}
