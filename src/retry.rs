//! Failure classification and retry policy
//!
//! Engine failures are classified exactly once, at the worker boundary, into a
//! [`FailureKind`]. The [`RetryPolicy`] then maps `(kind, attempt)` to a
//! [`RetryDecision`]. Both steps are pure so they can be tested without an
//! engine or a queue.
//!
//! Backoff is not slept inline: a job that should be retried is handed to the
//! scheduler with `scheduled_at = now + delay`, the same mechanism that
//! promotes user-scheduled jobs.
//!
//! # Example
//!
//! ```
//! use media_dl::config::RetryConfig;
//! use media_dl::engine::EngineFailure;
//! use media_dl::retry::{RetryPolicy, classify};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(&RetryConfig::default());
//! let failure = classify(&EngineFailure::with_status("HTTP Error 429: Too Many Requests", 429));
//!
//! let decision = policy.decide(&failure.kind, 1);
//! assert!(decision.should_retry);
//! assert_eq!(decision.delay, Duration::from_secs(4));
//! ```

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::engine::EngineFailure;

/// Trait for failures that can be classified as retryable or not
///
/// Transient failures (network timeouts, rate limiting, server errors) should
/// return `true`. Everything else, including unrecognised failures, returns
/// `false`.
pub trait IsRetryable {
    /// Returns true if the failure is transient and the job should be retried
    fn is_retryable(&self) -> bool;
}

/// Why access to the content was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionReason {
    /// Private content
    Private,
    /// Requires age verification
    AgeRestricted,
    /// Channel members only
    MembersOnly,
    /// Paid subscription only
    PremiumOnly,
    /// Not available in the user's region
    GeoBlocked,
    /// Blocked for copyright or licensing reasons
    Copyright,
    /// Requires signing in
    LoginRequired,
}

impl PermissionReason {
    fn as_str(&self) -> &'static str {
        match self {
            PermissionReason::Private => "private",
            PermissionReason::AgeRestricted => "age_restricted",
            PermissionReason::MembersOnly => "members_only",
            PermissionReason::PremiumOnly => "premium_only",
            PermissionReason::GeoBlocked => "geo_blocked",
            PermissionReason::Copyright => "copyright",
            PermissionReason::LoginRequired => "login_required",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "private" => PermissionReason::Private,
            "age_restricted" => PermissionReason::AgeRestricted,
            "members_only" => PermissionReason::MembersOnly,
            "premium_only" => PermissionReason::PremiumOnly,
            "geo_blocked" => PermissionReason::GeoBlocked,
            "copyright" => PermissionReason::Copyright,
            "login_required" => PermissionReason::LoginRequired,
            _ => return None,
        })
    }
}

/// Classification of a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network failure, timeout, rate limiting or server-side error
    Transient,
    /// Content exists but access is refused
    Permission(PermissionReason),
    /// Content removed or never existed
    NotFound,
    /// A missing tool or a held external lock; affects the whole group
    Environment,
    /// Unrecognised failure; never retried
    Unknown,
    /// The attempt was still running when the shutdown grace period expired
    ForcedShutdown,
}

impl FailureKind {
    /// Stable code used for persistence (`permission.private`, `transient`, ...)
    pub fn code(&self) -> String {
        match self {
            FailureKind::Transient => "transient".to_string(),
            FailureKind::Permission(reason) => format!("permission.{}", reason.as_str()),
            FailureKind::NotFound => "not_found".to_string(),
            FailureKind::Environment => "environment".to_string(),
            FailureKind::Unknown => "unknown".to_string(),
            FailureKind::ForcedShutdown => "forced_shutdown".to_string(),
        }
    }

    /// Parse a persisted code
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "transient" => FailureKind::Transient,
            "not_found" => FailureKind::NotFound,
            "environment" => FailureKind::Environment,
            "unknown" => FailureKind::Unknown,
            "forced_shutdown" => FailureKind::ForcedShutdown,
            other => {
                let reason = other.strip_prefix("permission.")?;
                FailureKind::Permission(PermissionReason::parse(reason)?)
            }
        })
    }

    /// Whether this failure should stop the rest of the job's group
    pub fn halts_group(&self) -> bool {
        matches!(self, FailureKind::Environment)
    }
}

impl IsRetryable for FailureKind {
    fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

/// A failure after classification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Classification
    pub kind: FailureKind,
    /// Short human-readable reason, safe to show to users
    pub reason: String,
    /// Raw engine text, for logs and diagnosis
    pub raw: String,
}

impl ClassifiedError {
    /// Build a classified error directly
    pub fn new(kind: FailureKind, reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Error recorded for attempts abandoned at the end of the shutdown grace period
    pub fn forced_shutdown() -> Self {
        Self::new(
            FailureKind::ForcedShutdown,
            "Stopped by shutdown before the download finished.",
            "forced shutdown",
        )
    }
}

impl IsRetryable for ClassifiedError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

struct Rule {
    pattern: Regex,
    kind: FailureKind,
    reason: &'static str,
}

fn rule(pattern: &str, kind: FailureKind, reason: &'static str) -> Option<Rule> {
    match Regex::new(&format!("(?i){pattern}")) {
        Ok(pattern) => Some(Rule {
            pattern,
            kind,
            reason,
        }),
        Err(e) => {
            tracing::error!(pattern, error = %e, "Invalid classification pattern");
            None
        }
    }
}

const REASON_TRANSCODER: &str = "Required transcoder (FFmpeg) is not installed.";
const REASON_COOKIE_LOCK: &str =
    "Browser cookie store is locked. Close the browser or use a cookies file.";
const REASON_PRIVATE: &str = "This video is private.";
const REASON_AGE: &str = "Age-restricted video. Sign in to access it.";
const REASON_MEMBERS: &str = "This video is for channel members only.";
const REASON_PREMIUM: &str = "This content requires a premium subscription.";
const REASON_GEO: &str = "This video is not available in your country.";
const REASON_COPYRIGHT: &str = "This video cannot be downloaded due to copyright restrictions.";
const REASON_LOGIN: &str = "Sign in is required to access this content.";
const REASON_RATE_LIMITED: &str = "Too many requests. The download will be retried.";
const REASON_SERVER: &str = "The provider reported a server error.";
const REASON_NETWORK: &str = "Network error. Check your internet connection.";
const REASON_LIVE_NOT_STARTED: &str = "This live stream has not started yet.";
const REASON_UNAVAILABLE: &str = "This video is unavailable or has been removed.";
const REASON_NO_FORMATS: &str = "No downloadable formats found for this video.";
const REASON_UNKNOWN: &str = "An unexpected error occurred. Check the logs for details.";

/// Rules that identify specific conditions regardless of any status code
static SPECIFIC_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use FailureKind::*;
    use PermissionReason::*;
    [
        rule(
            r"(ffmpeg|ffprobe|avconv)\S*\s.*(not found|not installed|missing|is required)|(not found|missing|install)\s.*(ffmpeg|ffprobe)",
            Environment,
            REASON_TRANSCODER,
        ),
        rule(
            r"could not copy .*cookie database|cookie database is locked|close (your|the) browser",
            Environment,
            REASON_COOKIE_LOCK,
        ),
        rule(r"private video|video is private", Permission(Private), REASON_PRIVATE),
        rule(
            r"confirm your age|age[- ]restricted|inappropriate for some users",
            Permission(AgeRestricted),
            REASON_AGE,
        ),
        rule(
            r"members[- ]only|join this channel|available to this channel's members",
            Permission(MembersOnly),
            REASON_MEMBERS,
        ),
        rule(
            r"premium members|requires (a )?premium|premium[- ]only",
            Permission(PremiumOnly),
            REASON_PREMIUM,
        ),
        rule(
            r"available in your (country|region)|geo[- ]?(restrict|block)|blocked in your (country|region)",
            Permission(GeoBlocked),
            REASON_GEO,
        ),
        rule(r"copyright|licensing restrictions", Permission(Copyright), REASON_COPYRIGHT),
        rule(
            r"sign in to confirm|login required|requires authentication|use --cookies",
            Permission(LoginRequired),
            REASON_LOGIN,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
});

/// Rules consulted only when no status code decided the classification
static GENERAL_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use FailureKind::*;
    [
        rule(
            r"\b429\b|too many requests|rate[- ]?limit",
            Transient,
            REASON_RATE_LIMITED,
        ),
        rule(
            r"http error 5\d\d|internal server error|bad gateway|service unavailable|gateway time-?out",
            Transient,
            REASON_SERVER,
        ),
        rule(
            r"timed? ?out|connection (reset|refused|aborted)|network is unreachable|name resolution|getaddrinfo|broken pipe|incomplete read|unable to download (video data|webpage)",
            Transient,
            REASON_NETWORK,
        ),
        rule(
            r"live event will begin|premieres in|has not started|is not live yet",
            Transient,
            REASON_LIVE_NOT_STARTED,
        ),
        rule(
            r"no video formats|requested format is not available",
            NotFound,
            REASON_NO_FORMATS,
        ),
        rule(
            r"http error 404|\b404\b|\b410\b|not found|video unavailable|has been removed|does not exist|no longer available|account .*terminated",
            NotFound,
            REASON_UNAVAILABLE,
        ),
        rule(r"\b403\b|forbidden", Permission(PermissionReason::LoginRequired), REASON_LOGIN),
    ]
    .into_iter()
    .flatten()
    .collect()
});

fn classify_status(status: u16) -> Option<(FailureKind, &'static str)> {
    match status {
        429 => Some((FailureKind::Transient, REASON_RATE_LIMITED)),
        408 => Some((FailureKind::Transient, REASON_NETWORK)),
        500..=599 => Some((FailureKind::Transient, REASON_SERVER)),
        404 | 410 => Some((FailureKind::NotFound, REASON_UNAVAILABLE)),
        451 => Some((
            FailureKind::Permission(PermissionReason::Copyright),
            REASON_COPYRIGHT,
        )),
        401 | 403 => Some((
            FailureKind::Permission(PermissionReason::LoginRequired),
            REASON_LOGIN,
        )),
        _ => None,
    }
}

/// Classify a raw engine failure
///
/// Specific message patterns (missing tools, access restrictions) win first,
/// then the HTTP-equivalent status code, then general message patterns.
/// Anything unrecognised is [`FailureKind::Unknown`].
pub fn classify(failure: &EngineFailure) -> ClassifiedError {
    let raw = failure.message.as_str();

    let matched = SPECIFIC_RULES
        .iter()
        .find(|r| r.pattern.is_match(raw))
        .map(|r| (r.kind, r.reason))
        .or_else(|| failure.status.and_then(classify_status))
        .or_else(|| {
            GENERAL_RULES
                .iter()
                .find(|r| r.pattern.is_match(raw))
                .map(|r| (r.kind, r.reason))
        });

    match matched {
        Some((kind, reason)) => ClassifiedError::new(kind, reason, failure.to_string()),
        None => ClassifiedError::new(FailureKind::Unknown, REASON_UNKNOWN, failure.to_string()),
    }
}

/// Outcome of consulting the retry policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether the job should be attempted again
    pub should_retry: bool,
    /// How long to wait before the job is queued again
    pub delay: Duration,
}

/// Exponential backoff policy
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// Build a policy from configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: config.jitter,
        }
    }

    /// Decide whether a job that has made `attempt` attempts should be retried
    ///
    /// `should_retry = attempt < max_retries && kind is retryable`, and
    /// `delay = base_delay * 2^attempt`, capped at `max_delay`.
    pub fn decide(&self, kind: &FailureKind, attempt: u32) -> RetryDecision {
        RetryDecision {
            should_retry: kind.is_retryable() && attempt < self.max_retries,
            delay: self.backoff_delay(attempt),
        }
    }

    /// `base_delay * 2^attempt`, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Apply jitter to a decided delay when enabled, never exceeding `max_delay`
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter {
            add_jitter(delay).min(self.max_delay)
        } else {
            delay
        }
    }

    /// Maximum number of attempts per job
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
