//! Audit trail for credential lifecycle operations.
//!
//! Every token the service mints, and every invite it exchanges, produces
//! one [`AuditEvent`]. Denied authentications are not audited here; they
//! are logged as warnings by the [`Authenticator`](crate::Authenticator).
//!
//! ```
//! use tollgate_authn::audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let event = AuditEvent::builder()
//!     .actor("00000000000000000000000001")
//!     .action(AuditAction::IssueInvite)
//!     .key_id("k1")
//!     .result(AuditResult::Success)
//!     .build();
//! TracingAuditLogger.log(&event).await;
//! # });
//! ```

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::token::Metadata;

/// Tracing target of audit events, for routing them to a dedicated sink.
pub const AUDIT_TARGET: &str = "audit";

/// Credential operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    /// A login token was minted.
    IssueLogin,
    /// An invite token was minted.
    IssueInvite,
    /// A bare entrypoint token was minted.
    IssueEntrypoint,
    /// An invite was exchanged for a login token.
    ExchangeInvite,
    /// The one-time bootstrap token was requested.
    Bootstrap,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IssueLogin => "issue_login",
            Self::IssueInvite => "issue_invite",
            Self::IssueEntrypoint => "issue_entrypoint",
            Self::ExchangeInvite => "exchange_invite",
            Self::Bootstrap => "bootstrap",
        })
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// The token was issued.
    Success,
    /// The operation failed; holds the internal error text.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

impl<T, E: fmt::Display> From<&Result<T, E>> for AuditResult {
    fn from(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => Self::Failure(err.to_string()),
        }
    }
}

/// One audited credential operation.
///
/// Events never carry token strings or key material.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the operation happened.
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// User reference the credential is for.
    #[builder(into)]
    pub actor: String,
    /// What was done.
    pub action: AuditAction,
    /// Signing key used.
    #[builder(into)]
    pub key_id: String,
    /// Whether it succeeded.
    pub result: AuditResult,
    /// Caller-supplied metadata of the credential.
    #[builder(default)]
    pub metadata: Metadata,
}

/// Sink for audit events.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an event. Delivery failures are the sink's concern and never
    /// fail the audited operation.
    async fn log(&self, event: &AuditEvent);
}

/// Emits audit events as `tracing` events at `INFO` on target
/// [`AUDIT_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");

        tracing::info!(
            target: AUDIT_TARGET,
            audit_timestamp = %event.timestamp.to_rfc3339(),
            audit_actor = %event.actor,
            audit_action = %event.action,
            audit_key_id = %event.key_id,
            audit_result = %event.result,
            audit_metadata = %metadata,
            "audit_event"
        );
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::error::AuthError;

    #[test]
    fn test_action_display() {
        assert_eq!(AuditAction::IssueLogin.to_string(), "issue_login");
        assert_eq!(AuditAction::IssueInvite.to_string(), "issue_invite");
        assert_eq!(AuditAction::IssueEntrypoint.to_string(), "issue_entrypoint");
        assert_eq!(AuditAction::ExchangeInvite.to_string(), "exchange_invite");
        assert_eq!(AuditAction::Bootstrap.to_string(), "bootstrap");
    }

    #[test]
    fn test_result_from_operation_outcome() {
        let ok: Result<String, AuthError> = Ok("token".into());
        assert_eq!(AuditResult::from(&ok), AuditResult::Success);

        let err: Result<String, AuthError> = Err(AuthError::Expired);
        assert_eq!(AuditResult::from(&err), AuditResult::Failure("Token expired".into()));
        assert_eq!(AuditResult::from(&err).to_string(), "failure: Token expired");
    }

    #[test]
    fn test_builder_defaults() {
        let event = AuditEvent::builder()
            .actor("u1")
            .action(AuditAction::Bootstrap)
            .key_id("k1")
            .result(AuditResult::Success)
            .build();

        assert!(event.metadata.is_empty());
        assert!((Utc::now() - event.timestamp).num_seconds() < 2);
    }

    /// Captures the target and field names of every event that reaches the
    /// subscriber.
    #[derive(Default)]
    struct TargetCollector {
        targets: Arc<Mutex<Vec<String>>>,
        fields: Arc<Mutex<Vec<String>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for TargetCollector {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.targets.lock().unwrap().push(event.metadata().target().to_owned());
            self.fields
                .lock()
                .unwrap()
                .extend(event.metadata().fields().iter().map(|f| f.name().to_owned()));
        }
    }

    #[tokio::test]
    async fn test_tracing_logger_uses_audit_target() {
        let collector = TargetCollector::default();
        let targets = Arc::clone(&collector.targets);
        let fields = Arc::clone(&collector.fields);
        let subscriber = tracing_subscriber::registry().with(collector);
        let _guard = tracing::subscriber::set_default(subscriber);

        let event = AuditEvent::builder()
            .actor("u1")
            .action(AuditAction::IssueLogin)
            .key_id("k1")
            .result(AuditResult::Success)
            .metadata(Metadata::from([("addr".to_owned(), "10.0.0.1".to_owned())]))
            .build();
        TracingAuditLogger.log(&event).await;
        NoopAuditLogger.log(&event).await;

        assert_eq!(*targets.lock().unwrap(), vec![AUDIT_TARGET.to_owned()]);

        let fields = fields.lock().unwrap();
        for name in [
            "audit_timestamp",
            "audit_actor",
            "audit_action",
            "audit_key_id",
            "audit_result",
            "audit_metadata",
        ] {
            assert!(fields.iter().any(|f| f == name), "missing field {name}: {fields:?}");
        }
    }
}
