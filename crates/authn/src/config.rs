//! Authentication configuration.
//!
//! [`AuthConfig`] carries the identifiers and method policy the issuer and
//! authenticator are constructed with. It deserializes from service
//! configuration files and can also be built in code:
//!
//! ```
//! use std::time::Duration;
//! use tollgate_authn::AuthConfig;
//!
//! let config = AuthConfig::builder()
//!     .default_key_id("k2")
//!     .max_invite_ttl(Duration::from_secs(7 * 24 * 3600))
//!     .build()?;
//!
//! assert_eq!(config.default_key_id(), "k2");
//! assert!(config.is_entrypoint_method("EntrypointConfig"));
//! # Ok::<(), tollgate_authn::AuthError>(())
//! ```
//!
//! ```
//! use tollgate_authn::AuthConfig;
//!
//! let config: AuthConfig = serde_json::from_str(
//!     r#"{ "default_key_id": "k1", "max_invite_ttl": "12h" }"#,
//! ).unwrap();
//! config.validate().unwrap();
//! ```

use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Key id used for issuance when none is configured.
pub const DEFAULT_KEY_ID: &str = "k1";

/// User reference embedded in login tokens when none is configured.
pub const DEFAULT_USER: &str = "00000000000000000000000001";

/// Methods an entrypoint-scoped token may call by default.
pub const DEFAULT_ENTRYPOINT_METHODS: &[&str] =
    &["EntrypointConfig", "EntrypointLogStream", "EntrypointExecStream"];

/// Configuration for token issuance and method authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Signing key used for new tokens.
    #[serde(default = "default_key_id")]
    pub(crate) default_key_id: String,

    /// User reference embedded in every login token.
    #[serde(default = "default_user")]
    pub(crate) default_user: String,

    /// Methods entrypoint-scoped tokens may invoke.
    #[serde(default = "default_entrypoint_methods")]
    pub(crate) entrypoint_methods: BTreeSet<String>,

    /// Methods reserved for entrypoint-scoped tokens. Full login tokens are
    /// denied these.
    #[serde(default)]
    pub(crate) entrypoint_only_methods: BTreeSet<String>,

    /// Upper bound on invite lifetimes. `None` accepts any positive TTL.
    #[serde(with = "humantime_serde", default)]
    pub(crate) max_invite_ttl: Option<Duration>,
}

fn default_key_id() -> String {
    DEFAULT_KEY_ID.to_owned()
}

fn default_user() -> String {
    DEFAULT_USER.to_owned()
}

fn default_entrypoint_methods() -> BTreeSet<String> {
    DEFAULT_ENTRYPOINT_METHODS.iter().map(|m| (*m).to_owned()).collect()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_key_id: default_key_id(),
            default_user: default_user(),
            entrypoint_methods: default_entrypoint_methods(),
            entrypoint_only_methods: BTreeSet::new(),
            max_invite_ttl: None,
        }
    }
}

#[bon::bon]
impl AuthConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// Omitted fields take the same defaults as deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if validation fails; see
    /// [`validate`](Self::validate).
    #[builder]
    pub fn new(
        #[builder(into, default = default_key_id())] default_key_id: String,
        #[builder(into, default = default_user())] default_user: String,
        #[builder(default = default_entrypoint_methods())] entrypoint_methods: BTreeSet<String>,
        #[builder(default)] entrypoint_only_methods: BTreeSet<String>,
        max_invite_ttl: Option<Duration>,
    ) -> Result<Self> {
        let config = Self {
            default_key_id,
            default_user,
            entrypoint_methods,
            entrypoint_only_methods,
            max_invite_ttl,
        };
        config.validate()?;
        Ok(config)
    }
}

impl AuthConfig {
    /// Validates a configuration, typically after deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if:
    /// - `default_key_id` or `default_user` is empty
    /// - an entrypoint-only method is missing from the entrypoint allowlist (it would be callable
    ///   by nobody)
    /// - `max_invite_ttl` is zero
    pub fn validate(&self) -> Result<()> {
        if self.default_key_id.trim().is_empty() {
            return Err(AuthError::invalid_config("default_key_id must not be empty"));
        }
        if self.default_user.trim().is_empty() {
            return Err(AuthError::invalid_config("default_user must not be empty"));
        }
        if let Some(method) =
            self.entrypoint_only_methods.iter().find(|m| !self.entrypoint_methods.contains(*m))
        {
            return Err(AuthError::invalid_config(format!(
                "entrypoint-only method '{method}' is not in the entrypoint allowlist"
            )));
        }
        if self.max_invite_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(AuthError::invalid_config("max_invite_ttl must be positive"));
        }
        Ok(())
    }

    /// Signing key used for new tokens.
    #[must_use]
    pub fn default_key_id(&self) -> &str {
        &self.default_key_id
    }

    /// User reference embedded in every login token.
    #[must_use]
    pub fn default_user(&self) -> &str {
        &self.default_user
    }

    /// Upper bound on invite lifetimes, if any.
    #[must_use]
    pub fn max_invite_ttl(&self) -> Option<Duration> {
        self.max_invite_ttl
    }

    /// Whether entrypoint-scoped tokens may call `method`.
    #[must_use]
    pub fn is_entrypoint_method(&self, method: &str) -> bool {
        self.entrypoint_methods.contains(method)
    }

    /// Whether `method` is reserved for entrypoint-scoped tokens.
    #[must_use]
    pub fn is_entrypoint_only_method(&self, method: &str) -> bool {
        self.entrypoint_only_methods.contains(method)
    }
}
