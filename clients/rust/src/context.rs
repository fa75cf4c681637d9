//! Subject context passed to targeting and assignment.
//!
//! The engine never reads cookies, query strings or stored values from the
//! runtime environment itself. A [`ContextProvider`] supplies a complete
//! [`UserContext`] and callers may override any part of it per call with a
//! [`PartialContext`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Everything known about the visiting subject at decision time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    /// Snapshot of client-side stored key/values, already JSON-decoded.
    #[serde(default)]
    pub stored: HashMap<String, JsonValue>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub custom: HashMap<String, JsonValue>,
}

impl UserContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            ..Default::default()
        }
    }

    /// The identity assignments are keyed by: user id when known, else session id.
    pub fn subject_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.session_id)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn with_stored(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.stored.insert(key.into(), value);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

/// Per-call overrides merged over the provider's context.
///
/// Each field that is `Some` replaces the corresponding field wholesale,
/// maps included.
#[derive(Debug, Clone, Default)]
pub struct PartialContext {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub cookies: Option<HashMap<String, String>>,
    pub stored: Option<HashMap<String, JsonValue>>,
    pub query_params: Option<HashMap<String, String>>,
    pub custom: Option<HashMap<String, JsonValue>>,
}

impl PartialContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn stored(mut self, stored: HashMap<String, JsonValue>) -> Self {
        self.stored = Some(stored);
        self
    }

    pub fn query_params(mut self, query_params: HashMap<String, String>) -> Self {
        self.query_params = Some(query_params);
        self
    }

    pub fn custom(mut self, custom: HashMap<String, JsonValue>) -> Self {
        self.custom = Some(custom);
        self
    }

    /// Overlay these overrides onto `base`.
    pub fn apply_to(self, mut base: UserContext) -> UserContext {
        if let Some(session_id) = self.session_id {
            base.session_id = session_id;
        }
        if let Some(user_id) = self.user_id {
            base.user_id = Some(user_id);
        }
        if let Some(url) = self.url {
            base.url = url;
        }
        if let Some(user_agent) = self.user_agent {
            base.user_agent = user_agent;
        }
        if let Some(timestamp) = self.timestamp {
            base.timestamp = timestamp;
        }
        if let Some(cookies) = self.cookies {
            base.cookies = cookies;
        }
        if let Some(stored) = self.stored {
            base.stored = stored;
        }
        if let Some(query_params) = self.query_params {
            base.query_params = query_params;
        }
        if let Some(custom) = self.custom {
            base.custom = custom;
        }
        base
    }
}

/// Supplies the complete context for a decision.
pub trait ContextProvider: Send + Sync {
    fn provide(&self, overrides: Option<PartialContext>) -> UserContext;
}

/// Provider returning a fixed base context, restamped on every call.
#[derive(Debug, Clone)]
pub struct StaticContextProvider {
    base: UserContext,
}

impl StaticContextProvider {
    pub fn new(base: UserContext) -> Self {
        Self { base }
    }
}

impl Default for StaticContextProvider {
    /// A provider for one freshly generated anonymous session.
    fn default() -> Self {
        Self::new(UserContext::new(new_session_id()))
    }
}

impl ContextProvider for StaticContextProvider {
    fn provide(&self, overrides: Option<PartialContext>) -> UserContext {
        let mut base = self.base.clone();
        base.timestamp = Utc::now();
        match overrides {
            Some(partial) => partial.apply_to(base),
            None => base,
        }
    }
}

/// Generate an anonymous session id of the form `sess_<uuid>`.
pub fn new_session_id() -> String {
    format!("sess_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subject_prefers_user_id() {
        let ctx = UserContext::new("s1");
        assert_eq!(ctx.subject_id(), "s1");
        let ctx = ctx.with_user_id("u1");
        assert_eq!(ctx.subject_id(), "u1");
    }

    #[test]
    fn test_partial_overrides_fields() {
        let base = UserContext::new("s1")
            .with_url("https://example.com/")
            .with_cookie("plan", "free")
            .with_query_param("utm", "mail");

        let mut cookies = HashMap::new();
        cookies.insert("beta".to_string(), "1".to_string());
        let merged = PartialContext::new()
            .user("u9")
            .url("https://example.com/pricing")
            .cookies(cookies)
            .apply_to(base);

        assert_eq!(merged.session_id, "s1");
        assert_eq!(merged.user_id.as_deref(), Some("u9"));
        assert_eq!(merged.url, "https://example.com/pricing");
        // maps are replaced, not merged
        assert_eq!(merged.cookies.len(), 1);
        assert_eq!(merged.cookies.get("beta").map(String::as_str), Some("1"));
        assert_eq!(merged.query_params.get("utm").map(String::as_str), Some("mail"));
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticContextProvider::new(
            UserContext::new("s1").with_stored("tier", json!("gold")),
        );

        let ctx = provider.provide(None);
        assert_eq!(ctx.session_id, "s1");
        assert_eq!(ctx.stored.get("tier"), Some(&json!("gold")));

        let ctx = provider.provide(Some(PartialContext::new().session("s2")));
        assert_eq!(ctx.session_id, "s2");
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = new_session_id();
        let b = new_session_id();
        assert!(a.starts_with("sess_"));
        assert_ne!(a, b);
    }
}
