//! Session identity and endpoint derivation.
//!
//! A session is bound to exactly one `(project, agent)` pair for its whole
//! lifetime. The pair determines the terminal endpoint path
//! `/ws/terminal/{project}/{agent}`; scheme, host and port come from
//! configuration so the core stays deployment-agnostic.

// Rust guideline compliant 2026-02

use std::fmt;

use crate::constants::TERMINAL_PATH_PREFIX;
use crate::error::{Result, TerminalError};

/// Immutable `(project, agent)` pair identifying a terminal session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    project_id: String,
    agent_id: String,
}

impl SessionIdentity {
    /// Validate and build an identity.
    ///
    /// Both identifiers must be non-empty ASCII and must not contain path or
    /// query delimiters, since they are spliced into the endpoint path
    /// verbatim.
    pub fn new(project_id: impl Into<String>, agent_id: impl Into<String>) -> Result<Self> {
        let project_id = project_id.into();
        let agent_id = agent_id.into();
        validate_segment("project", &project_id)?;
        validate_segment("agent", &agent_id)?;
        Ok(Self {
            project_id,
            agent_id,
        })
    }

    /// Project identifier.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Agent identifier.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Endpoint path for this identity, e.g. `/ws/terminal/proj-123/agent-456`.
    #[must_use]
    pub fn endpoint_path(&self) -> String {
        format!("{TERMINAL_PATH_PREFIX}/{}/{}", self.project_id, self.agent_id)
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.agent_id)
    }
}

fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TerminalError::InvalidIdentity(format!("{kind} id is empty")));
    }
    if let Some(bad) = value.chars().find(|c| {
        !c.is_ascii() || matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace() || c.is_control()
    }) {
        return Err(TerminalError::InvalidIdentity(format!(
            "{kind} id {value:?} contains illegal character {bad:?}"
        )));
    }
    Ok(())
}

/// Swap a leading `http://`/`https://` (any case) for `ws://`/`wss://`.
/// Anything else is returned unchanged.
fn http_to_ws_scheme(url: &str) -> String {
    for (from, to) in [("https://", "wss://"), ("http://", "ws://")] {
        if url
            .get(..from.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(from))
        {
            return format!("{to}{}", &url[from.len()..]);
        }
    }
    url.to_string()
}

/// Fully resolved WebSocket address of one terminal session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    /// Derive the endpoint for `identity` under `base_url`.
    ///
    /// `base_url` may use `http(s)://` or `ws(s)://` and may carry a path
    /// prefix (reverse proxies); a trailing slash is ignored.
    #[must_use]
    pub fn for_identity(base_url: &str, identity: &SessionIdentity) -> Self {
        let base = http_to_ws_scheme(base_url.trim_end_matches('/'));
        Self {
            url: format!("{base}{}", identity.endpoint_path()),
        }
    }

    /// The WebSocket URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
