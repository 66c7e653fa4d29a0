//! Validated identity keys for per-user backend routing

use std::fmt;

/// Maximum identity length (DNS label limit, since identities become
/// workload and endpoint names)
const MAX_IDENTITY_LEN: usize = 63;

/// The routing key naming a user's backend.
///
/// An `Identity` is the sole sharding key for backend instances, debounce
/// state, and routing targets. It crosses into external naming systems
/// (workload name, endpoint name, upstream host), so it is validated at the
/// boundary: a value that fails [`Identity::parse`] never reaches the
/// routing core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Parse and validate a raw identity string.
    ///
    /// Accepts non-empty strings of at most 63 bytes consisting of lowercase
    /// ASCII alphanumerics and interior hyphens. Identities are
    /// case-sensitive; uppercase input is rejected rather than folded so
    /// that two distinct identities can never collide in derived resource
    /// names.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > MAX_IDENTITY_LEN {
            return None;
        }

        if !raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return None;
        }

        // Leading/trailing hyphens are invalid in DNS labels
        if raw.starts_with('-') || raw.ends_with('-') {
            return None;
        }

        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the orchestrator workload record for this identity
    pub fn workload_name(&self) -> String {
        format!("{}-deploy", self.0)
    }

    /// Name of the orchestrator endpoint record for this identity.
    /// Doubles as the upstream host of the routing target.
    pub fn endpoint_name(&self) -> String {
        format!("{}-svc", self.0)
    }

    /// Label selector matching this identity's instances
    pub fn label_selector(&self) -> String {
        format!("app={}", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
