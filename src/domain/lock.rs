use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Key of a distributed lock, `{scope}:{target}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(scope: &str, target: impl fmt::Display) -> Self {
        Self(format!("{scope}:{target}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fencing token handed to a lock holder. Renew and release must present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(pub Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Acquired(LockToken),
    Busy,
}

/// Result of a token-gated renew or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Ok,
    /// The key expired or is now owned by another holder.
    Stale,
}
