//! Consumer naming within the group.

use std::fmt;

/// Name a worker process claims entries under.
///
/// Stable for the life of the process and distinct between processes, even
/// when several share a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerIdentity(String);

impl ConsumerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `worker-<HOSTNAME>-<pid>`, with `local` standing in for an unset host.
    pub fn from_env() -> Self {
        let host = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "local".to_string());
        Self::for_host(&host, std::process::id())
    }

    pub fn for_host(host: &str, pid: u32) -> Self {
        Self(format!("worker-{}-{}", host, pid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_host_different_process() {
        let a = ConsumerIdentity::for_host("node-1", 100);
        let b = ConsumerIdentity::for_host("node-1", 101);
        assert_eq!(a.as_str(), "worker-node-1-100");
        assert_ne!(a, b);
    }

    #[test]
    fn from_env_is_stable() {
        assert_eq!(ConsumerIdentity::from_env(), ConsumerIdentity::from_env());
        assert!(ConsumerIdentity::from_env().as_str().starts_with("worker-"));
    }
}
