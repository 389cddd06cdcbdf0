use futures_util::future::join_all;
use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;

/// Targets probed when none are configured.
pub const DEFAULT_PROBE_HOSTS: &str = "archlinux.org:443,1.1.1.1:443";

/// TCP reachability check against a list of `host:port` targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityProbe {
    targets: Vec<String>,
    timeout: Duration,
}

impl ReachabilityProbe {
    pub fn new(targets: Vec<String>, timeout: Duration) -> Self {
        Self { targets, timeout }
    }

    /// Parse a comma separated target list, ignoring empty items.
    pub fn parse_targets(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|target| !target.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// True as soon as any target accepts a connection within the timeout.
    #[tracing::instrument(skip(self))]
    pub async fn is_reachable(&self) -> bool {
        if self.targets.is_empty() {
            return false;
        }
        let attempts = self
            .targets
            .iter()
            .map(|target| connect(target, self.timeout));
        join_all(attempts).await.into_iter().any(|ok| ok)
    }
}

async fn connect(target: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => {
            debug!("Reachable: {}", target);
            true
        }
        Ok(Err(e)) => {
            debug!("Unreachable: {} ({})", target, e);
            false
        }
        Err(_) => {
            debug!("Unreachable: {} (timed out)", target);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_targets() {
        assert_eq!(
            ReachabilityProbe::parse_targets(DEFAULT_PROBE_HOSTS),
            vec!["archlinux.org:443", "1.1.1.1:443"]
        );
        assert_eq!(
            ReachabilityProbe::parse_targets(" proxy:3128 ,, "),
            vec!["proxy:3128"]
        );
        assert!(ReachabilityProbe::parse_targets("").is_empty());
    }

    #[tokio::test]
    async fn test_listening_target_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = ReachabilityProbe::new(vec![addr.to_string()], Duration::from_secs(2));
        assert!(probe.is_reachable().await);
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = ReachabilityProbe::new(vec![addr.to_string()], Duration::from_secs(2));
        assert!(!probe.is_reachable().await);
    }

    #[tokio::test]
    async fn test_any_reachable_target_wins() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = ReachabilityProbe::new(
            vec!["not a target".to_string(), addr.to_string()],
            Duration::from_secs(2),
        );
        assert!(probe.is_reachable().await);
    }

    #[tokio::test]
    async fn test_no_targets_means_offline() {
        let probe = ReachabilityProbe::new(Vec::new(), Duration::from_secs(1));
        assert!(!probe.is_reachable().await);
    }
}
