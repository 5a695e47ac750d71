// Domain name resolution used for sending and for challenge verification

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;

/// Resolves a domain to the IP addresses registered for it
pub trait Resolver: Send + Sync {
    fn resolve<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>>;
}

/// Resolver backed by the system's DNS configuration
#[derive(Debug, Clone, Default)]
pub struct DnsResolver;

impl Resolver for DnsResolver {
    fn resolve<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((domain, 0)).await?;
            let mut ips: Vec<IpAddr> = Vec::new();
            for addr in addrs {
                let ip = addr.ip().to_canonical();
                if !ips.contains(&ip) {
                    ips.push(ip);
                }
            }
            Ok(ips)
        })
    }
}

/// Fixed domain table, for closed deployments and tests
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `domain` (case-insensitive) as resolving to `ips`
    pub fn with(mut self, domain: &str, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.entries
            .insert(domain.to_ascii_lowercase(), ips.into_iter().collect());
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        let result = self
            .entries
            .get(&domain.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", domain))
            });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver =
            StaticResolver::new().with("D1.example", [IpAddr::V4(Ipv4Addr::LOCALHOST)]);

        let ips = resolver.resolve("d1.example").await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);

        let err = resolver.resolve("d2.example").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_dns_resolver_localhost() {
        let ips = DnsResolver.resolve("localhost").await.unwrap();
        assert!(ips.iter().any(|ip| ip.is_loopback()));
    }
}
