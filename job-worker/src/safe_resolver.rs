use std::error::Error as StdError;
use std::net::SocketAddr;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::net::lookup_host;

/// A DNS resolver used by the Webhook Dispatcher's outbound client that
/// rejects any resolved address falling in a private, loopback,
/// link-local, multicast, unspecified, or documentation range, for both
/// IPv4 and IPv6 (§4.7: workers are the only core-owned producer of
/// outbound network traffic, so this is where SSRF protection belongs).
/// Adapted from the teacher's `hyper::client::connect::dns::GaiResolver`
/// wrapper to use `tokio::net::lookup_host` directly instead, since the
/// corpus's `reqwest` version no longer exposes that hyper type.
type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SafeResolver;

impl SafeResolver {
    pub fn new() -> Self {
        Self
    }
}

fn validate_addr(addr: &SocketAddr) -> bool {
    match addr {
        SocketAddr::V4(ipv4) => {
            let ip = ipv4.ip();
            !(ip.is_private()
                || ip.is_loopback()
                || ip.is_link_local()
                || ip.is_broadcast()
                || ip.is_multicast()
                || ip.is_unspecified()
                || ip.is_documentation())
        }
        SocketAddr::V6(ipv6) => {
            let ip = ipv6.ip();
            !(ip.is_loopback() || ip.is_multicast() || ip.is_unspecified())
        }
    }
}

impl Resolve for SafeResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = lookup_host((name.as_str(), 0))
                .await
                .map_err(|err| -> BoxError { Box::new(err) })?
                .collect();

            if !addrs.iter().all(validate_addr) {
                return Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("refusing to resolve {name:?} to a non-public address"),
                )) as BoxError);
            }

            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
