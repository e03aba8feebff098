//! URI and port helpers.
//!
//! A URI names a peer as `host:port`, optionally prefixed with a resolver scheme
//! (`ipv4:`, `ipv6:` or `dns:`). The host of an IPv6 literal keeps its brackets:
//! `ipv6:[::1]:50051`.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use mondo_rpc::TransportError;

/// Wildcard IPv6 host.
pub const IPV6_ANY: &str = "[::]";

/// IPv6 loopback host.
pub const IPV6_LOOPBACK: &str = "[::1]";

/// Lowest port accepted by [`port_is_valid`].
pub const MIN_PORT: u32 = 1024;

/// Highest port accepted by [`port_is_valid`].
pub const MAX_PORT: u32 = 65535;

const SCHEMES: [&str; 3] = ["ipv4:", "ipv6:", "dns:"];

/// Returns true when `port` can be bound on every IPv4 interface right now.
pub fn port_is_available(port: u16) -> bool {
	TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

/// Asks the OS for a currently unused port.
///
/// The port is released before returning, so another process may take it first.
pub fn find_available_port() -> Option<u16> {
	let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
	let port = listener.local_addr().ok()?.port();
	(port > 0).then_some(port)
}

/// Returns true for non-privileged ports.
pub fn port_is_valid(port: u32) -> bool {
	(MIN_PORT..=MAX_PORT).contains(&port)
}

/// Replaces the port of `old_uri` with `new_port`, given as `":port"`.
///
/// A URI without any colon is taken to be a bare host and gets `new_port` appended.
pub fn compute_new_uri(old_uri: &str, new_port: &str) -> String {
	match old_uri.rfind(':') {
		Some(pos) => format!("{}{new_port}", &old_uri[..pos]),
		None => format!("{old_uri}{new_port}"),
	}
}

/// Returns true when `uri` has a host part and a valid port.
pub fn uri_is_valid(uri: &str) -> bool {
	ip_port_from_uri(uri).is_some()
}

/// Splits `uri` at its last colon into a non-empty host part and a valid port.
///
/// The host part is returned verbatim, scheme included.
pub fn ip_port_from_uri(uri: &str) -> Option<(&str, u16)> {
	let (ip, port) = uri.rsplit_once(':')?;
	if ip.is_empty() {
		return None;
	}
	let port: u32 = port.parse().ok()?;
	if !port_is_valid(port) {
		return None;
	}
	Some((ip, u16::try_from(port).ok()?))
}

/// Strips a resolver scheme, if any.
pub fn strip_scheme(uri: &str) -> &str {
	SCHEMES
		.iter()
		.find_map(|scheme| uri.strip_prefix(scheme))
		.map_or(uri, |rest| rest.trim_start_matches('/'))
}

/// Validates `uri` and returns the `host:port` connect target it names.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUri`] when the host or port is missing or invalid.
pub fn target_from_uri(uri: &str) -> Result<String, TransportError> {
	let target = strip_scheme(uri.trim());
	match ip_port_from_uri(target) {
		Some((host, port)) => Ok(format!("{host}:{port}")),
		None => Err(TransportError::InvalidUri(uri.to_owned())),
	}
}

/// Resolves `uri` to the first socket address it names.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUri`] for malformed URIs or hosts that resolve to nothing,
/// and [`TransportError::Io`] when the lookup itself fails.
pub async fn resolve(uri: &str) -> Result<SocketAddr, TransportError> {
	let target = target_from_uri(uri)?;
	tokio::net::lookup_host(target.as_str())
		.await?
		.next()
		.ok_or_else(|| TransportError::InvalidUri(uri.to_owned()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_uri_replaces_or_appends_port() {
		assert_eq!(compute_new_uri("127.0.0.1:1234", ":5678"), "127.0.0.1:5678");
		assert_eq!(compute_new_uri("127.0.0.1:", ":456"), "127.0.0.1:456");
		assert_eq!(compute_new_uri("127.0.0.1", ":456"), "127.0.0.1:456");
	}

	#[test]
	fn uri_validity_requires_host_and_unprivileged_port() {
		assert!(!uri_is_valid("127.0.0.1"));
		assert!(!uri_is_valid("127.0.0.1:"));
		assert!(uri_is_valid("127.0.0.1:1234"));
		assert!(!uri_is_valid(":1234"));
		assert!(!uri_is_valid("127.0.0.1:1023"));
		assert!(uri_is_valid("127.0.0.1:1024"));
		assert!(uri_is_valid("127.0.0.1:65535"));
		assert!(!uri_is_valid("127.0.0.1:65536"));
		assert!(uri_is_valid("ipv4:192.168.1.79:50051"));
		assert!(uri_is_valid(&format!("ipv6:{IPV6_ANY}:50051")));
	}

	#[test]
	fn ip_and_port_split_at_last_colon() {
		assert_eq!(ip_port_from_uri("1.2.3.4:5678"), Some(("1.2.3.4", 5678)));
		assert_eq!(ip_port_from_uri("[::1]:5678"), Some(("[::1]", 5678)));
		assert_eq!(ip_port_from_uri("5678"), None);
		assert_eq!(ip_port_from_uri(":5678"), None);
		assert_eq!(ip_port_from_uri("1.2.3.4:678"), None);
		assert_eq!(ip_port_from_uri("1.2.3.4:65536"), None);
		assert_eq!(ip_port_from_uri("1.2.3.4:"), None);
	}

	#[test]
	fn scheme_is_stripped_from_targets() {
		assert_eq!(target_from_uri("ipv4:127.0.0.1:50051").unwrap(), "127.0.0.1:50051");
		assert_eq!(target_from_uri("ipv6:[::1]:50051").unwrap(), "[::1]:50051");
		assert_eq!(target_from_uri("dns:///localhost:50051").unwrap(), "localhost:50051");
		assert!(matches!(target_from_uri("localhost"), Err(TransportError::InvalidUri(_))));
	}

	#[tokio::test]
	async fn resolve_accepts_every_scheme() {
		let v4 = resolve("ipv4:127.0.0.1:5000").await.unwrap();
		assert_eq!(v4, SocketAddr::from(([127, 0, 0, 1], 5000)));
		assert_eq!(resolve("127.0.0.1:5000").await.unwrap(), v4);

		let v6 = resolve(&format!("ipv6:{IPV6_LOOPBACK}:5001")).await.unwrap();
		assert_eq!(v6, SocketAddr::from((std::net::Ipv6Addr::LOCALHOST, 5001)));

		let named = resolve("dns:localhost:5002").await.unwrap();
		assert_eq!(named.port(), 5002);
		assert!(named.ip().is_loopback());

		assert!(matches!(resolve("127.0.0.1").await, Err(TransportError::InvalidUri(_))));
	}

	#[test]
	fn found_port_is_bindable() {
		let port = find_available_port().unwrap();
		assert!(port > 0);
		assert!(port_is_available(port));
	}
}
