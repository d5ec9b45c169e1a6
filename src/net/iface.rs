//! Interface discovery for the test PC NIC.

use pnet::datalink::{self, NetworkInterface};

use super::TransportError;

/// Prefixes tried, in listing order, when the operator names no NIC.
pub const DEFAULT_PREFIXES: [&str; 3] = ["eth", "enp", "eno"];

/// Names of every network interface known to the kernel, sorted.
pub fn list_interfaces() -> Vec<String> {
    interface_names(datalink::interfaces())
}

fn interface_names(interfaces: Vec<NetworkInterface>) -> Vec<String> {
    let mut names: Vec<String> = interfaces.into_iter().map(|i| i.name).collect();
    names.sort();
    names.dedup();
    names
}

/// Pick the interface to test through.
///
/// With an empty `requested` name the first interface starting with one of
/// [`DEFAULT_PREFIXES`] wins. Otherwise an exact match is preferred, then the
/// first interface whose name starts with `requested`.
pub fn resolve_interface(available: &[String], requested: &str) -> Result<String, TransportError> {
    let found = if requested.is_empty() {
        available
            .iter()
            .find(|name| DEFAULT_PREFIXES.iter().any(|p| name.starts_with(p)))
    } else {
        available
            .iter()
            .find(|name| name.as_str() == requested)
            .or_else(|| available.iter().find(|name| name.starts_with(requested)))
    };
    found.cloned().ok_or_else(|| TransportError::NoInterfaceFound {
        requested: requested.to_string(),
        available: available.to_vec(),
    })
}
