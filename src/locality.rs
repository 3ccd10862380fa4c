use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// True when the URL points somewhere that must never be sent to the remote
/// service: loopback, RFC1918, link-local, unique-local, `localhost` and
/// `.local` names. Host names starting with `fc`, `fd` or `fe80` are
/// treated like their IPv6 counterparts.
///
/// Anything that fails to parse is treated as non-public.
pub fn is_non_public(url: &str) -> bool {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::debug!("Treating unparseable URL as non-public: {url} ({e})");
            return true;
        }
    };

    match parsed.host() {
        Some(Host::Domain(name)) => {
            let name = name.to_lowercase();
            is_local_name(&name) || has_private_ipv6_prefix(&name)
        }
        Some(Host::Ipv4(addr)) => is_private_ipv4(addr),
        Some(Host::Ipv6(addr)) => is_private_ipv6(addr),
        None => true,
    }
}

fn is_local_name(host: &str) -> bool {
    host == "localhost" || host.ends_with(".local")
}

fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    let [a, b, _, _] = addr.octets();
    a == 127
        || a == 10
        || (a == 192 && b == 168)
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
}

fn is_private_ipv6(addr: Ipv6Addr) -> bool {
    if addr == Ipv6Addr::LOCALHOST {
        return true;
    }

    has_private_ipv6_prefix(&addr.to_string())
}

/// Textual unique-local and link-local prefixes. Applied to host names too,
/// so `fdic.gov` is held back along with `fd00::1`.
fn has_private_ipv6_prefix(host: &str) -> bool {
    host.starts_with("fc") || host.starts_with("fd") || host.starts_with("fe80")
}
