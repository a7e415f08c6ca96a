//! Hosts-style allowlist files.
//!
//! Deployments that previously fed a CoreDNS `hosts` plugin keep their
//! allowlist in the classic `/etc/hosts` layout:
//!
//! ```text
//! # proxy address   names...
//! 10.100.1.10       github.com www.github.com
//! 10.100.1.11       raw.githubusercontent.com
//! ```
//!
//! Each name becomes one [`AllowEntry`]. Comments start with `#` and may
//! follow entries on the same line. Uniqueness is enforced later, when the
//! entries are merged with `[[allow]]` tables and loaded into the store.

use super::error::AllowlistError;
use crate::config::AllowEntry;
use std::net::IpAddr;

/// Parse the contents of a hosts-style allowlist.
pub fn parse_hosts(contents: &str) -> Result<Vec<AllowEntry>, AllowlistError> {
    let mut entries = Vec::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line_num = idx + 1;
        let line = raw_line
            .split_once('#')
            .map_or(raw_line, |(before, _)| before)
            .trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let Some(address) = fields.next() else {
            continue;
        };

        if address.parse::<IpAddr>().is_err() {
            return Err(AllowlistError::HostsParse {
                line_num,
                message: format!("'{}' is not an IP address", address),
            });
        }

        let names: Vec<&str> = fields.collect();
        if names.is_empty() {
            return Err(AllowlistError::HostsParse {
                line_num,
                message: format!("address {} has no names", address),
            });
        }

        entries.extend(names.into_iter().map(|name| AllowEntry {
            domain: name.to_string(),
            proxy_address: address.to_string(),
            service_tag: None,
            tls_policy: None,
        }));
    }

    Ok(entries)
}
