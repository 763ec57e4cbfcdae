//! DNS snapshot collection.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use std::time::Duration;
use url::Url;

use super::ProbeError;
use crate::db::DnsSnapshot;

/// Record types collected in every snapshot. Fixed so that consecutive
/// snapshots are always comparable field by field.
pub const SNAPSHOT_RECORD_TYPES: [RecordType; 6] = [
    RecordType::A,
    RecordType::AAAA,
    RecordType::CNAME,
    RecordType::MX,
    RecordType::NS,
    RecordType::TXT,
];

/// Hostname to snapshot for a site URL.
///
/// IP literals have no DNS records to track, so they yield `None` and the
/// caller skips DNS monitoring for the site.
pub fn snapshot_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.host()? {
        url::Host::Domain(domain) => Some(domain.to_string()),
        _ => None,
    }
}

/// Resolve the fixed record set for a hostname.
///
/// Record types with no records are omitted from the snapshot rather than
/// stored as empty lists. Values are sorted per type so two snapshots of
/// the same zone compare equal regardless of answer order.
pub async fn snapshot(host: &str, timeout: Duration) -> Result<DnsSnapshot, ProbeError> {
    let resolver = build_resolver(timeout);
    let mut records = DnsSnapshot::new();

    for rtype in SNAPSHOT_RECORD_TYPES {
        let lookup = match resolver.lookup(host, rtype).await {
            Ok(l) => l,
            Err(e) if is_no_records(&e) => continue,
            Err(e) => {
                return Err(ProbeError::Network(format!(
                    "{} lookup failed: {}",
                    rtype, e
                )))
            }
        };

        // An A lookup for a CNAMEd host also returns the CNAME record;
        // keep each bucket to its own type.
        let mut values: Vec<String> = lookup
            .record_iter()
            .filter(|r| r.record_type() == rtype)
            .filter_map(|r| r.data().map(|d| d.to_string()))
            .collect();

        if values.is_empty() {
            continue;
        }
        values.sort();
        records.insert(rtype.to_string(), values);
    }

    Ok(records)
}

fn build_resolver(timeout: Duration) -> TokioAsyncResolver {
    let (config, mut opts) = hickory_resolver::system_conf::read_system_conf()
        .unwrap_or_else(|_| (ResolverConfig::default(), ResolverOpts::default()));
    opts.timeout = timeout;
    TokioAsyncResolver::tokio(config, opts)
}

fn is_no_records(e: &ResolveError) -> bool {
    matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_host_for_domains() {
        assert_eq!(
            snapshot_host("https://example.com/healthz").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            snapshot_host("http://sub.example.co.uk:8080").as_deref(),
            Some("sub.example.co.uk")
        );
    }

    #[test]
    fn test_snapshot_host_skips_ip_literals() {
        assert!(snapshot_host("http://192.168.1.10").is_none());
        assert!(snapshot_host("https://[2001:db8::1]/").is_none());
    }

    #[test]
    fn test_snapshot_host_rejects_garbage() {
        assert!(snapshot_host("not a url").is_none());
    }
}
