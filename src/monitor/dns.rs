//! DNS snapshot diffing.

use crate::db::DnsSnapshot;

/// Field-by-field comparison of two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsDiff {
    pub changed: bool,
    pub lines: Vec<String>,
}

/// Diff a fresh snapshot against its predecessor. Additions, removals,
/// and value changes all count as changes. The first snapshot for a site
/// is never flagged: there is nothing to compare against.
pub fn diff_snapshots(previous: Option<&DnsSnapshot>, current: &DnsSnapshot) -> DnsDiff {
    let Some(prev) = previous else {
        return DnsDiff {
            changed: false,
            lines: Vec::new(),
        };
    };

    let mut lines = Vec::new();

    for (rtype, old_values) in prev {
        match current.get(rtype) {
            None => lines.push(format!(
                "{} records removed (was {})",
                rtype,
                old_values.join(", ")
            )),
            Some(new_values) if new_values != old_values => lines.push(format!(
                "{} changed: [{}] -> [{}]",
                rtype,
                old_values.join(", "),
                new_values.join(", ")
            )),
            Some(_) => {}
        }
    }

    for (rtype, new_values) in current {
        if !prev.contains_key(rtype) {
            lines.push(format!(
                "{} records added ({})",
                rtype,
                new_values.join(", ")
            ));
        }
    }

    DnsDiff {
        changed: !lines.is_empty(),
        lines,
    }
}
