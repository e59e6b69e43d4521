//! Device fusion and deduplication.
//!
//! Raw observations from different discovery sources are grouped by their
//! canonical IP and merged into one record per host. Incremental passes are
//! reconciled against the existing registry without losing history.

use super::device::{sort_by_ip, DeviceRecord, PortDescriptor, RawDiscoveryRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

/// Delimiters that introduce an interface scope (`10.0.0.5$en1`, `fe80::1%en0`)
const SCOPE_DELIMITERS: [char; 2] = ['$', '%'];

/// Strip any interface-scoping suffix from an address.
pub fn canonical_ip(ip: &str) -> &str {
    let ip = ip.trim();
    match ip.find(SCOPE_DELIMITERS) {
        Some(idx) => &ip[..idx],
        None => ip,
    }
}

/// Whether a "hostname" is really just an address.
pub fn is_address_shaped(hostname: &str) -> bool {
    let name = canonical_ip(hostname).trim_end_matches('.');
    name.parse::<IpAddr>().is_ok()
}

fn usable_hostname(hostname: &Option<String>) -> Option<&String> {
    hostname
        .as_ref()
        .filter(|h| !h.trim().is_empty() && !is_address_shaped(h))
}

/// Merge a group of records that share a canonical IP.
///
/// Returns `None` for an empty group.
pub fn merge_group(group: Vec<RawDiscoveryRecord>) -> Option<DeviceRecord> {
    let mut members = group.into_iter();
    let first = members.next()?;

    let mut merged = DeviceRecord {
        ip: canonical_ip(&first.ip).to_string(),
        hostname: usable_hostname(&first.hostname).cloned(),
        ..first.clone()
    };
    let mut ports: BTreeMap<u16, PortDescriptor> = BTreeMap::new();
    absorb_ports(&mut ports, first.open_ports);

    for member in members {
        if merged.hostname.is_none() {
            merged.hostname = usable_hostname(&member.hostname).cloned();
        }
        if member.mac.is_some() {
            merged.mac = member.mac;
        }
        if member.manufacturer.is_some() {
            merged.manufacturer = member.manufacturer;
        }
        if member.display_name.is_some() {
            merged.display_name = member.display_name;
        }
        if member.service_metadata.is_some() {
            merged.service_metadata = member.service_metadata;
        }
        merged.device_type = merged.device_type.refine(member.device_type);
        merged.first_seen = merged.first_seen.min(member.first_seen);
        merged.last_seen = merged.last_seen.max(member.last_seen);
        merged.is_online |= member.is_online;
        merged.is_known |= member.is_known;
        absorb_ports(&mut ports, member.open_ports);
    }

    merged.open_ports = ports.into_values().collect();
    Some(merged)
}

/// Union ports by number; a later descriptor replaces an earlier one but
/// keeps a version string the later one lacks.
fn absorb_ports(ports: &mut BTreeMap<u16, PortDescriptor>, incoming: Vec<PortDescriptor>) {
    for mut port in incoming {
        if let Some(previous) = ports.get(&port.port) {
            if port.version.is_none() {
                port.version = previous.version.clone();
            }
            if port.service.is_empty() {
                port.service = previous.service.clone();
            }
        }
        ports.insert(port.port, port);
    }
}

/// Collapse records that refer to the same canonical IP.
///
/// Members keep their input order inside each group. Output is sorted by
/// numeric IP. Running this on its own output changes nothing.
pub fn deduplicate(records: Vec<RawDiscoveryRecord>) -> Vec<DeviceRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<RawDiscoveryRecord>> = HashMap::new();

    for record in records {
        let key = canonical_ip(&record.ip).to_string();
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(record);
    }

    let mut merged: Vec<DeviceRecord> = order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .filter_map(merge_group)
        .collect();

    sort_by_ip(&mut merged);
    merged
}

/// Reconcile a fresh discovery pass against the existing registry.
///
/// Every existing host is considered part of the pass; see
/// [`reconcile_within`] to limit which absent hosts go offline.
pub fn reconcile(
    existing: Vec<DeviceRecord>,
    observed: Vec<RawDiscoveryRecord>,
    now: DateTime<Utc>,
) -> Vec<DeviceRecord> {
    reconcile_within(existing, observed, now, |_| true)
}

/// Reconcile a discovery pass that only covered hosts where `in_scope`
/// holds.
///
/// - Seen before and now: back online, `last_seen` refreshed, MAC refreshed
///   when the pass resolved one. Ports, classification and `first_seen`
///   stay as they were.
/// - Seen only now: inserted with no ports and no classification.
/// - Seen before, in scope, absent now: marked offline, nothing else changes.
pub fn reconcile_within<F>(
    existing: Vec<DeviceRecord>,
    observed: Vec<RawDiscoveryRecord>,
    now: DateTime<Utc>,
    in_scope: F,
) -> Vec<DeviceRecord>
where
    F: Fn(&str) -> bool,
{
    let mut seen: HashMap<String, Option<String>> = HashMap::new();
    for record in &observed {
        let mac = seen.entry(canonical_ip(&record.ip).to_string()).or_insert(None);
        if record.mac.is_some() {
            *mac = record.mac.clone();
        }
    }

    let mut reconciled = Vec::with_capacity(existing.len() + observed.len());
    let mut matched: HashSet<String> = HashSet::new();

    for mut device in existing {
        let key = canonical_ip(&device.ip).to_string();
        match seen.get(&key) {
            Some(mac) => {
                device.is_online = true;
                device.last_seen = device.last_seen.max(now);
                if mac.is_some() {
                    device.mac = mac.clone();
                }
                matched.insert(key);
            }
            None if in_scope(&device.ip) => {
                device.is_online = false;
            }
            None => {}
        }
        reconciled.push(device);
    }

    for mut record in observed {
        if matched.contains(canonical_ip(&record.ip)) {
            continue;
        }
        record.open_ports.clear();
        record.device_type = Default::default();
        record.is_online = true;
        record.last_seen = record.last_seen.max(now);
        record.first_seen = record.first_seen.min(record.last_seen);
        reconciled.push(record);
    }

    deduplicate(reconciled)
}
