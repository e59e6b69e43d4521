//! MAC OUI (Organizationally Unique Identifier) vendor lookup
//!
//! Uses the IEEE OUI database to identify device manufacturers from MAC
//! addresses. Lookups only ever consider the first three octets, so the
//! result is a pure function of the OUI prefix. A small override table can
//! be loaded from a TOML file to correct or extend the database.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Vendor lookup keyed on the 3-octet OUI prefix.
#[derive(Debug, Clone, Default)]
pub struct OuiLookup {
    /// Normalized prefix (`AABBCC`) -> vendor
    overrides: HashMap<String, String>,
}

impl OuiLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a lookup with explicit prefix overrides.
    ///
    /// Keys may use any common separator (`AA:BB:CC`, `aa-bb-cc`, `aabbcc`).
    /// Entries that are not a valid prefix are skipped.
    pub fn with_overrides<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = HashMap::new();
        for (prefix, vendor) in entries {
            match normalize_prefix(prefix.as_ref()) {
                Some(key) => {
                    overrides.insert(key, vendor.into());
                }
                None => tracing::warn!("Ignoring invalid OUI override '{}'", prefix.as_ref()),
            }
        }
        Self { overrides }
    }

    /// Load overrides from a TOML file of `"AA:BB:CC" = "Vendor"` pairs.
    pub fn from_overrides_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read OUI overrides {:?}", path))?;
        let table: HashMap<String, String> =
            toml::from_str(&content).context("Failed to parse OUI overrides")?;
        tracing::debug!("Loaded {} OUI overrides from {:?}", table.len(), path);
        Ok(Self::with_overrides(table))
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    /// Lookup the vendor/manufacturer name for a MAC address.
    ///
    /// # Arguments
    /// * `mac` - MAC address in any common format (e.g., "00:1A:2B:3C:4D:5E", "00-1A-2B-3C-4D-5E")
    ///
    /// # Returns
    /// * `Some(vendor_name)` if the prefix is overridden or found in the OUI database
    /// * `None` if the MAC address is invalid or not found
    pub fn lookup(&self, mac: &str) -> Option<String> {
        let prefix = normalize_prefix(mac)?;

        if let Some(vendor) = self.overrides.get(&prefix) {
            return Some(vendor.clone());
        }

        let probe = format!(
            "{}:{}:{}:00:00:00",
            &prefix[0..2],
            &prefix[2..4],
            &prefix[4..6]
        );

        match oui_data::lookup(&probe) {
            Some(record) => {
                let vendor_name = record.organization().to_string();
                tracing::debug!(
                    "OUI lookup for {}: found {} (registry: {:?})",
                    mac,
                    vendor_name,
                    record.registry()
                );
                Some(vendor_name)
            }
            None => {
                tracing::debug!("OUI lookup for {}: not found in database", mac);
                None
            }
        }
    }
}

/// Reduce a MAC address (or bare prefix) to its uppercase 6-hex-digit OUI.
fn normalize_prefix(mac: &str) -> Option<String> {
    let cleaned: String = mac.trim().replace([':', '-', '.'], "").to_uppercase();

    if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    cleaned.get(..6).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("00:1a:2b:3c:4d:5e"), Some("001A2B".to_string()));
        assert_eq!(normalize_prefix("00-1A-2B-3C-4D-5E"), Some("001A2B".to_string()));
        assert_eq!(normalize_prefix("001a.2b3c.4d5e"), Some("001A2B".to_string()));
        assert_eq!(normalize_prefix("00:1a"), None);
        assert_eq!(normalize_prefix("zz:zz:zz:00:00:00"), None);
    }

    #[test]
    fn test_override_wins() {
        let oui = OuiLookup::with_overrides([("b8:27:eb", "Raspberry Pi Foundation")]);
        assert_eq!(
            oui.lookup("B8-27-EB-11-22-33"),
            Some("Raspberry Pi Foundation".to_string())
        );
    }

    #[test]
    fn test_lookup_depends_only_on_prefix() {
        let oui = OuiLookup::with_overrides([("AA:BB:CC", "Example Corp")]);
        assert_eq!(oui.lookup("aa:bb:cc:00:00:01"), oui.lookup("aa:bb:cc:ff:ee:dd"));
        assert_eq!(OuiLookup::new().lookup("00:17:f2:01:02:03"), OuiLookup::new().lookup("00:17:f2:aa:bb:cc"));
    }

    #[test]
    fn test_invalid_overrides_are_skipped() {
        let oui = OuiLookup::with_overrides([("nope", "Broken"), ("112233", "Valid")]);
        assert_eq!(oui.override_count(), 1);
    }

    #[test]
    fn test_invalid_mac_has_no_vendor() {
        assert_eq!(OuiLookup::new().lookup("not-a-mac"), None);
    }

    #[test]
    fn test_non_ascii_mac_has_no_vendor() {
        assert_eq!(normalize_prefix("00:11:2\u{e9}:33:44:55"), None);
        assert_eq!(normalize_prefix("\u{c9}\u{c9}\u{c9}:00:11"), None);
        assert_eq!(OuiLookup::new().lookup("00:11:2\u{e9}:33:44:55"), None);
    }
}
