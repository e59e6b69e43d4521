//! Device type classification.
//!
//! Classification is an ordered cascade of rules. Each rule looks at the
//! open ports, manufacturer, hostname and service metadata of a host and
//! either decides a category or passes. The first rule that decides wins,
//! so the order of [`RULES`] is significant.

use super::device::{DeviceRecord, DeviceType, ServiceMetadata};

/// Lowercased view of the inputs a rule can match on.
pub struct Signals<'a> {
    ports: &'a [u16],
    manufacturer: String,
    hostname: String,
    metadata: Option<&'a ServiceMetadata>,
}

impl<'a> Signals<'a> {
    pub fn new(
        ports: &'a [u16],
        manufacturer: Option<&str>,
        hostname: Option<&str>,
        metadata: Option<&'a ServiceMetadata>,
    ) -> Self {
        Self {
            ports,
            manufacturer: manufacturer.unwrap_or_default().to_lowercase(),
            hostname: hostname.unwrap_or_default().to_lowercase(),
            metadata,
        }
    }

    fn has_port(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    fn has_any_port(&self, ports: &[u16]) -> bool {
        ports.iter().any(|p| self.has_port(*p))
    }

    fn count_ports(&self, ports: &[u16]) -> usize {
        ports.iter().filter(|p| self.has_port(**p)).count()
    }

    fn vendor_matches(&self, needles: &[&str]) -> bool {
        !self.manufacturer.is_empty() && needles.iter().any(|n| self.manufacturer.contains(n))
    }

    fn hostname_matches(&self, needles: &[&str]) -> bool {
        !self.hostname.is_empty() && needles.iter().any(|n| self.hostname.contains(n))
    }
}

pub type Rule = fn(&Signals) -> Option<DeviceType>;

/// The classification cascade, evaluated top to bottom.
pub const RULES: &[(&str, Rule)] = &[
    ("accessory_metadata", accessory_metadata),
    ("multi_role_vendor", multi_role_vendor),
    ("iot_vendor", iot_vendor),
    ("single_board_computer", single_board_computer),
    ("mobile_os_vendor", mobile_os_vendor),
    ("hostname_keywords", hostname_keywords),
    ("port_signature", port_signature),
];

// Vendors that ship both network gear and cameras/consumer devices
const MULTI_ROLE_VENDORS: &[&str] = &["ubiquiti", "tp-link", "tp link", "netgear", "d-link"];

const CAMERA_KEYWORDS: &[&str] = &[
    "camera", "ipcam", "-cam", "cam-", "doorbell", "nvr", "dvr", "surveillance", "video",
];

const NETWORK_KEYWORDS: &[&str] = &[
    "gateway", "router", "switch", "usw", "uap", "udm", "usg", "access-point", "-ap", "ap-",
    "unifi", "deco", "orbi", "mesh",
];

// RTSP, RTMP, UniFi video, Dahua
const STREAMING_PORTS: &[u16] = &[554, 1935, 7447, 8554, 37777];

const ADMIN_PORTS: &[u16] = &[22, 23, 80, 161, 443, 8080, 8443];

/// (vendor substring, vendor substrings that exclude the match)
const IOT_VENDORS: &[(&str, &[&str])] = &[
    ("espressif", &[]),
    ("tuya", &[]),
    ("shelly", &[]),
    ("allterco", &[]),
    ("signify", &[]),
    ("philips lighting", &[]),
    ("lifx", &[]),
    ("nanoleaf", &[]),
    ("sonos", &[]),
    ("ecobee", &[]),
    ("nest labs", &[]),
    ("ring llc", &[]),
    ("wyze", &[]),
    ("belkin", &["linksys"]),
    ("itead", &[]),
    ("sengled", &[]),
    ("roku", &[]),
    ("amazon", &["web services", "aws"]),
    ("google", &["cloud"]),
];

const SBC_VENDORS: &[&str] = &[
    "raspberry pi",
    "raspberrypi",
    "hardkernel",
    "pine64",
    "beagleboard",
    "shenzhen xunlong",
];

// Home Assistant, Node-RED, MQTT
const HOME_AUTOMATION_PORTS: &[u16] = &[8123, 1880, 1883, 8883];

const HOME_AUTOMATION_KEYWORDS: &[&str] = &[
    "homeassistant",
    "home-assistant",
    "hassio",
    "hass",
    "openhab",
    "homebridge",
    "domoticz",
    "zigbee2mqtt",
];

const MOBILE_OS_VENDORS: &[&str] = &["apple"];

// AirPlay, AirTunes, DAAP, HomeKit accessory protocol
const AIRPLAY_PORTS: &[u16] = &[3689, 5000, 7000, 7100, 51826];

const APPLE_MEDIA_KEYWORDS: &[&str] = &["appletv", "apple-tv", "homepod", "airport"];

const MOBILE_HOSTNAMES: &[&str] = &[
    "iphone", "ipad", "android", "galaxy", "pixel", "oneplus", "redmi", "phone",
];

const SMART_HOME_HOSTNAMES: &[&str] = &[
    "bulb", "lamp", "light", "plug", "outlet", "socket", "hub", "bridge", "thermostat",
    "echo", "alexa", "chromecast", "sonos", "hue", "tasmota", "shelly", "wled", "esp-",
    "esp32", "esp8266", "sensor",
];

const INFRASTRUCTURE_HOSTNAMES: &[&str] = &[
    "_gateway", "gateway", "router", "fritz.box", "openwrt", "dd-wrt", "pfsense", "opnsense",
];

const DNS_DHCP_PORTS: &[u16] = &[53, 67, 68];

const DATABASE_PORTS: &[u16] = &[1433, 1521, 3306, 5432, 6379, 9200, 27017];

const NAS_ADMIN_PORTS: &[u16] = &[5000, 5001];
const SHELL_PORT: u16 = 22;

const PRINT_PORTS: &[u16] = &[515, 631, 9100];

const FILE_SHARING_PORTS: &[u16] = &[139, 445, 548, 2049];

fn accessory_metadata(s: &Signals) -> Option<DeviceType> {
    s.metadata
        .filter(|m| m.is_accessory)
        .map(|_| DeviceType::Iot)
}

fn multi_role_vendor(s: &Signals) -> Option<DeviceType> {
    if !s.vendor_matches(MULTI_ROLE_VENDORS) {
        return None;
    }

    if s.hostname_matches(CAMERA_KEYWORDS) {
        return Some(DeviceType::Iot);
    }
    if s.hostname_matches(NETWORK_KEYWORDS) {
        return Some(DeviceType::Router);
    }
    if s.has_any_port(STREAMING_PORTS) {
        return Some(DeviceType::Iot);
    }
    if s.count_ports(ADMIN_PORTS) >= 2 {
        return Some(DeviceType::Router);
    }

    Some(DeviceType::Router)
}

fn iot_vendor(s: &Signals) -> Option<DeviceType> {
    if s.manufacturer.is_empty() {
        return None;
    }

    IOT_VENDORS
        .iter()
        .any(|(vendor, exclusions)| {
            s.manufacturer.contains(vendor) && !exclusions.iter().any(|x| s.manufacturer.contains(x))
        })
        .then_some(DeviceType::Iot)
}

fn single_board_computer(s: &Signals) -> Option<DeviceType> {
    if !s.vendor_matches(SBC_VENDORS) {
        return None;
    }

    if s.has_any_port(HOME_AUTOMATION_PORTS) || s.hostname_matches(HOME_AUTOMATION_KEYWORDS) {
        Some(DeviceType::Iot)
    } else {
        Some(DeviceType::Computer)
    }
}

fn mobile_os_vendor(s: &Signals) -> Option<DeviceType> {
    if !s.vendor_matches(MOBILE_OS_VENDORS) {
        return None;
    }

    if s.has_any_port(AIRPLAY_PORTS) || s.hostname_matches(APPLE_MEDIA_KEYWORDS) {
        return Some(DeviceType::Iot);
    }

    None
}

fn hostname_keywords(s: &Signals) -> Option<DeviceType> {
    if s.hostname_matches(MOBILE_HOSTNAMES) {
        return Some(DeviceType::Mobile);
    }
    if s.hostname_matches(SMART_HOME_HOSTNAMES) {
        return Some(DeviceType::Iot);
    }
    if s.hostname_matches(INFRASTRUCTURE_HOSTNAMES) {
        return Some(DeviceType::Router);
    }
    None
}

fn port_signature(s: &Signals) -> Option<DeviceType> {
    if s.has_any_port(DNS_DHCP_PORTS) {
        return Some(DeviceType::Router);
    }
    if s.has_any_port(DATABASE_PORTS) {
        return Some(DeviceType::Server);
    }
    if s.has_any_port(NAS_ADMIN_PORTS) && s.has_port(SHELL_PORT) {
        return Some(DeviceType::Server);
    }
    if s.has_any_port(PRINT_PORTS) {
        return Some(DeviceType::Printer);
    }
    if s.has_any_port(HOME_AUTOMATION_PORTS) {
        return Some(DeviceType::Iot);
    }
    if s.count_ports(AIRPLAY_PORTS) >= 2 {
        return Some(DeviceType::Iot);
    }
    if s.has_any_port(FILE_SHARING_PORTS) {
        return Some(DeviceType::Computer);
    }
    None
}

/// Classify a host from its signals. Pure: same inputs, same category.
pub fn classify(
    ports: &[u16],
    manufacturer: Option<&str>,
    hostname: Option<&str>,
    metadata: Option<&ServiceMetadata>,
) -> DeviceType {
    let signals = Signals::new(ports, manufacturer, hostname, metadata);

    for (name, rule) in RULES {
        if let Some(device_type) = rule(&signals) {
            tracing::trace!("Classifier rule '{}' matched -> {}", name, device_type);
            return device_type;
        }
    }

    DeviceType::Unknown
}

/// Classify a registry record.
pub fn classify_device(device: &DeviceRecord) -> DeviceType {
    let ports = device.port_numbers();
    classify(
        &ports,
        device.manufacturer.as_deref(),
        device.hostname.as_deref(),
        device.service_metadata.as_ref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(is_accessory: bool) -> ServiceMetadata {
        ServiceMetadata {
            name: "Living Room".to_string(),
            category: Some("lightbulb".to_string()),
            services: vec!["_hap._tcp".to_string()],
            is_accessory,
            discovered_at: Utc::now(),
        }
    }

    fn signals<'a>(
        ports: &'a [u16],
        vendor: Option<&str>,
        hostname: Option<&str>,
        meta: Option<&'a ServiceMetadata>,
    ) -> Signals<'a> {
        Signals::new(ports, vendor, hostname, meta)
    }

    #[test]
    fn test_rule_order_is_fixed() {
        let names: Vec<_> = RULES.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "accessory_metadata",
                "multi_role_vendor",
                "iot_vendor",
                "single_board_computer",
                "mobile_os_vendor",
                "hostname_keywords",
                "port_signature",
            ]
        );
    }

    #[test]
    fn test_accessory_metadata() {
        let meta = metadata(true);
        assert_eq!(accessory_metadata(&signals(&[], None, None, Some(&meta))), Some(DeviceType::Iot));
        let meta = metadata(false);
        assert_eq!(accessory_metadata(&signals(&[], None, None, Some(&meta))), None);
    }

    #[test]
    fn test_multi_role_vendor_disambiguation() {
        let vendor = Some("Ubiquiti Inc");
        assert_eq!(
            multi_role_vendor(&signals(&[80, 443], vendor, Some("g4-doorbell"), None)),
            Some(DeviceType::Iot)
        );
        assert_eq!(
            multi_role_vendor(&signals(&[], vendor, Some("usw-lite-8"), None)),
            Some(DeviceType::Router)
        );
        assert_eq!(
            multi_role_vendor(&signals(&[554], vendor, None, None)),
            Some(DeviceType::Iot)
        );
        assert_eq!(
            multi_role_vendor(&signals(&[22, 443], vendor, None, None)),
            Some(DeviceType::Router)
        );
        assert_eq!(multi_role_vendor(&signals(&[], vendor, None, None)), Some(DeviceType::Router));
        assert_eq!(multi_role_vendor(&signals(&[554], Some("Dell Inc."), None, None)), None);
    }

    #[test]
    fn test_iot_vendor_with_carve_outs() {
        assert_eq!(iot_vendor(&signals(&[], Some("Espressif Inc."), None, None)), Some(DeviceType::Iot));
        assert_eq!(
            iot_vendor(&signals(&[], Some("Amazon Technologies Inc."), None, None)),
            Some(DeviceType::Iot)
        );
        assert_eq!(iot_vendor(&signals(&[], Some("Amazon Web Services, Inc."), None, None)), None);
        assert_eq!(iot_vendor(&signals(&[], None, None, None)), None);
    }

    #[test]
    fn test_single_board_computer() {
        let vendor = Some("Raspberry Pi Trading Ltd");
        assert_eq!(single_board_computer(&signals(&[8123], vendor, None, None)), Some(DeviceType::Iot));
        assert_eq!(
            single_board_computer(&signals(&[22], vendor, Some("homeassistant.local"), None)),
            Some(DeviceType::Iot)
        );
        assert_eq!(single_board_computer(&signals(&[22], vendor, Some("pi"), None)), Some(DeviceType::Computer));
    }

    #[test]
    fn test_mobile_os_vendor_falls_through() {
        let vendor = Some("Apple, Inc.");
        assert_eq!(mobile_os_vendor(&signals(&[7000], vendor, None, None)), Some(DeviceType::Iot));
        assert_eq!(
            mobile_os_vendor(&signals(&[], vendor, Some("Living-Room-AppleTV"), None)),
            Some(DeviceType::Iot)
        );
        assert_eq!(mobile_os_vendor(&signals(&[62078], vendor, Some("bobs-iphone"), None)), None);
    }

    #[test]
    fn test_hostname_keywords() {
        assert_eq!(hostname_keywords(&signals(&[], None, Some("Pixel-7"), None)), Some(DeviceType::Mobile));
        assert_eq!(hostname_keywords(&signals(&[], None, Some("kitchen-plug"), None)), Some(DeviceType::Iot));
        assert_eq!(hostname_keywords(&signals(&[], None, Some("_gateway"), None)), Some(DeviceType::Router));
        assert_eq!(hostname_keywords(&signals(&[], None, Some("workstation"), None)), None);
    }

    #[test]
    fn test_port_signature_table() {
        assert_eq!(port_signature(&signals(&[53], None, None, None)), Some(DeviceType::Router));
        assert_eq!(port_signature(&signals(&[5432], None, None, None)), Some(DeviceType::Server));
        assert_eq!(port_signature(&signals(&[22, 5001], None, None, None)), Some(DeviceType::Server));
        assert_eq!(port_signature(&signals(&[631], None, None, None)), Some(DeviceType::Printer));
        assert_eq!(port_signature(&signals(&[1883], None, None, None)), Some(DeviceType::Iot));
        assert_eq!(port_signature(&signals(&[7000, 7100], None, None, None)), Some(DeviceType::Iot));
        assert_eq!(port_signature(&signals(&[445], None, None, None)), Some(DeviceType::Computer));
        assert_eq!(port_signature(&signals(&[80, 443], None, None, None)), None);
    }

    #[test]
    fn test_dns_beats_weaker_signals() {
        assert_eq!(classify(&[53], None, None, None), DeviceType::Router);
        assert_eq!(classify(&[53, 3306, 445], None, None, None), DeviceType::Router);
    }

    #[test]
    fn test_earlier_rule_wins() {
        // Accessory flag outranks a phone-like hostname and printer ports
        let meta = metadata(true);
        assert_eq!(classify(&[631], None, Some("iphone"), Some(&meta)), DeviceType::Iot);
        // Hostname keyword outranks port signature
        assert_eq!(classify(&[53], None, Some("galaxy-s23"), None), DeviceType::Mobile);
        // IoT vendor outranks hostname keyword
        assert_eq!(classify(&[], Some("Espressif Inc."), Some("android-1234"), None), DeviceType::Iot);
    }

    #[test]
    fn test_no_signal_is_unknown() {
        assert_eq!(classify(&[], None, None, None), DeviceType::Unknown);
        assert_eq!(classify(&[80], Some("Dell Inc."), Some("desk"), None), DeviceType::Unknown);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let first = classify(&[22, 5000], Some("Synology Incorporated"), Some("nas"), None);
        for _ in 0..10 {
            assert_eq!(classify(&[22, 5000], Some("Synology Incorporated"), Some("nas"), None), first);
        }
        assert_eq!(first, DeviceType::Server);
    }
}
