/*!
 # Hub classification

 Decides from advertisement data whether a peripheral is a hub this crate
 can drive, and which wire format it speaks.
*/

use std::fmt;

use crate::transport::HubAdvertisement;

/// Local name prefix of WeDo 2.0 hubs
pub const WEDO2_NAME_PREFIX: &str = "LPF2 Smart Hub 2 I/O";
/// Primary service advertised by WeDo 2.0 hubs
pub const WEDO2_SERVICE_ID: &str = "000015231212efde1523785feabcd123";
/// Primary service advertised by Boost / Powered Up hubs
pub const BOOST_SERVICE_ID: &str = "000016231212efde1623785feabcd123";
/// Factory names of Boost family hubs
const BOOST_NAMES: [&str; 3] = ["LEGO Move Hub", "HUB NO.4", "Technic Hub"];

/// Wire format family of a hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubType {
    /// WeDo 2.0 smart hub, one characteristic per channel
    WeDo2,
    /// Boost / Powered Up hub, everything multiplexed on one characteristic
    Boost,
    /// Selected by name filter only; no codec is attached and commands are dropped
    Unknown,
}

impl fmt::Display for HubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubType::WeDo2 => write!(f, "WeDo 2.0"),
            HubType::Boost => write!(f, "Boost"),
            HubType::Unknown => write!(f, "unknown hub"),
        }
    }
}

fn first_service_starts_with(advertisement: &HubAdvertisement, service_id: &str) -> bool {
    advertisement
        .service_ids
        .first()
        .map(|s| s.replace('-', "").to_lowercase().starts_with(service_id))
        .unwrap_or(false)
}

/// Hub type as far as the advertised name alone tells
fn type_from_name(name: &str) -> HubType {
    if name.starts_with(WEDO2_NAME_PREFIX) {
        HubType::WeDo2
    } else if BOOST_NAMES.iter().any(|n| name.starts_with(n)) {
        HubType::Boost
    } else {
        HubType::Unknown
    }
}

/// Classifies an advertisement, returning `None` when it is not a hub we want.
///
/// With a non-empty `name_filter` only peripherals whose local name contains
/// the filter (or whose id equals it) match, and service ids are ignored. The
/// type then comes from the name alone and is [`HubType::Unknown`] when the
/// name does not reveal it. Without a filter a hub matches on the WeDo 2.0
/// name prefix or on its first advertised service id.
pub fn classify(advertisement: &HubAdvertisement, name_filter: Option<&str>) -> Option<HubType> {
    let name = advertisement.local_name.as_deref();

    if let Some(filter) = name_filter.filter(|f| !f.is_empty()) {
        let by_name = name.is_some_and(|n| n.contains(filter));
        let by_id = advertisement.id.as_str() == filter;
        if !by_name && !by_id {
            return None;
        }
        return Some(name.map(type_from_name).unwrap_or(HubType::Unknown));
    }

    if first_service_starts_with(advertisement, WEDO2_SERVICE_ID) {
        Some(HubType::WeDo2)
    } else if first_service_starts_with(advertisement, BOOST_SERVICE_ID) {
        Some(HubType::Boost)
    } else if name.is_some_and(|n| n.starts_with(WEDO2_NAME_PREFIX)) {
        Some(HubType::WeDo2)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HubId;

    fn advertisement(name: Option<&str>, services: &[&str]) -> HubAdvertisement {
        HubAdvertisement {
            id: HubId::new("aa:bb"),
            local_name: name.map(str::to_owned),
            service_ids: services.iter().map(|s| s.to_string()).collect(),
            rssi: None,
        }
    }

    #[test]
    fn service_id_decides_without_filter() {
        let wedo = advertisement(Some("anything"), &[WEDO2_SERVICE_ID]);
        assert_eq!(classify(&wedo, None), Some(HubType::WeDo2));

        let boost = advertisement(None, &[BOOST_SERVICE_ID, WEDO2_SERVICE_ID]);
        assert_eq!(classify(&boost, None), Some(HubType::Boost));
    }

    #[test]
    fn dashed_service_ids_match() {
        let boost = advertisement(None, &["00001623-1212-EFDE-1623-785FEABCD123"]);
        assert_eq!(classify(&boost, None), Some(HubType::Boost));
    }

    #[test]
    fn name_prefix_means_wedo2() {
        let wedo = advertisement(Some("LPF2 Smart Hub 2 I/O"), &[]);
        assert_eq!(classify(&wedo, None), Some(HubType::WeDo2));
    }

    #[test]
    fn only_first_service_counts() {
        let other = advertisement(Some("Speaker"), &["180f", WEDO2_SERVICE_ID]);
        assert_eq!(classify(&other, None), None);
    }

    #[test]
    fn empty_advertisement_is_no_match() {
        assert_eq!(classify(&advertisement(None, &[]), None), None);
        assert_eq!(classify(&advertisement(None, &[]), Some("hub")), None);
    }

    #[test]
    fn filter_disables_service_matching() {
        let wedo = advertisement(Some("Kitchen"), &[WEDO2_SERVICE_ID]);
        assert_eq!(classify(&wedo, Some("Garage")), None);
    }

    #[test]
    fn filter_takes_type_from_name() {
        let wedo = advertisement(Some("LPF2 Smart Hub 2 I/O"), &[]);
        assert_eq!(classify(&wedo, Some("Smart Hub")), Some(HubType::WeDo2));

        let boost = advertisement(Some("LEGO Move Hub"), &[]);
        assert_eq!(classify(&boost, Some("Move")), Some(HubType::Boost));

        let renamed = advertisement(Some("Robot 7"), &[BOOST_SERVICE_ID]);
        assert_eq!(classify(&renamed, Some("Robot")), Some(HubType::Unknown));
    }

    #[test]
    fn filter_matches_identifier() {
        let hub = advertisement(None, &[]);
        assert_eq!(classify(&hub, Some("aa:bb")), Some(HubType::Unknown));
    }

    #[test]
    fn empty_filter_is_absent() {
        let wedo = advertisement(None, &[WEDO2_SERVICE_ID]);
        assert_eq!(classify(&wedo, Some("")), Some(HubType::WeDo2));
    }
}
