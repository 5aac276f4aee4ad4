//! Static registry of seismological agencies.
//!
//! Each agency is described by a read-only [`SourceSpec`]: endpoint, wire
//! format, rate limits, and priority weights. Loaded once; no mutation path.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::regions::Region;

/// Identifier for a reporting agency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Usgs,
    Emsc,
    Gfz,
    Isc,
    Ipgp,
    Geonet,
}

impl SourceTag {
    /// All known tags, in global priority order.
    pub const ALL: [Self; 6] = [
        Self::Usgs,
        Self::Emsc,
        Self::Isc,
        Self::Gfz,
        Self::Geonet,
        Self::Ipgp,
    ];

    /// Get the canonical lowercase tag string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usgs => "usgs",
            Self::Emsc => "emsc",
            Self::Gfz => "gfz",
            Self::Isc => "isc",
            Self::Ipgp => "ipgp",
            Self::Geonet => "geonet",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "usgs" => Ok(Self::Usgs),
            "emsc" => Ok(Self::Emsc),
            "gfz" => Ok(Self::Gfz),
            "isc" => Ok(Self::Isc),
            "ipgp" => Ok(Self::Ipgp),
            "geonet" => Ok(Self::Geonet),
            _ => Err(format!("unknown source tag: {s}")),
        }
    }
}

/// Wire formats the parsers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    GeojsonUsgs,
    GeojsonEmsc,
    FdsnText,
    Quakeml,
}

impl WireFormat {
    /// Get the canonical tag string for this format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GeojsonUsgs => "geojson_usgs",
            Self::GeojsonEmsc => "geojson_emsc",
            Self::FdsnText => "fdsn_text",
            Self::Quakeml => "quakeml",
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "geojson_usgs" => Ok(Self::GeojsonUsgs),
            "geojson_emsc" => Ok(Self::GeojsonEmsc),
            "fdsn_text" => Ok(Self::FdsnText),
            "quakeml" => Ok(Self::Quakeml),
            _ => Err(format!("unknown wire format: {s}")),
        }
    }
}

/// Read-only descriptor of one agency endpoint.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub tag: SourceTag,
    pub base_url: &'static str,
    /// Default query string appended to `base_url`; empty for fixed feeds
    pub default_query: &'static str,
    pub format: WireFormat,
    /// Floor between successive fetches; sizes the token gate
    pub min_poll_interval: Duration,
    /// Total deadline for one fetch including retries
    pub timeout: Duration,
    pub max_retries: u32,
    /// Global tiebreak rank, 1 = most trusted
    pub global_priority_rank: u8,
    pub supported_regions: &'static [Region],
}

impl SourceSpec {
    /// Full feed URL for this source.
    #[must_use]
    pub fn feed_url(&self) -> String {
        if self.default_query.is_empty() {
            self.base_url.to_string()
        } else {
            format!("{}?{}", self.base_url, self.default_query)
        }
    }

    /// Whether the registry lists this agency as serving `region`.
    #[must_use]
    pub fn covers(&self, region: Region) -> bool {
        self.supported_regions.contains(&region)
    }
}

const ALL_REGIONS: &[Region] = &[
    Region::Americas,
    Region::Europe,
    Region::Africa,
    Region::AsiaPacific,
];

static REGISTRY: [SourceSpec; 6] = [
    SourceSpec {
        tag: SourceTag::Usgs,
        base_url: "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/all_hour.geojson",
        default_query: "",
        format: WireFormat::GeojsonUsgs,
        min_poll_interval: Duration::from_secs(60),
        timeout: Duration::from_secs(10),
        max_retries: 3,
        global_priority_rank: 1,
        supported_regions: ALL_REGIONS,
    },
    SourceSpec {
        tag: SourceTag::Emsc,
        base_url: "https://www.seismicportal.eu/fdsnws/event/1/query",
        default_query: "format=json&limit=400",
        format: WireFormat::GeojsonEmsc,
        min_poll_interval: Duration::from_secs(60),
        timeout: Duration::from_secs(10),
        max_retries: 3,
        global_priority_rank: 2,
        supported_regions: ALL_REGIONS,
    },
    SourceSpec {
        tag: SourceTag::Isc,
        base_url: "https://www.isc.ac.uk/fdsnws/event/1/query",
        default_query: "format=xml&limit=400",
        format: WireFormat::Quakeml,
        min_poll_interval: Duration::from_secs(300),
        timeout: Duration::from_secs(30),
        max_retries: 3,
        global_priority_rank: 3,
        supported_regions: ALL_REGIONS,
    },
    SourceSpec {
        tag: SourceTag::Gfz,
        base_url: "https://geofon.gfz-potsdam.de/fdsnws/event/1/query",
        default_query: "format=text&limit=400",
        format: WireFormat::FdsnText,
        min_poll_interval: Duration::from_secs(120),
        timeout: Duration::from_secs(15),
        max_retries: 3,
        global_priority_rank: 4,
        supported_regions: ALL_REGIONS,
    },
    SourceSpec {
        tag: SourceTag::Geonet,
        base_url: "https://service.geonet.org.nz/fdsnws/event/1/query",
        default_query: "format=text&limit=400",
        format: WireFormat::FdsnText,
        min_poll_interval: Duration::from_secs(120),
        timeout: Duration::from_secs(15),
        max_retries: 3,
        global_priority_rank: 5,
        supported_regions: &[Region::AsiaPacific],
    },
    SourceSpec {
        tag: SourceTag::Ipgp,
        base_url: "https://ws.ipgp.fr/fdsnws/event/1/query",
        default_query: "format=xml&limit=400",
        format: WireFormat::Quakeml,
        min_poll_interval: Duration::from_secs(300),
        timeout: Duration::from_secs(30),
        max_retries: 3,
        global_priority_rank: 6,
        supported_regions: &[Region::Americas, Region::Europe, Region::Africa],
    },
];

/// The full agency registry.
#[must_use]
pub fn registry() -> &'static [SourceSpec] {
    &REGISTRY
}

/// Look up the descriptor for one agency.
#[must_use]
pub fn spec_for(tag: SourceTag) -> &'static SourceSpec {
    // The registry is total over SourceTag, so the lookup cannot fail.
    REGISTRY
        .iter()
        .find(|s| s.tag == tag)
        .unwrap_or(&REGISTRY[0])
}
