//! Granule search against NASA's Common Metadata Repository.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::SearchError;
use crate::remote::RemoteGranule;

/// CMR short name of the EMIT L2A reflectance collection.
pub const EMIT_L2A_RFL_SHORT_NAME: &str = "EMITL2ARFL";
/// Collection version retrieved by this crate.
pub const EMIT_L2A_RFL_VERSION: &str = "001";

const CMR_GRANULE_SEARCH_URL: &str = "https://cmr.earthdata.nasa.gov/search/granules.json";
const DATA_LINK_REL: &str = "http://esipfed.org/ns/fedsearch/1.1/data#";
const PAGE_SIZE: u32 = 2000;

/// Geographic search area in degrees, west/south/east/north.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    fn to_query(self) -> String {
        format!("{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.west, self.south, self.east, self.north
        )
    }
}

/// Error parsing a `west,south,east,north` bounding box string.
#[derive(Debug, Error)]
pub enum BboxParseError {
    #[error("expected four comma-separated values, got {0:?}")]
    InvalidFormat(String),
    #[error("invalid number in bounding box: {0:?}")]
    InvalidNumber(String),
}

impl FromStr for BoundingBox {
    type Err = BboxParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(part.to_string()))?;
        }

        Ok(BoundingBox::new(values[0], values[1], values[2], values[3]))
    }
}

/// Archive search collaborator.
///
/// Zero results is a "data not available" condition, not an error: both
/// methods express it through an empty vector / `None`.
#[async_trait]
pub trait GranuleSearch: Send + Sync {
    /// All granules acquired on the given UTC date, optionally restricted to
    /// an area.
    async fn granules_for_date(
        &self,
        date: NaiveDate,
        area: Option<BoundingBox>,
    ) -> Result<Vec<RemoteGranule>, SearchError>;

    /// The granule for one orbit/scene pair, if the archive has it.
    async fn find_by_orbit_scene(
        &self,
        orbit: u32,
        scene: u16,
    ) -> Result<Option<RemoteGranule>, SearchError>;
}

/// [`GranuleSearch`] backed by the CMR granule search endpoint.
pub struct CmrSearch {
    client: Client,
    base_url: String,
}

impl CmrSearch {
    pub fn new() -> Result<Self, SearchError> {
        Self::with_base_url(CMR_GRANULE_SEARCH_URL)
    }

    /// Point the client at a different endpoint (e.g. a UAT environment or a
    /// local stub in tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Vec<RemoteGranule>, SearchError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("short_name", EMIT_L2A_RFL_SHORT_NAME),
                ("version", EMIT_L2A_RFL_VERSION),
            ])
            .query(&[("page_size", PAGE_SIZE)])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status));
        }

        let body: CmrResponse = response.json().await?;
        let granules = granules_from_response(body);
        debug!(count = granules.len(), "CMR search returned granules");
        Ok(granules)
    }
}

#[async_trait]
impl GranuleSearch for CmrSearch {
    async fn granules_for_date(
        &self,
        date: NaiveDate,
        area: Option<BoundingBox>,
    ) -> Result<Vec<RemoteGranule>, SearchError> {
        let temporal = format!(
            "{date}T00:00:00Z,{date}T23:59:59Z",
            date = date.format("%Y-%m-%d")
        );

        let mut params = vec![("temporal", temporal)];
        if let Some(area) = area {
            params.push(("bounding_box", area.to_query()));
        }

        info!(date = %date, area = ?area, "searching CMR for granules");
        self.query(&params).await
    }

    async fn find_by_orbit_scene(
        &self,
        orbit: u32,
        scene: u16,
    ) -> Result<Option<RemoteGranule>, SearchError> {
        // Granule URs end in `_<orbit>_<scene>`, so a name pattern finds the
        // exact overpass without a temporal constraint.
        let pattern = format!("EMIT_L2A_RFL_001_*_{:07}_{:03}", orbit, scene);

        info!(orbit, scene, pattern = %pattern, "searching CMR by orbit and scene");
        let granules = self
            .query(&[
                ("readable_granule_name", pattern),
                (
                    "options[readable_granule_name][pattern]",
                    "true".to_string(),
                ),
            ])
            .await?;

        Ok(granules.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct CmrResponse {
    feed: CmrFeed,
}

#[derive(Debug, Deserialize)]
struct CmrFeed {
    #[serde(default)]
    entry: Vec<CmrEntry>,
}

#[derive(Debug, Deserialize)]
struct CmrEntry {
    title: String,
    #[serde(default)]
    links: Vec<CmrLink>,
}

#[derive(Debug, Deserialize)]
struct CmrLink {
    #[serde(default)]
    rel: String,
    href: String,
    #[serde(default)]
    inherited: bool,
}

/// Reduce a CMR feed to granule descriptors with HTTPS data links.
///
/// CMR entries also carry browse imagery, metadata, and s3:// mirrors of the
/// data links; only direct HTTPS data links are downloadable here. Entries
/// without any are dropped.
fn granules_from_response(response: CmrResponse) -> Vec<RemoteGranule> {
    response
        .feed
        .entry
        .into_iter()
        .filter_map(|entry| {
            let data_links: Vec<String> = entry
                .links
                .iter()
                .filter(|link| {
                    link.rel == DATA_LINK_REL && !link.inherited && link.href.starts_with("https")
                })
                .map(|link| link.href.clone())
                .collect();

            if data_links.is_empty() {
                None
            } else {
                Some(RemoteGranule {
                    name: entry.title,
                    data_links,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMR_FIXTURE: &str = r#"{
        "feed": {
            "entry": [
                {
                    "title": "EMIT_L2A_RFL_001_20230129T134543_2302909_004",
                    "links": [
                        {
                            "rel": "http://esipfed.org/ns/fedsearch/1.1/data#",
                            "href": "https://data.lpdaac.earthdatacloud.nasa.gov/x/EMIT_L2A_RFL_001_20230129T134543_2302909_004.nc"
                        },
                        {
                            "rel": "http://esipfed.org/ns/fedsearch/1.1/data#",
                            "href": "https://data.lpdaac.earthdatacloud.nasa.gov/x/EMIT_L2A_RFLUNCERT_001_20230129T134543_2302909_004.nc"
                        },
                        {
                            "rel": "http://esipfed.org/ns/fedsearch/1.1/data#",
                            "href": "https://data.lpdaac.earthdatacloud.nasa.gov/x/EMIT_L2A_MASK_001_20230129T134543_2302909_004.nc"
                        },
                        {
                            "rel": "http://esipfed.org/ns/fedsearch/1.1/data#",
                            "href": "s3://lp-prod-protected/EMITL2ARFL.001/EMIT_L2A_RFL_001_20230129T134543_2302909_004.nc"
                        },
                        {
                            "rel": "http://esipfed.org/ns/fedsearch/1.1/browse#",
                            "href": "https://data.lpdaac.earthdatacloud.nasa.gov/x/EMIT_L2A_RFL_001_20230129T134543_2302909_004.png"
                        },
                        {
                            "rel": "http://esipfed.org/ns/fedsearch/1.1/data#",
                            "href": "https://opendap.earthdata.nasa.gov/collections/inherited.nc",
                            "inherited": true
                        }
                    ]
                },
                {
                    "title": "EMIT_L2A_RFL_001_20230129T134555_2302909_005",
                    "links": []
                }
            ]
        }
    }"#;

    #[test]
    fn test_granules_from_cmr_response() {
        let response: CmrResponse = serde_json::from_str(CMR_FIXTURE).unwrap();
        let granules = granules_from_response(response);

        // Second entry has no data links and is dropped.
        assert_eq!(granules.len(), 1);

        let granule = &granules[0];
        assert_eq!(granule.name, "EMIT_L2A_RFL_001_20230129T134543_2302909_004");
        assert_eq!(granule.data_links.len(), 3);
        assert!(granule
            .data_links
            .iter()
            .all(|link| link.starts_with("https") && link.ends_with(".nc")));
    }

    #[test]
    fn test_bbox_parse() {
        let bbox: BoundingBox = "-118.8,36.6,-118.5,36.9".parse().unwrap();
        assert_eq!(bbox, BoundingBox::new(-118.8, 36.6, -118.5, 36.9));
    }

    #[test]
    fn test_bbox_parse_rejects_bad_input() {
        assert!(matches!(
            "-118.8,36.6,-118.5".parse::<BoundingBox>(),
            Err(BboxParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            "-118.8,36.6,-118.5,north".parse::<BoundingBox>(),
            Err(BboxParseError::InvalidNumber(_))
        ));
    }
}
