//! Remote granule descriptor.

use serde::{Deserialize, Serialize};

/// Handle to a discoverable archive entry, as returned by granule search.
///
/// `name` is the archive's stable identifier for the granule (the granule
/// UR) and `data_links` is the ordered list of downloadable resource
/// locators. The retrieval core only reads this; producing descriptors is
/// the search collaborator's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGranule {
    pub name: String,
    pub data_links: Vec<String>,
}
