//! Retrieval of NASA EMIT L2A surface-reflectance granules.
//!
//! An EMIT granule is a single overpass scene delivered as three NetCDF
//! files: reflectance, quality mask, and reflectance uncertainty. On HPC
//! network filesystems the download of any of the three can silently
//! corrupt, so retrieval is driven by a retry state machine
//! ([`GranuleRetriever`]) that validates cached files, purges and re-fetches
//! the bad ones with exponential backoff, and only hands out a
//! [`GranuleFileSet`] once every file passes validation.
//!
//! The actual network transfer and archive search are collaborators behind
//! the [`DownloadTransport`] and [`GranuleSearch`] traits; [`HttpTransport`]
//! and [`CmrSearch`] are the NASA Earthdata implementations.

pub mod cmr;
pub mod error;
pub mod fileset;
pub mod identity;
pub mod remote;
pub mod retriever;
pub mod roles;
pub mod transport;

pub use cmr::{BoundingBox, CmrSearch, GranuleSearch};
pub use error::{FileFailure, RetrievalError, SearchError, TransportError};
pub use fileset::GranuleFileSet;
pub use identity::GranuleIdentity;
pub use remote::RemoteGranule;
pub use retriever::{GranuleRetriever, RetrieverConfig};
pub use roles::LocalFileRole;
pub use transport::{DownloadTransport, HttpTransport, HttpTransportConfig};
