//! Structured parsing of EMIT granule identifiers.

use std::fmt;

use chrono::NaiveDateTime;

/// Parsed EMIT granule identifier.
///
/// Granule identifiers look like
/// `EMIT_L2A_RFL_001_20230129T134543_2302909_004`: collection, product,
/// collection version, acquisition timestamp, orbit, and scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranuleIdentity {
    /// Product token, e.g. `RFL`, `MASK`, `RFLUNCERT`.
    pub product: String,
    /// Collection version number (`001` parses to 1).
    pub version: u16,
    /// Acquisition start time (UTC).
    pub acquired: NaiveDateTime,
    pub orbit: u32,
    pub scene: u16,
}

impl GranuleIdentity {
    /// Parse an identifier from a filename stem.
    ///
    /// Returns `None` for anything that does not follow the EMIT L2A naming
    /// scheme.
    pub fn parse(stem: &str) -> Option<Self> {
        let fields: Vec<&str> = stem.split('_').collect();
        if fields.len() != 7 || fields[0] != "EMIT" || fields[1] != "L2A" {
            return None;
        }

        let product = fields[2].to_string();
        let version = fields[3].parse::<u16>().ok()?;
        let acquired = NaiveDateTime::parse_from_str(fields[4], "%Y%m%dT%H%M%S").ok()?;
        let orbit = fields[5].parse::<u32>().ok()?;
        let scene = fields[6].parse::<u16>().ok()?;

        Some(Self {
            product,
            version,
            acquired,
            orbit,
            scene,
        })
    }

    /// Whether this identifies an EMIT L2A Reflectance collection 1 granule,
    /// the only product this crate retrieves.
    pub fn is_l2a_rfl_collection1(&self) -> bool {
        self.product == "RFL" && self.version == 1
    }
}

impl fmt::Display for GranuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EMIT_L2A_{}_{:03}_{}_{:07}_{:03}",
            self.product,
            self.version,
            self.acquired.format("%Y%m%dT%H%M%S"),
            self.orbit,
            self.scene
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_reflectance_identifier() {
        let identity = GranuleIdentity::parse("EMIT_L2A_RFL_001_20230129T134543_2302909_004")
            .expect("should parse");

        assert_eq!(identity.product, "RFL");
        assert_eq!(identity.version, 1);
        assert_eq!(
            identity.acquired,
            NaiveDate::from_ymd_opt(2023, 1, 29)
                .unwrap()
                .and_hms_opt(13, 45, 43)
                .unwrap()
        );
        assert_eq!(identity.orbit, 2302909);
        assert_eq!(identity.scene, 4);
        assert!(identity.is_l2a_rfl_collection1());
    }

    #[test]
    fn test_display_round_trips() {
        let stem = "EMIT_L2A_RFL_001_20230129T134543_2302909_004";
        let identity = GranuleIdentity::parse(stem).unwrap();
        assert_eq!(identity.to_string(), stem);
    }

    #[test]
    fn test_other_products_parse_but_are_not_rfl() {
        let identity =
            GranuleIdentity::parse("EMIT_L2A_MASK_001_20230129T134543_2302909_004").unwrap();
        assert!(!identity.is_l2a_rfl_collection1());

        let identity =
            GranuleIdentity::parse("EMIT_L2A_RFL_002_20230129T134543_2302909_004").unwrap();
        assert!(!identity.is_l2a_rfl_collection1());
    }

    #[test]
    fn test_malformed_identifiers_are_rejected() {
        assert!(GranuleIdentity::parse("EMIT_L2A_RFL_001").is_none());
        assert!(GranuleIdentity::parse("MODIS_L2A_RFL_001_20230129T134543_2302909_004").is_none());
        assert!(GranuleIdentity::parse("EMIT_L2A_RFL_abc_20230129T134543_2302909_004").is_none());
        assert!(GranuleIdentity::parse("EMIT_L2A_RFL_001_notatime_2302909_004").is_none());
    }
}
