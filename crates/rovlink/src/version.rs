//! Version information for rovlink.

use crate::bridge::protocol::{CONTROL_FRAME_LEN, TELEMETRY_FRAME_LEN};

/// rovlink version from Cargo.toml
pub const ROVLINK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build and wire-format identification, logged at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    pub rovlink: &'static str,
    pub control_frame_len: usize,
    pub telemetry_frame_len: usize,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            rovlink: ROVLINK_VERSION,
            control_frame_len: CONTROL_FRAME_LEN,
            telemetry_frame_len: TELEMETRY_FRAME_LEN,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.rovlink, ROVLINK_VERSION);
        assert!(!info.rovlink.is_empty());
    }

    #[test]
    fn version_info_serializes() {
        let info = VersionInfo {
            rovlink: "0.1.0",
            ..VersionInfo::new()
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "rovlink": "0.1.0",
          "control_frame_len": 8,
          "telemetry_frame_len": 32
        }
        "#);
    }
}
