//! Per-head configuration (§3): exposure, laser timing, and detection thresholds.

use crate::error::{Result, ScanError};

/// A validated configuration for one scan head.
///
/// Constructed only through [`ConfigBuilder::build`], which rejects
/// out-of-range or mis-ordered values before a head ever sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub scan_offset_us: u32,
    pub camera_exposure_time_min_us: u32,
    pub camera_exposure_time_def_us: u32,
    pub camera_exposure_time_max_us: u32,
    pub laser_on_time_min_us: u32,
    pub laser_on_time_def_us: u32,
    pub laser_on_time_max_us: u32,
    pub laser_detection_threshold: u32,
    pub saturation_threshold: u32,
    pub saturation_percentage: u32,
}

impl Default for Config {
    fn default() -> Self {
        // A conservative, always-valid starting point; callers override via ConfigBuilder.
        Config {
            scan_offset_us: 0,
            camera_exposure_time_min_us: 15_000,
            camera_exposure_time_def_us: 500_000,
            camera_exposure_time_max_us: 1_000_000,
            laser_on_time_min_us: 100,
            laser_on_time_def_us: 500,
            laser_on_time_max_us: 1_000,
            laser_detection_threshold: 120,
            saturation_threshold: 800,
            saturation_percentage: 30,
        }
    }
}

const CAMERA_EXPOSURE_RANGE: (u32, u32) = (15, 2_000_000);
const LASER_ON_TIME_RANGE: (u32, u32) = (15, 650_000);
const DETECTION_THRESHOLD_RANGE: (u32, u32) = (0, 1_023);
const SATURATION_THRESHOLD_RANGE: (u32, u32) = (0, 1_023);
const SATURATION_PERCENTAGE_RANGE: (u32, u32) = (1, 100);

/// Builder that validates each field as it is set, and the cross-field
/// `min <= def <= max` orderings at [`build`](ConfigBuilder::build) time.
#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder {
    cfg: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self { cfg: Config::default() }
    }
}

fn in_range(name: &str, value: u32, range: (u32, u32)) -> Result<u32> {
    if value < range.0 || value > range.1 {
        return Err(ScanError::InvalidArgument(format!(
            "{name}={value} outside [{}, {}]",
            range.0, range.1
        )));
    }
    Ok(value)
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_offset_us(mut self, value: u32) -> Self {
        self.cfg.scan_offset_us = value;
        self
    }

    pub fn camera_exposure_time_us(mut self, min: u32, def: u32, max: u32) -> Result<Self> {
        in_range("camera_exposure_time_min_us", min, CAMERA_EXPOSURE_RANGE)?;
        in_range("camera_exposure_time_def_us", def, CAMERA_EXPOSURE_RANGE)?;
        in_range("camera_exposure_time_max_us", max, CAMERA_EXPOSURE_RANGE)?;
        self.cfg.camera_exposure_time_min_us = min;
        self.cfg.camera_exposure_time_def_us = def;
        self.cfg.camera_exposure_time_max_us = max;
        Ok(self)
    }

    pub fn laser_on_time_us(mut self, min: u32, def: u32, max: u32) -> Result<Self> {
        // All-zero disables the laser entirely; the ordering check below still
        // holds for (0, 0, 0) so no special case is needed.
        if !(min == 0 && def == 0 && max == 0) {
            in_range("laser_on_time_min_us", min, LASER_ON_TIME_RANGE)?;
            in_range("laser_on_time_def_us", def, LASER_ON_TIME_RANGE)?;
            in_range("laser_on_time_max_us", max, LASER_ON_TIME_RANGE)?;
        }
        self.cfg.laser_on_time_min_us = min;
        self.cfg.laser_on_time_def_us = def;
        self.cfg.laser_on_time_max_us = max;
        Ok(self)
    }

    pub fn laser_detection_threshold(mut self, value: u32) -> Result<Self> {
        in_range("laser_detection_threshold", value, DETECTION_THRESHOLD_RANGE)?;
        self.cfg.laser_detection_threshold = value;
        Ok(self)
    }

    pub fn saturation_threshold(mut self, value: u32) -> Result<Self> {
        in_range("saturation_threshold", value, SATURATION_THRESHOLD_RANGE)?;
        self.cfg.saturation_threshold = value;
        Ok(self)
    }

    pub fn saturation_percentage(mut self, value: u32) -> Result<Self> {
        in_range("saturation_percentage", value, SATURATION_PERCENTAGE_RANGE)?;
        self.cfg.saturation_percentage = value;
        Ok(self)
    }

    /// Validates the `min <= def <= max` orderings and returns the finished config.
    pub fn build(self) -> Result<Config> {
        let c = self.cfg;
        if !(c.camera_exposure_time_min_us <= c.camera_exposure_time_def_us
            && c.camera_exposure_time_def_us <= c.camera_exposure_time_max_us)
        {
            return Err(ScanError::InvalidArgument(
                "camera exposure time min <= def <= max violated".into(),
            ));
        }
        if !(c.laser_on_time_min_us <= c.laser_on_time_def_us
            && c.laser_on_time_def_us <= c.laser_on_time_max_us)
        {
            return Err(ScanError::InvalidArgument(
                "laser on time min <= def <= max violated".into(),
            ));
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ConfigBuilder::new().build().is_ok());
    }

    #[test]
    fn rejects_out_of_range_exposure() {
        let err = ConfigBuilder::new()
            .camera_exposure_time_us(10, 100, 200)
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_misordered_exposure() {
        let err = ConfigBuilder::new()
            .camera_exposure_time_us(1_000, 500, 2_000)
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidArgument(_)));
    }

    #[test]
    fn laser_off_allows_all_zero() {
        let cfg = ConfigBuilder::new()
            .laser_on_time_us(0, 0, 0)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cfg.laser_on_time_max_us, 0);
    }

    #[test]
    fn rejects_saturation_percentage_zero() {
        assert!(ConfigBuilder::new().saturation_percentage(0).is_err());
    }
}
