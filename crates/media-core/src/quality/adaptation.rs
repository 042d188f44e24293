use tracing::{debug, info};

use crate::profile::VideoProfile;
use crate::quality::estimation::QualityLevel;

/// Configuration for quality adaptation
#[derive(Debug, Clone)]
pub struct AdaptationConfig {
    /// Whether level changes should change the capture profile
    pub enabled: bool,
    /// Profile used for `Poor`
    pub poor_profile: VideoProfile,
    /// Profile used for `Good`
    pub good_profile: VideoProfile,
    /// Profile used for `Excellent`
    pub excellent_profile: VideoProfile,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poor_profile: VideoProfile::Low,
            good_profile: VideoProfile::Medium,
            excellent_profile: VideoProfile::High,
        }
    }
}

/// Adaptation action to take in response to a quality change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationAction {
    /// Re-configure the camera for a new profile
    ApplyProfile {
        from: VideoProfile,
        to: VideoProfile,
    },
}

/// Maps quality levels to capture profiles
#[derive(Debug, Clone)]
pub struct QualityAdapter {
    config: AdaptationConfig,
    current: VideoProfile,
}

impl QualityAdapter {
    pub fn new(initial: VideoProfile, config: AdaptationConfig) -> Self {
        Self { config, current: initial }
    }

    /// Profile wanted for `level`; `None` keeps the current one
    pub fn target_profile(&self, level: QualityLevel) -> Option<VideoProfile> {
        match level {
            QualityLevel::Poor => Some(self.config.poor_profile),
            QualityLevel::Good => Some(self.config.good_profile),
            QualityLevel::Excellent => Some(self.config.excellent_profile),
            QualityLevel::Disconnected => None,
        }
    }

    /// Decide whether `level` calls for a profile change
    pub fn adapt(&mut self, level: QualityLevel) -> Option<AdaptationAction> {
        if !self.config.enabled {
            debug!("Quality adaptation disabled, ignoring {} level", level);
            return None;
        }

        let target = self.target_profile(level)?;
        if target == self.current {
            return None;
        }

        info!("Quality {} -> switching video profile {} -> {}", level, self.current, target);
        let action = AdaptationAction::ApplyProfile { from: self.current, to: target };
        self.current = target;
        Some(action)
    }

    pub fn current_profile(&self) -> VideoProfile {
        self.current
    }

    /// Record a profile applied outside of adaptation
    pub fn set_current_profile(&mut self, profile: VideoProfile) {
        self.current = profile;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}
