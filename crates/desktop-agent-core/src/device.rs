//! Device metadata sent to the service on registration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fallback when the host name cannot be read.
pub const DEFAULT_DEVICE_NAME: &str = "My Computer";

/// Device name error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceNameError {
    #[error("Device name cannot be empty")]
    Empty,
}

/// Cosmetic description of this machine.
///
/// Nothing in the lifecycle depends on these values; they are forwarded to
/// the service so the user can tell devices apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Human-readable device name.
    pub name: String,
    /// `macos`, `windows` or `linux`.
    pub platform: String,
    /// OS version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    /// Agent version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

impl DeviceProfile {
    /// Create a profile with an explicit name for the current platform.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: current_platform().to_string(),
            platform_version: None,
            app_version: None,
        }
    }

    /// Profile named after the host.
    #[must_use]
    pub fn detect() -> Self {
        let name = gethostname::gethostname()
            .into_string()
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());
        Self::new(name)
    }

    /// Set the reported agent version.
    #[must_use]
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    /// Set the reported OS version.
    #[must_use]
    pub fn with_platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = Some(version.into());
        self
    }

    /// Rename the device. Surrounding whitespace is trimmed.
    ///
    /// # Errors
    /// Returns [`DeviceNameError::Empty`] if nothing is left after trimming.
    pub fn rename(&mut self, name: &str) -> Result<(), DeviceNameError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DeviceNameError::Empty);
        }
        self.name = trimmed.to_string();
        Ok(())
    }
}

/// Platform string understood by the service.
#[must_use]
pub const fn current_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "linux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_trims() {
        let mut profile = DeviceProfile::new("old");
        profile.rename("  Work Laptop ").unwrap();
        assert_eq!(profile.name, "Work Laptop");
    }

    #[test]
    fn test_rename_rejects_blank() {
        let mut profile = DeviceProfile::new("old");
        assert_eq!(profile.rename("   "), Err(DeviceNameError::Empty));
        assert_eq!(profile.name, "old");
    }

    #[test]
    fn test_detect_never_empty() {
        assert!(!DeviceProfile::detect().name.is_empty());
    }
}
