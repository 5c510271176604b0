use crate::audio::capture;

/// Answers whether the microphone may be used
///
/// Granting access is someone else's job; the recorder only asks.
pub trait Permissions: Send + Sync {
    fn microphone_granted(&self) -> bool;
}

/// Desktop stand-in for a permission prompt: access is granted when recording
/// is enabled in config and the host has an input device.
pub struct DevicePermissions {
    enabled: bool,
}

impl DevicePermissions {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Permissions for DevicePermissions {
    fn microphone_granted(&self) -> bool {
        if !self.enabled {
            tracing::debug!("Microphone disabled in config");
            return false;
        }
        capture::input_device_available()
    }
}

/// Fixed answer, for tests
#[cfg(test)]
pub struct StaticPermissions(pub bool);

#[cfg(test)]
impl Permissions for StaticPermissions {
    fn microphone_granted(&self) -> bool {
        self.0
    }
}
