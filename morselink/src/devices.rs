/// Capability traits the components are written against. Each trait
/// is the boundary to a collaborator that is not reimplemented here.
pub mod traits;
/// Devices are the atomic units that can be combined together
/// into components. Their core responsibilities do not change
/// based on location, name etc.
pub mod hardware {
    /// Light sensor and push button exposed through sysfs.
    pub mod sensor;
    /// PWM buzzer exposed through sysfs.
    pub mod signal;
    /// Still image camera.
    pub mod camera;
    /// QR pattern decoder backed by an external program.
    pub mod decoder;
}

/// Devices implemented purely in software on top of hardware devices.
pub mod software {
    /// Morse encoder driving a signal device.
    pub mod morse;
}

/// In-memory devices used by the test suites.
#[cfg(test)]
pub mod mock;
