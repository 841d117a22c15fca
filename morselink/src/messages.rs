/// Standardise how messages are sent between the field unit and
/// the station. Provide test suite to ensure interfaces are respected.
pub mod control {
    /// Single character protocol tokens and the control state.
    pub mod token;
    /// Camera resolution descriptors sent after a change request.
    pub mod resolution;
    /// Text relayed over the secondary connection.
    pub mod text;
}

/// Transport plumbing shared by both units.
pub mod link {
    /// Token and length prefixed frame transport over a byte stream.
    pub mod wire;
    /// Session value owning the primary transport and the secondary flow.
    pub mod session;
}
