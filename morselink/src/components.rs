/// Components that run on the embedded field unit.
pub mod field {
    /// The primary control loop driven by light and button sensors.
    pub mod orchestrator;
    /// The side channel opened on a button press to receive text.
    pub mod secondary;
}
/// Components that run on the remote station.
pub mod station {
    /// The peer side of the primary control loop.
    pub mod orchestrator;
    /// Pattern decoding and text relay back to the field unit.
    pub mod relay;
    /// Operator presentation and directives.
    pub mod operator;
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::field::orchestrator::*;
    pub use crate::components::field::secondary::*;
    pub use crate::components::station::operator::*;
    pub use crate::components::station::orchestrator::*;
    pub use crate::components::station::relay::*;
}
