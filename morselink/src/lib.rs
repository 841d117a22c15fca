/**
The morselink control system coordinates two separate units over a plain TCP link.
The field unit owns the camera, the light and button sensors and a buzzer; the station
watches the images it streams, reads QR patterns out of them, and relays the text back
so the field unit can play it as Morse code. Both ends keep the same split used across
the system: devices are atomic units, components compose devices into a control loop,
and messages describe what travels over the wire.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for the overall control system.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Error taxonomy shared by the devices, messages and components.
pub mod errors;
/// Message structure for communication between the field unit
/// and the station, along with the session that carries it.
pub mod messages;
/// Development utilities for logging and test fixtures.
pub mod utils;
