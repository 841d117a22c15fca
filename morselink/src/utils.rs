/// Logging set up for the system binaries.
pub mod logging;
/// Macros for locating test fixtures.
pub mod tests;
/// Reading and writing yaml configuration files.
pub mod yaml;
