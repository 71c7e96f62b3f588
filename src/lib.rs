/// Psamathe Library
///
/// Motion stack for a two-axis (rotation + in/out) kinetic sand table

pub mod error;
pub mod kinematics;
pub mod wire;
pub mod arduino_connection;
pub mod session;
pub mod position_store;
pub mod machine_state_logger;
pub mod controller;
pub mod pattern;
pub mod calibration;
pub mod config_loader;
