// MoveMapGen - Shared Library
// Logging and tool configuration used by the navigation mesh generator

pub mod config;
pub mod log;
