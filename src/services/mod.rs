pub mod command_source;
pub mod commands;
pub mod installer;
pub mod marker;
pub mod release;
pub mod state_store;
