//! Model Mirror CLI - export and import model archives against a local state directory.

pub mod commands;
pub mod output;
pub mod state;
