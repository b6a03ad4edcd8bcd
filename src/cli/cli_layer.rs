// The cli module is the command line adapter.
// It parses arguments, wires the Google clients into the core service and
// prints results. No business logic lives here.

#[path = "commands.rs"]
pub mod commands;

pub use commands::Cli;
