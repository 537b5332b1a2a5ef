/// Interfaces Layer - External Entry Points
///
/// ## Modules
/// - `cli`: command-line driver (config, logging, stdin JSON-line loop)

pub mod cli;
