//! Console output: progress reporter, tables and the confirmation prompt.

pub mod prompt;
pub mod reporter;
pub mod table;

pub use prompt::PromptConfirm;
pub use reporter::ConsoleReporter;
