mod runner;
mod tokenize;

pub use runner::{substitute, CommandError, CommandRunner};
pub use tokenize::{tokenize, TokenizeError};
