pub mod cli;
pub mod load_config;
pub mod misskey;
pub mod telegram;

pub use cli::{run, Cli, Commands};
