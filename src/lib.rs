pub mod config;
pub mod llm;
pub mod state;
pub mod story;
pub mod utils;
