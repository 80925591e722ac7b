pub mod config;
pub mod dialogue;
pub mod dispatch;
pub mod errors;
pub mod eval;
pub mod experiment;
pub mod generation;
pub mod logging;
pub mod prompt;
pub mod responder;
pub mod text;
