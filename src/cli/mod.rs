mod args;
pub mod render;
mod run;

pub use args::{Args, Command};
pub use run::{replay, run};
