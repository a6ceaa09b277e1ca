mod parser;
mod runner;

pub use parser::Plan;
pub use runner::{fit_blocking, Runner};
