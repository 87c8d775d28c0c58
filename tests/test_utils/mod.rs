mod data;
mod setup;

pub use data::*;
pub use setup::*;
