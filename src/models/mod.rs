mod usage;
mod window;

pub use usage::*;
pub use window::*;
