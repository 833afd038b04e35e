mod render;
mod serve;

pub use render::{run_fetch, run_render};
pub use serve::run_serve;
