//! Handlers 模块

pub mod points;
pub mod resources;
pub mod rules;
pub mod system;

pub use points::*;
pub use resources::*;
pub use rules::*;
pub use system::*;
