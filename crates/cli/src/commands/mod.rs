pub mod analyze;
pub mod config;
pub mod inspect;
pub mod program;
pub mod project;
pub mod util;

pub use analyze::*;
pub use config::*;
pub use inspect::*;
pub use program::*;
pub use project::*;
pub use util::*;
