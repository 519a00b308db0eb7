pub mod backend;
pub mod directory;

pub use backend::*;
pub use directory::*;
