mod download;
mod settings;
mod system;

pub use download::*;
pub use settings::*;
pub use system::*;
