pub mod path_processing;
pub mod scheduler;
pub mod text_processing;

pub use path_processing::*;
pub use scheduler::*;
pub use text_processing::*;
