pub mod ops;
pub mod utils;

pub use ops::*;
pub use utils::*;

pub use sprig_tensor::{device, fdtype, set_global_threadpool};
