pub mod diagnostics;
pub mod error;
pub mod ids;
pub mod logging;

pub use error::{Error, Result};
