pub mod entities;
pub mod register;
pub mod repositories;

pub use entities::*;
pub use register::*;
pub use repositories::*;

pub use delayq_errors::{DispatcherError, DispatcherResult};
