mod caching;
mod logging;
mod performance;
mod retry;
mod transaction;
mod validation;

pub use caching::*;
pub use logging::*;
pub use performance::*;
pub use retry::*;
pub use transaction::*;
pub use validation::*;
