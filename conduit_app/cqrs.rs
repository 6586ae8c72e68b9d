mod context;
mod notification;
mod request;

pub use context::*;
pub use notification::*;
pub use request::*;

pub(crate) use context::short_type_name;
