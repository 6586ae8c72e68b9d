pub mod errors;
pub mod message;

pub use errors::Result;
pub use message::MessageKind;
