//! Shared data models for the bridge

mod request;
mod response;
mod value;

pub use request::*;
pub use response::*;
pub use value::*;
