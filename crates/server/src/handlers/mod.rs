//! HTTP request handlers.

pub mod capabilities;
pub mod objects;
pub mod uploads;

pub use capabilities::*;
pub use objects::*;
pub use uploads::*;
