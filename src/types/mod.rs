//! Type definitions

pub mod frames;
pub mod geo;
pub mod request;
pub mod session;
pub mod stop;

pub use frames::*;
pub use geo::*;
pub use request::*;
pub use session::*;
pub use stop::*;
