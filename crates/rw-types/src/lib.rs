pub mod config;
pub mod constants;
pub mod errors;
pub mod float_serde;
pub mod trial;

pub use config::*;
pub use errors::*;
pub use trial::*;
