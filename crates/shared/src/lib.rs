pub mod domain;
pub mod error;
pub mod phase;
pub mod protocol;
