pub mod discovery;
pub mod error;
pub mod hex;
pub mod transport;
