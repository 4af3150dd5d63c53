pub mod helper;
pub mod id;
pub mod reason;
pub mod transport;
pub mod types;
