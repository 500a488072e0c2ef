pub mod codec;
pub mod connection;
