pub mod network;
pub mod serial;
