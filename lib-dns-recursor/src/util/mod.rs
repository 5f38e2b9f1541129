pub mod net;
pub mod nameserver;
pub mod types;
