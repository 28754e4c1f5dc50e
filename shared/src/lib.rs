pub mod admin;
pub mod http;
pub mod wire;
