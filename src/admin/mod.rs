pub mod handler;
pub mod keyboards;
pub mod session;
