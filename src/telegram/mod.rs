pub mod bot;
pub mod classify;
pub mod transport;
pub mod update;
