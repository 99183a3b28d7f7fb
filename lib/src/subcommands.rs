pub use client::*;
pub use doctor::*;
pub use server::*;
pub use train::*;

pub mod client;
pub mod doctor;
pub mod server;
pub mod train;
