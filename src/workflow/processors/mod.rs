pub mod analysis;
pub mod artifacts;
pub mod classify;
pub mod setup;
pub mod upload;
