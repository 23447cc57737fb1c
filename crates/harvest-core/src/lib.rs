pub mod backup;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod logger;
pub mod mount;
pub mod orchestrator;
pub mod pipeline;
pub mod remote;
pub mod rotation;

#[cfg(test)]
mod testing;
