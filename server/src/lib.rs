pub mod backends;
pub mod config;
pub mod error;
pub mod params;
pub mod payloads;
pub mod relay;
pub mod retry;
pub mod routes;
pub mod state;
pub mod submission;
pub mod upload;
