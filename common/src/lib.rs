pub mod data;
pub mod helpers;
pub mod mapper;
pub mod payloads;
pub mod validation;
