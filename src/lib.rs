pub mod agent;
pub mod attachments;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod project;
pub mod routes;
pub mod service;
pub mod stream;
pub mod transcript;
