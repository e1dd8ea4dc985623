pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod rendezvous;
pub mod responses;
pub mod routes;
pub mod sandbox;
pub mod state;
pub mod store;
pub mod streaming;
pub mod webhooks;

pub use state::AppState;
