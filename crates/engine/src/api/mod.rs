mod alerts;
mod health;
mod metrics;
mod server;

pub use server::{router, serve, ApiState};
