//! HTTP surface: admission middleware and server wiring.

pub mod middleware;
mod server;

pub use server::{router, HttpServer};
