//! Turnstile - HTTP Request Admission Service
//!
//! This crate implements an in-process rate limiter: a sharded
//! collection of per-identity token buckets with a background janitor
//! that evicts idle identities, fronted by an HTTP middleware that
//! answers 429 with standard rate-limit headers.

pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
