//! Mirrorgate server: HTTP JSON-RPC facade, rate limiting, configuration,
//! and process wiring.

pub mod config;
pub mod limit;
pub mod startup;
pub mod web;
