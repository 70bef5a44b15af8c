// ABOUTME: Library crate for Cloudbox exposing the sandbox runtime API for testing and embedding

pub mod auth;
pub mod bridge;
pub mod config;
pub mod events;
pub mod git;
pub mod runner;
pub mod session;
