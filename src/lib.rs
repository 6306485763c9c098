// Guild access verification
pub mod access;

// HTTP APIs
pub mod api;

// Configuration and secrets
pub mod config;

// Encrypted OAuth token storage
pub mod credentials;

// Discord REST and OAuth clients
pub mod discord;

// Per-client request throttling
pub mod rate_limit;
