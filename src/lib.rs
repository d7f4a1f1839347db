// Settings HTTP API
pub mod api;

// Injectable time source
pub mod clock;

// TOML configuration and env overrides
pub mod config;

// Encrypted per-tenant credentials and their cache
pub mod credentials;

// CRM calls: credential, mapping, transform, gateway
pub mod integration;

// Semantic field name ↔ provider field key mapping
pub mod mapping;

// Pipedrive REST adapter
pub mod pipedrive;

// Known external providers
pub mod provider;

// Record shape conversion
pub mod transform;
