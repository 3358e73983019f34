pub mod analytics;
pub mod core;
pub mod registry;
pub mod responses;
pub mod sessions;
pub mod sweep;
pub mod templates;
