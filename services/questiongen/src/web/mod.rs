pub mod rest;
pub mod state;

// Re-export the handlers so the binary can build the router from one place.
pub use rest::{create_generation_handler, get_generation_handler, list_presets_handler};
