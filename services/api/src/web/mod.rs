pub mod generation_task;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the main handlers to make them easily accessible
// to the binary that will build the web server router.
pub use middleware::resolve_identity;
pub use rest::{generate_quiz_handler, quota_handler};
pub use ws_handler::ws_handler;
