mod app;
mod chat;
mod middleware;
mod state;

pub use app::create_app;
pub use chat::{ChatServer, ServerStats};
pub use middleware::{is_origin_allowed, matches_pattern, origin_guard};
pub use state::{AppState, Collaborators};
