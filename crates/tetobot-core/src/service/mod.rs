pub mod http;

pub use self::http::{create_router, serve, AppState};
