//! HTTP surface: health, ladder, replays and the WebSocket upgrade

pub mod routes;

pub use routes::build_router;
