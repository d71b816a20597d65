//! HTTP surface of a vault session
//!
//! Wallet, vault, verification and marketplace routes all share one
//! [`AppState`] wrapping the [`Session`](crate::session::Session).

mod handlers;
pub mod models;
mod routes;

pub use models::{AssetInfo, WalletResponse};
pub use routes::{AppState, create_router};
