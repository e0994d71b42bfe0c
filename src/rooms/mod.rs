mod history;
mod naming;
mod session;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub use naming::{Identity, RoomId};
pub use session::{Session, SessionState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::relay_ws))
        .route("/history/{u1}/{u2}", get(history::history))
}
