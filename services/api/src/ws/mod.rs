//! WebSocket surfaces: the browser call protocol, the carrier
//! media-stream bridge, and the shared provider session underneath.

pub mod protocol;
pub mod provider;
pub mod session;
pub mod telephony;

pub use session::call_ws_handler;
pub use telephony::telephony_ws_handler;
