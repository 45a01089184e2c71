pub mod session_id;
pub mod session_state;

pub use session_id::SessionId;
pub use session_state::SessionState;
