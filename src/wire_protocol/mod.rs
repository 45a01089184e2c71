pub mod frame;
pub mod login;

pub use frame::{TERMINATOR, encode_frame, split_frame, strip_terminator};
pub use login::{LOGIN_ACK, LoginCommand, PROTOCOL_VERSION};
