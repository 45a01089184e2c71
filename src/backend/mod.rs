pub mod factory;
pub mod session;

pub use factory::{Credentials, SessionFactory};
pub use session::{Session, SessionSettings};
