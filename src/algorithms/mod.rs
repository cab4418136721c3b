//! User algorithms built against the vertex compute contract.

pub mod triangle_closing;
pub mod verify_message;

pub use self::triangle_closing::TriangleClosing;
pub use self::verify_message::{VerifiableMessage, VerifyMessage};
