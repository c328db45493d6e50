//! # aidconnect-shared
//!
//! Types shared by the AidConnect store and server: identifiers, the closed
//! enumerations of the domain, and the validated message content union.

pub mod constants;
pub mod content;
pub mod error;
pub mod protocol;
pub mod types;

pub use content::MessageContent;
pub use error::ValidationError;
