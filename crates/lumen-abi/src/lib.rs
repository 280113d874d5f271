//! Lumen ABI crate: contracts shared by the session engine, the host app and backend plugins.

pub mod backend;
pub mod cache;
pub mod ffi;
pub mod metadata;
pub mod sampling;
pub mod token;

pub use backend::*;
pub use cache::*;
pub use metadata::*;
pub use sampling::*;
pub use token::*;
