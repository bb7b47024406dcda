//! Data models shared by the gateway, the credential store and the HTTP layer.
//!
//! Everything here serializes as camelCase JSON because the browser UI
//! consumes these shapes directly.

pub mod bucket;
pub mod connection;
pub mod multipart;
pub mod object;
