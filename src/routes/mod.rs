#[allow(clippy::module_inception)]
pub mod routes;

pub use self::routes::app;
