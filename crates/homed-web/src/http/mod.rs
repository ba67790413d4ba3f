//! Raw-bytes HTTP/1.1: request parsing and response writing.

pub mod request;
pub mod response;

pub use request::Request;
