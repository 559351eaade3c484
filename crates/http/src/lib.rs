//! Transport boundary for the tiller MVC framework.
//!
//! This crate owns everything the dispatch core treats as "the wire": the
//! request envelope handed to the application, the response body type, the
//! dispatch callback contract, multipart decoding, and a compact HTTP/1.1
//! development server built on tokio.
//!
//! The server here is a dev harness: request line + headers + content-length
//! bodies, keep-alive connections, nothing more. Production deployments are
//! expected to sit behind a real front end and adapt it to [`Dispatch`].

pub mod codec;
pub mod protocol;
pub mod upload;

mod server;

pub use protocol::{ParseError, Request, ResponseBody};
pub use server::{Dispatch, Server, ServerBuildError, ServerBuilder};
pub use upload::{FormPayload, UploadedFile};
