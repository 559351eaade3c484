mod body;
mod error;
mod request;

pub use body::ResponseBody;
pub use error::ParseError;
pub use request::Request;
