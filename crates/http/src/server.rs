use bytes::BytesMut;
use http::{Response, StatusCode, Version, header};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::TcpListener;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::codec;
use crate::protocol::{Request, ResponseBody};
use crate::upload::parse_multipart;

/// Default cap on a buffered multipart body.
pub const DEFAULT_MULTIPART_MAX_SIZE: u64 = 32 * 1024 * 1024;

/// The per-request dispatch callback the transport drives.
///
/// Dispatch is synchronous: the envelope is fully materialized before the
/// call and the returned response is fully materialized after it.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, request: Request) -> Response<ResponseBody>;
}

impl<F> Dispatch for F
where
    F: Fn(Request) -> Response<ResponseBody> + Send + Sync + 'static,
{
    fn dispatch(&self, request: Request) -> Response<ResponseBody> {
        (self)(request)
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid listen address")]
    InvalidAddress,
}

pub struct ServerBuilder {
    address: Option<Vec<SocketAddr>>,
    multipart_max_size: u64,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { address: None, multipart_max_size: DEFAULT_MULTIPART_MAX_SIZE }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = address.to_socket_addrs().ok().map(|addrs| addrs.collect());
        self
    }

    pub fn multipart_max_size(mut self, max: u64) -> Self {
        self.multipart_max_size = max;
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        if address.is_empty() {
            return Err(ServerBuildError::InvalidAddress);
        }
        Ok(Server { address, multipart_max_size: self.multipart_max_size })
    }
}

/// The development HTTP/1.1 server.
///
/// One task per connection, requests handled in arrival order on that
/// connection, keep-alive honored for HTTP/1.1 peers.
pub struct Server {
    address: Vec<SocketAddr>,
    multipart_max_size: u64,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("address", &self.address).finish()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub async fn start<D: Dispatch>(self, dispatch: D) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            warn!("global tracing subscriber was already installed");
        }

        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        let dispatch = Arc::new(dispatch);
        let max_multipart = self.multipart_max_size;
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let dispatch = Arc::clone(&dispatch);

            tokio::spawn(async move {
                if let Err(e) = serve_connection(tcp_stream, remote_addr, dispatch, max_multipart).await {
                    error!(cause = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn serve_connection<D: Dispatch>(
    mut stream: TcpStream,
    remote_addr: SocketAddr,
    dispatch: Arc<D>,
    max_multipart: u64,
) -> std::io::Result<()> {
    let mut read_buf = BytesMut::with_capacity(8 * 1024);
    let mut write_buf = BytesMut::with_capacity(8 * 1024);

    loop {
        let request = loop {
            match codec::decode_request(&mut read_buf) {
                Ok(Some(request)) => break request.with_remote_addr(remote_addr),
                Ok(None) => {
                    let n = stream.read_buf(&mut read_buf).await?;
                    if n == 0 {
                        // peer closed between requests
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(cause = %e, "malformed request");
                    let response = codec::error_response(StatusCode::BAD_REQUEST);
                    write_buf.clear();
                    codec::encode_response(&response, &mut write_buf);
                    stream.write_all(&write_buf).await?;
                    return Ok(());
                }
            }
        };

        let keep_alive = wants_keep_alive(&request);

        let request = match decode_multipart(request, max_multipart).await {
            Ok(request) => request,
            Err(response) => {
                write_buf.clear();
                codec::encode_response(&response, &mut write_buf);
                stream.write_all(&write_buf).await?;
                continue;
            }
        };

        let response = dispatch.dispatch(request);

        write_buf.clear();
        codec::encode_response(&response, &mut write_buf);
        stream.write_all(&write_buf).await?;

        if !keep_alive {
            return Ok(());
        }
    }
}

async fn decode_multipart(request: Request, max_size: u64) -> Result<Request, Response<ResponseBody>> {
    if !request.is_multipart() {
        return Ok(request);
    }
    let content_type = request.header(header::CONTENT_TYPE).unwrap_or_default().to_string();
    match parse_multipart(&content_type, request.body().clone(), max_size).await {
        Ok(payload) => Ok(request.with_form(payload)),
        Err(e) => {
            warn!(cause = %e, "multipart decode failed");
            Err(codec::error_response(StatusCode::PAYLOAD_TOO_LARGE))
        }
    }
}

fn wants_keep_alive(request: &Request) -> bool {
    let connection = request.header(header::CONNECTION).unwrap_or_default();
    match request.version() {
        Version::HTTP_11 => !connection.eq_ignore_ascii_case("close"),
        Version::HTTP_10 => connection.eq_ignore_ascii_case("keep-alive"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(version: Version, connection: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/").version(version);
        if let Some(value) = connection {
            builder = builder.header(header::CONNECTION, value);
        }
        Request::new(builder.body(()).unwrap(), Bytes::new())
    }

    #[test]
    fn keep_alive_defaults() {
        assert!(wants_keep_alive(&request(Version::HTTP_11, None)));
        assert!(!wants_keep_alive(&request(Version::HTTP_11, Some("close"))));
        assert!(!wants_keep_alive(&request(Version::HTTP_10, None)));
        assert!(wants_keep_alive(&request(Version::HTTP_10, Some("keep-alive"))));
    }

    #[test]
    fn builder_requires_address() {
        assert!(matches!(Server::builder().build(), Err(ServerBuildError::MissingAddress)));
        assert!(Server::builder().address("127.0.0.1:0").build().is_ok());
    }

    #[tokio::test]
    async fn non_multipart_passes_through() {
        let req = request(Version::HTTP_11, None);
        let req = decode_multipart(req, 1024).await.unwrap();
        assert!(req.form().is_none());
    }
}
