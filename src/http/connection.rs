use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::http::parser::{ParseError, expects_continue, parse_http_request};
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::{BodyOutcome, ResponseWriter};
use crate::proxy::handler::ProxyHandler;

const READ_CHUNK: usize = 8192;

pub struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
    state: ConnectionState,
    handler: Arc<ProxyHandler>,
    continue_sent: bool,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    /// Response, keep-alive requested, client speaks HTTP/1.1
    Writing(Response, bool, bool),
    Closed,
}

/// Result of reading one request off the wire.
pub enum Inbound {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl Connection {
    pub fn new(stream: TcpStream, handler: Arc<ProxyHandler>) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            handler,
            continue_sent: false,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            self.state = match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => match self.read_request().await? {
                    Inbound::Request(req) => ConnectionState::Processing(req),
                    Inbound::Malformed(e) => {
                        tracing::warn!(error = %e, "Rejecting malformed request");
                        ConnectionState::Writing(Response::bad_request(), false, true)
                    }
                    Inbound::Eof => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();
                    let http11 = req.version != "HTTP/1.0";
                    let response = self.handler.handle(req).await;
                    ConnectionState::Writing(response, keep_alive, http11)
                }

                ConnectionState::Writing(response, keep_alive, http11) => {
                    let writer = ResponseWriter::new(response, keep_alive, http11);
                    let keep_alive = writer.keep_alive();
                    let outcome = writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive && outcome == BodyOutcome::Complete {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    pub async fn read_request(&mut self) -> anyhow::Result<Inbound> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    self.continue_sent = false;
                    return Ok(Inbound::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    if !self.continue_sent && expects_continue(&self.buffer) {
                        let interim = ResponseBuilder::new(StatusCode::CONTINUE).build();
                        ResponseWriter::new(interim, true, true)
                            .write_to_stream(&mut self.stream)
                            .await?;
                        self.continue_sent = true;
                    }
                }

                Err(e) => return Ok(Inbound::Malformed(e)),
            }

            let mut temp = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                if !self.buffer.is_empty() {
                    tracing::debug!(buffered = self.buffer.len(), "Client closed mid-request");
                }
                return Ok(Inbound::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}
