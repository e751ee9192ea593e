//! UDP front end driving the middleware chain.
//!
//! One datagram, one task: each inbound packet is parsed, run through the
//! handler chain with a buffered writer, and answered either with the reply a
//! handler produced or with REFUSED when every handler delegated.

use hickory_proto::op::{Message, MessageType, ResponseCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{BufferedWriter, Chain, Handler};
use crate::error::Error;
use crate::metrics::{self, QueryOutcome, Timer};

/// Maximum UDP payload we accept.
const MAX_DATAGRAM: usize = 4096;

/// DNS server answering queries through a fixed handler chain.
pub struct DnsServer {
    socket: Arc<UdpSocket>,
    handlers: Arc<Vec<Arc<dyn Handler>>>,
}

impl DnsServer {
    /// Bind the UDP socket and prepare the handler chain.
    pub async fn bind(addr: SocketAddr, handlers: Vec<Arc<dyn Handler>>) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "DNS UDP listening");

        Ok(Self {
            socket: Arc::new(socket),
            handlers: Arc::new(handlers),
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve queries until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("DNS server shutdown requested");
                    return Ok(());
                }
                result = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match result {
                        Ok(received) => received,
                        Err(err) => {
                            warn!(%err, "UDP receive error");
                            continue;
                        }
                    };

                    let packet = buf[..len].to_vec();
                    let socket = self.socket.clone();
                    let handlers = self.handlers.clone();
                    tokio::spawn(async move {
                        handle_packet(socket, handlers, packet, src).await;
                    });
                }
            }
        }
    }
}

async fn handle_packet(
    socket: Arc<UdpSocket>,
    handlers: Arc<Vec<Arc<dyn Handler>>>,
    packet: Vec<u8>,
    src: SocketAddr,
) {
    let request = match Message::from_vec(&packet) {
        Ok(message) => message,
        Err(err) => {
            debug!(%src, %err, "dropping malformed query");
            return;
        }
    };

    let timer = Timer::start();
    let mut writer = BufferedWriter::new();
    {
        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;
    }

    let reply = match writer.take_reply() {
        Some(reply) => reply,
        None => {
            let qtype = request
                .queries()
                .first()
                .map(|q| format!("{:?}", q.query_type()))
                .unwrap_or_else(|| "NONE".to_string());
            metrics::record_query(&qtype, QueryOutcome::Refused, timer.elapsed());
            refused_reply(&request)
        }
    };

    match reply.to_vec() {
        Ok(bytes) => {
            if let Err(err) = socket.send_to(&bytes, src).await {
                warn!(%src, %err, "failed to send reply");
            }
        }
        Err(err) => warn!(%src, %err, "failed to encode reply"),
    }
}

/// Reply sent when no handler intercepted the query.
fn refused_reply(request: &Message) -> Message {
    let mut msg = Message::new();
    msg.set_id(request.id());
    msg.set_message_type(MessageType::Response);
    msg.set_op_code(request.op_code());
    msg.set_recursion_desired(request.recursion_desired());
    msg.set_response_code(ResponseCode::Refused);
    if let Some(query) = request.queries().first() {
        msg.add_query(query.clone());
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};

    #[test]
    fn test_refused_reply_echoes_query() {
        let mut request = Message::new();
        request.set_id(99);
        request.add_query(Query::query(
            Name::from_ascii("nobody.test.").unwrap(),
            RecordType::A,
        ));

        let reply = refused_reply(&request);
        assert_eq!(reply.id(), 99);
        assert_eq!(reply.response_code(), ResponseCode::Refused);
        assert_eq!(reply.queries().len(), 1);
        assert!(reply.answers().is_empty());
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let server = DnsServer::bind("127.0.0.1:0".parse().unwrap(), Vec::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
