//! Chain handler answering A queries for cached guest names.

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

use crate::cache::VmCache;
use crate::chain::{Chain, Handler};
use crate::metrics::{self, QueryOutcome, Timer};

/// TTL for synthesized guest answers. Short, since the refresher may observe
/// a new address on any poll.
const CACHE_TTL: u32 = 60;

/// Read-side view onto the guest cache, plugged into the chain.
pub struct PveResolver {
    cache: VmCache,
}

impl PveResolver {
    /// Create a resolver over the given cache handle.
    pub fn new(cache: VmCache) -> Self {
        Self { cache }
    }

    fn cached_reply(request: &Message, addr: Ipv4Addr) -> Message {
        let mut msg = Message::new();
        msg.set_id(request.id());
        msg.set_message_type(MessageType::Response);
        msg.set_op_code(request.op_code());
        msg.set_recursion_desired(request.recursion_desired());
        msg.set_authoritative(false);

        if let Some(query) = request.queries().first() {
            msg.add_query(query.clone());
            let mut record =
                Record::from_rdata(query.name().clone(), CACHE_TTL, RData::A(A::from(addr)));
            record.set_dns_class(DNSClass::IN);
            msg.add_answer(record);
        }

        msg
    }
}

#[async_trait]
impl Handler for PveResolver {
    fn name(&self) -> &'static str {
        "pveresolver"
    }

    async fn handle(&self, chain: &mut Chain<'_>) {
        let Some(query) = chain.request.queries().first() else {
            chain.next().await;
            return;
        };

        if query.query_type() != RecordType::A {
            chain.next().await;
            return;
        }

        let qname = query.name().to_string();
        let Some(addr) = self.cache.get(&qname) else {
            chain.next().await;
            return;
        };

        let timer = Timer::start();
        let reply = Self::cached_reply(chain.request, addr);
        if let Err(err) = chain.writer.write_msg(reply) {
            warn!(name = %qname, %err, "failed to write cached reply");
        }
        debug!(name = %qname, %addr, "answered from guest cache");
        metrics::record_query("A", QueryOutcome::Cached, timer.elapsed());

        chain.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BufferedWriter;
    use hickory_proto::op::Query;
    use hickory_proto::rr::Name;
    use std::sync::Arc;

    fn query_message(name: &str, qtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(7);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), qtype));
        msg
    }

    fn handler_with(cache: VmCache) -> Vec<Arc<dyn Handler>> {
        vec![Arc::new(PveResolver::new(cache))]
    }

    #[tokio::test]
    async fn test_cache_hit_answers_and_terminates() {
        let cache = VmCache::new();
        cache.update("vm1.local", "10.0.0.5".parse().unwrap());

        let handlers = handler_with(cache);
        let request = query_message("vm1.local.", RecordType::A);
        let mut writer = BufferedWriter::new();

        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;
        assert!(chain.is_cancelled());

        let reply = writer.reply().unwrap();
        assert_eq!(reply.id(), 7);
        assert!(!reply.authoritative());
        assert_eq!(reply.answers().len(), 1);
        let answer = &reply.answers()[0];
        assert_eq!(answer.ttl(), CACHE_TTL);
        assert_eq!(
            answer.data().and_then(RData::as_a),
            Some(&A::from("10.0.0.5".parse::<Ipv4Addr>().unwrap()))
        );
    }

    #[tokio::test]
    async fn test_miss_delegates() {
        let handlers = handler_with(VmCache::new());
        let request = query_message("unknown.local.", RecordType::A);
        let mut writer = BufferedWriter::new();

        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;

        assert!(!chain.is_cancelled());
        assert!(writer.reply().is_none());
    }

    #[tokio::test]
    async fn test_non_a_query_delegates_despite_entry() {
        let cache = VmCache::new();
        cache.update("vm1.local", "10.0.0.5".parse().unwrap());

        let handlers = handler_with(cache);
        let request = query_message("vm1.local.", RecordType::TXT);
        let mut writer = BufferedWriter::new();

        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;

        assert!(!chain.is_cancelled());
        assert!(writer.reply().is_none());
    }

    #[tokio::test]
    async fn test_degraded_cache_delegates_despite_entry() {
        let cache = VmCache::new();
        cache.update("vm1.local", "10.0.0.5".parse().unwrap());
        cache.mark_degraded();

        let handlers = handler_with(cache);
        let request = query_message("vm1.local.", RecordType::A);
        let mut writer = BufferedWriter::new();

        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;

        assert!(!chain.is_cancelled());
        assert!(writer.reply().is_none());
    }
}
