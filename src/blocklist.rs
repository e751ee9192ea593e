//! Block store: a curated set of blocked names with a whitelist override.
//!
//! Blocked names answer with a null-route address instead of resolving; a
//! whitelisted name can never be blocked. Mutations persist synchronously to a
//! single local file so the set survives restarts.

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, Query};
use hickory_proto::rr::rdata::{A, AAAA, SOA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::chain::{Chain, Handler};
use crate::config::BlocklistConfig;
use crate::error::Error;
use crate::metrics::{self, QueryOutcome, Timer};
use crate::name::canonicalize;

/// First line of the persisted block list file.
pub const FILE_HEADER: &str = "# Generated by pvedns. DO NOT EDIT.";

/// File name of the persisted block list inside the configured directory.
const FILE_NAME: &str = "local";

/// TTL for synthesized null-route answers.
const BLOCK_TTL: u32 = 3600;

const SOA_TTL: u32 = 86400;
const SOA_REFRESH: i32 = 28800;
const SOA_RETRY: i32 = 7200;
const SOA_EXPIRE: i32 = 604800;
const SOA_MINIMUM: u32 = 86400;

#[derive(Debug, Default)]
struct Tables {
    blocked: HashSet<String>,
    whitelisted: HashSet<String>,
}

/// Mutable set of blocked names plus a disjoint whitelist.
///
/// Reads (`get`, `exists`, `len`) take the shared lock; `set` and `remove`
/// hold the exclusive lock across both the table mutation and the file
/// rewrite, so persisted state never interleaves with another table access.
pub struct BlockList {
    inner: RwLock<Tables>,
    nullroute: Option<Ipv4Addr>,
    nullroute_v6: Option<Ipv6Addr>,
    path: PathBuf,
}

impl BlockList {
    /// Create an empty block list from configuration.
    ///
    /// The whitelist is fixed here for the process lifetime. Null-route
    /// addresses are parsed once; unparsable values are logged and leave the
    /// corresponding answer section empty for blocked queries.
    pub fn new(config: &BlocklistConfig) -> Self {
        let nullroute = match config.nullroute.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(value = %config.nullroute, "unparsable nullroute address");
                None
            }
        };
        let nullroute_v6 = match config.nullroute_v6.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(value = %config.nullroute_v6, "unparsable nullroute_v6 address");
                None
            }
        };

        let mut tables = Tables::default();
        for name in &config.whitelist {
            tables.whitelisted.insert(canonicalize(name));
        }

        Self {
            inner: RwLock::new(tables),
            nullroute,
            nullroute_v6,
            path: config.dir.join(FILE_NAME),
        }
    }

    /// Bulk-insert blocked names without persisting.
    ///
    /// Startup hook for external list loaders; whitelisted names are skipped.
    pub fn preload<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write();
        for name in names {
            let key = canonicalize(name.as_ref());
            if !inner.whitelisted.contains(&key) {
                inner.blocked.insert(key);
            }
        }
        debug!(blocked = inner.blocked.len(), "preloaded block list");
    }

    /// Load previously persisted names from the storage file.
    ///
    /// Comment and empty lines are skipped; nothing is written back. Returns
    /// the number of blocked names after loading.
    pub fn load_persisted(&self) -> Result<usize, Error> {
        let contents = std::fs::read_to_string(&self.path)?;
        self.preload(
            contents
                .lines()
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        );
        Ok(self.len())
    }

    /// Look up a name in the block table.
    ///
    /// Returns `Error::NotFound` when the name is absent.
    pub fn get(&self, name: &str) -> Result<bool, Error> {
        let key = canonicalize(name);
        let inner = self.inner.read();
        if inner.blocked.contains(&key) {
            Ok(true)
        } else {
            Err(Error::NotFound)
        }
    }

    /// Block a name. Returns false without changing anything when the name is
    /// whitelisted; otherwise inserts and persists, returning true.
    pub fn set(&self, name: &str) -> bool {
        let key = canonicalize(name);
        let mut inner = self.inner.write();

        if inner.whitelisted.contains(&key) {
            debug!(name = %key, "refusing to block whitelisted name");
            return false;
        }

        inner.blocked.insert(key);
        self.save_locked(&inner);
        true
    }

    /// Unblock a name. Returns false, performing no persistence write, when
    /// the name was never blocked.
    ///
    /// Check, delete, and persist all run under one exclusive lock.
    pub fn remove(&self, name: &str) -> bool {
        let key = canonicalize(name);
        let mut inner = self.inner.write();

        if !inner.blocked.remove(&key) {
            return false;
        }

        self.save_locked(&inner);
        true
    }

    /// Whether a name is currently blocked.
    pub fn exists(&self, name: &str) -> bool {
        let key = canonicalize(name);
        self.inner.read().blocked.contains(&key)
    }

    /// Number of blocked names.
    pub fn len(&self) -> usize {
        self.inner.read().blocked.len()
    }

    /// Whether the block table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite the persisted file from the given tables. Failure is logged
    /// and swallowed: the in-memory mutation already succeeded and the caller
    /// is told so, accepting that the durable copy falls out of sync.
    fn save_locked(&self, tables: &Tables) {
        if let Err(err) = self.write_file(tables) {
            warn!(path = %self.path.display(), %err, "failed to persist block list");
            metrics::record_persist_failure();
        }
    }

    fn write_file(&self, tables: &Tables) -> io::Result<()> {
        let mut file = File::create(&self.path)?;
        writeln!(file, "{FILE_HEADER}")?;
        for name in &tables.blocked {
            writeln!(file, "{name}")?;
        }
        Ok(())
    }

    /// Build the synthesized reply for a blocked query.
    fn blocked_reply(&self, request: &Message, query: &Query) -> Message {
        let mut msg = Message::new();
        msg.set_id(request.id());
        msg.set_message_type(MessageType::Response);
        msg.set_op_code(request.op_code());
        msg.set_recursion_desired(request.recursion_desired());
        msg.set_authoritative(true);
        msg.set_recursion_available(true);
        msg.add_query(query.clone());

        let qname = query.name().clone();
        match query.query_type() {
            RecordType::A => {
                if let Some(ip) = self.nullroute {
                    let mut record =
                        Record::from_rdata(qname, BLOCK_TTL, RData::A(A::from(ip)));
                    record.set_dns_class(DNSClass::IN);
                    msg.add_answer(record);
                }
            }
            RecordType::AAAA => {
                if let Some(ip) = self.nullroute_v6 {
                    let mut record =
                        Record::from_rdata(qname, BLOCK_TTL, RData::AAAA(AAAA::from(ip)));
                    record.set_dns_class(DNSClass::IN);
                    msg.add_answer(record);
                }
            }
            _ => {
                // Negative-style placeholder for everything else.
                let soa = SOA::new(
                    qname.clone(),
                    Name::root(),
                    0,
                    SOA_REFRESH,
                    SOA_RETRY,
                    SOA_EXPIRE,
                    SOA_MINIMUM,
                );
                let mut record = Record::from_rdata(qname, SOA_TTL, RData::SOA(soa));
                record.set_dns_class(DNSClass::IN);
                msg.add_additional(record);
            }
        }

        msg
    }
}

#[async_trait]
impl Handler for BlockList {
    fn name(&self) -> &'static str {
        "blocklist"
    }

    async fn handle(&self, chain: &mut Chain<'_>) {
        let Some(query) = chain.request.queries().first().cloned() else {
            chain.next().await;
            return;
        };

        let qname = query.name().to_string();
        if !self.exists(&qname) {
            chain.next().await;
            return;
        }

        let timer = Timer::start();
        let reply = self.blocked_reply(chain.request, &query);
        if let Err(err) = chain.writer.write_msg(reply) {
            warn!(name = %qname, %err, "failed to write blocked reply");
        }
        debug!(name = %qname, qtype = ?query.query_type(), "query blocked");
        metrics::record_query(
            &format!("{:?}", query.query_type()),
            QueryOutcome::Blocked,
            timer.elapsed(),
        );

        chain.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BufferedWriter;
    use hickory_proto::op::OpCode;
    use std::sync::Arc;

    fn test_config(dir: &std::path::Path) -> BlocklistConfig {
        BlocklistConfig {
            dir: dir.to_path_buf(),
            nullroute: "0.0.0.0".to_string(),
            nullroute_v6: "::".to_string(),
            whitelist: vec!["ads.example.com".to_string()],
        }
    }

    fn test_blocklist() -> (BlockList, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let list = BlockList::new(&test_config(dir.path()));
        (list, dir)
    }

    fn query_message(name: &str, qtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(42);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), qtype));
        msg
    }

    #[test]
    fn test_set_and_exists_are_key_insensitive() {
        let (list, _dir) = test_blocklist();
        assert!(list.set("Example.com"));
        assert!(list.exists("example.com."));
        assert!(list.get("EXAMPLE.COM").unwrap());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_get_absent_returns_not_found() {
        let (list, _dir) = test_blocklist();
        assert!(matches!(list.get("missing.test"), Err(Error::NotFound)));
    }

    #[test]
    fn test_whitelist_wins() {
        let (list, _dir) = test_blocklist();
        assert!(!list.set("ads.example.com"));
        assert!(!list.exists("ads.example.com"));
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_remove_absent_is_a_noop() {
        let (list, dir) = test_blocklist();
        assert!(!list.remove("never-blocked.test"));
        // No persistence write happened.
        assert!(!dir.path().join(FILE_NAME).exists());
    }

    #[test]
    fn test_remove_blocked_name() {
        let (list, _dir) = test_blocklist();
        assert!(list.set("example.com"));
        assert!(list.remove("EXAMPLE.com."));
        assert!(!list.exists("example.com"));
    }

    #[test]
    fn test_preload_skips_whitelisted() {
        let (list, dir) = test_blocklist();
        list.preload(["a.test", "ads.example.com", "b.test"]);
        assert_eq!(list.len(), 2);
        assert!(list.exists("a.test"));
        assert!(!list.exists("ads.example.com"));
        // Preload does not persist.
        assert!(!dir.path().join(FILE_NAME).exists());
    }

    #[test]
    fn test_persistence_matches_current_set() {
        let (list, dir) = test_blocklist();
        assert!(list.set("a.test"));
        assert!(!list.remove("b.test"));

        let contents = std::fs::read_to_string(dir.path().join(FILE_NAME)).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(FILE_HEADER));
        assert_eq!(lines.next(), Some("a.test."));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_load_persisted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let list = BlockList::new(&config);
        assert!(list.set("a.test"));
        assert!(list.set("b.test"));

        let reloaded = BlockList::new(&config);
        assert_eq!(reloaded.load_persisted().unwrap(), 2);
        assert!(reloaded.exists("a.test"));
        assert!(reloaded.exists("B.test."));
    }

    #[test]
    fn test_persistence_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.dir = dir.path().join("does-not-exist");
        let list = BlockList::new(&config);

        // The mutation succeeds even though the file cannot be written.
        assert!(list.set("a.test"));
        assert!(list.exists("a.test"));
    }

    #[tokio::test]
    async fn test_blocked_a_query_gets_nullroute_answer() {
        let (list, _dir) = test_blocklist();
        list.set("example.com");

        let handlers: Vec<Arc<dyn Handler>> = vec![Arc::new(list)];
        let request = query_message("example.com.", RecordType::A);
        let mut writer = BufferedWriter::new();

        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;
        assert!(chain.is_cancelled());

        let reply = writer.reply().unwrap();
        assert_eq!(reply.id(), 42);
        assert!(reply.authoritative());
        assert_eq!(reply.answers().len(), 1);
        let answer = &reply.answers()[0];
        assert_eq!(answer.name().to_string(), "example.com.");
        assert_eq!(answer.ttl(), BLOCK_TTL);
        assert_eq!(
            answer.data().and_then(RData::as_a),
            Some(&A::from(Ipv4Addr::UNSPECIFIED))
        );
    }

    #[tokio::test]
    async fn test_blocked_aaaa_query_gets_v6_nullroute() {
        let (list, _dir) = test_blocklist();
        list.set("example.com");

        let handlers: Vec<Arc<dyn Handler>> = vec![Arc::new(list)];
        let request = query_message("example.com.", RecordType::AAAA);
        let mut writer = BufferedWriter::new();

        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;

        let reply = writer.reply().unwrap();
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(
            reply.answers()[0].data().and_then(RData::as_aaaa),
            Some(&AAAA::from(Ipv6Addr::UNSPECIFIED))
        );
    }

    #[tokio::test]
    async fn test_blocked_other_type_gets_soa_placeholder() {
        let (list, _dir) = test_blocklist();
        list.set("blocked.test");

        let handlers: Vec<Arc<dyn Handler>> = vec![Arc::new(list)];
        let request = query_message("blocked.test.", RecordType::MX);
        let mut writer = BufferedWriter::new();

        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;
        assert!(chain.is_cancelled());

        let reply = writer.reply().unwrap();
        assert!(reply.answers().is_empty());
        assert_eq!(reply.additionals().len(), 1);
        let soa = reply.additionals()[0]
            .data()
            .and_then(RData::as_soa)
            .unwrap();
        assert_eq!(soa.serial(), 0);
    }

    #[tokio::test]
    async fn test_unblocked_name_delegates() {
        let (list, _dir) = test_blocklist();
        list.set("example.com");

        let handlers: Vec<Arc<dyn Handler>> = vec![Arc::new(list)];
        let request = query_message("other.test.", RecordType::TXT);
        let mut writer = BufferedWriter::new();

        let mut chain = Chain::new(&handlers, &request, &mut writer);
        chain.next().await;

        assert!(!chain.is_cancelled());
        assert!(writer.reply().is_none());
    }
}
