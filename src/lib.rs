//! pvedns - query-intercepting answer stores for a DNS middleware chain.
//!
//! This crate provides two handlers that sit in a request-processing chain,
//! decide in O(1) whether they can answer a query locally, and if so
//! synthesize a reply and stop further processing:
//!
//! - A **block list** with file-backed persistence and a whitelist override;
//!   blocked names answer with null-route addresses.
//! - A **guest resolver** backed by a name → IPv4 cache that a background
//!   refresher keeps converged with a Proxmox VE cluster's inventory.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            pvedns                              │
//! │                                                                │
//! │   UDP :53 ──▶ ┌───────────┐   miss   ┌─────────────┐   miss    │
//! │               │ blocklist │─────────▶│ pveresolver │──▶ REFUSED│
//! │               └─────┬─────┘          └──────┬──────┘           │
//! │                     │ hit                   │ hit              │
//! │                     ▼                       ▼                  │
//! │               null-route reply        cached A reply           │
//! │                                             ▲                  │
//! │                                      ┌──────┴──────┐           │
//! │                                      │  refresher  │◀── poll ──┼── PVE API
//! │                                      └─────────────┘           │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lookups are read-locked and lock-free of the network; the refresher is the
//! cache's sole writer. When the inventory becomes unreachable the cache
//! degrades permanently for the process lifetime and every lookup reports a
//! miss, letting the rest of the chain answer.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use pvedns::chain::Handler;
//! use pvedns::{BlockList, DnsServer, InventoryClient, PveResolver, Refresher, VmCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let blocklist = Arc::new(BlockList::new(&blocklist_config));
//!     let client = InventoryClient::builder(endpoint, token_id, secret)
//!         .build()
//!         .unwrap();
//!     let cache = VmCache::new();
//!
//!     let shutdown = CancellationToken::new();
//!     Refresher::new(client, cache.clone(), subnet, Duration::from_secs(30), 8)
//!         .spawn(shutdown.clone());
//!
//!     let handlers: Vec<Arc<dyn Handler>> =
//!         vec![blocklist, Arc::new(PveResolver::new(cache))];
//!     let server = DnsServer::bind(listen_addr, handlers).await.unwrap();
//!     server.run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod blocklist;
pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod name;
pub mod refresher;
pub mod resolver;
pub mod server;
pub mod telemetry;

// Re-export main types
pub use blocklist::BlockList;
pub use cache::VmCache;
pub use config::{BlocklistConfig, Config, ResolverConfig, ServerConfig, TelemetryConfig};
pub use error::Error;
pub use inventory::InventoryClient;
pub use refresher::Refresher;
pub use resolver::PveResolver;
pub use server::DnsServer;
