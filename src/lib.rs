#![warn(rust_2018_idioms)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! The handshake and packet pipelines of [Discovery V5](https://github.com/ethereum/devp2p/blob/master/discv5/discv5.md)
//! in its v5.0 wire format.
//!
//! # Overview
//!
//! Discv5 nodes talk over encrypted sessions. Each peer is identified by its ENR ([Ethereum Name
//! Record](https://eips.ethereum.org/EIPS/eip-778)), a signed key-value store holding the node's
//! public key and optionally an IP address and port. Before two nodes can exchange messages they
//! run a handshake: the initiator sends a random packet, the recipient answers with a WHOAREYOU
//! challenge, and the initiator proves its identity in an auth-header packet that also carries
//! the first real message. Both ends derive the same `AES_GCM` keys from an ephemeral ECDH
//! exchange.
//!
//! The crate is split into these layers:
//!
//!  * Packets - The [`packet`] module holds the typed packets of the wire format and their RLP
//!  encoding. [`rpc`] holds the messages carried inside them.
//!  * Sessions - A [`session::NodeSession`] tracks the handshake status, the keys and the pending
//!  requests of one remote node. The [`session::SessionRegistry`] owns all of them and forgets
//!  sessions that sit idle.
//!  * Pipelines - Every received packet and every request travels through a [`pipeline::Pipeline`]
//!  as an [`pipeline::Envelope`]. An ordered chain of handlers decodes, authenticates, answers and
//!  dispatches it. See [`pipeline::handler`] for the order.
//!  * Application - [`Discovery`] spawns the pipelines and offers pings, node lookups and
//!  handshakes as futures.
//!
//! The UDP socket and the routing table are outside the crate. Packets to send leave through a
//! [`transport::Transport`], received packets enter through an [`InboundHandle`], and records are
//! looked up in a [`node_store::NodeStore`].
//!
//!  ## Runtimes
//!
//!  The pipelines need a tokio runtime with timing enabled. An explicit runtime can be given via
//!  the configuration, see [`Discv5ConfigBuilder`]. It must implement the [`Executor`] trait.
//!  Otherwise [`Discovery::new`] spawns onto the runtime it is called from, and panics if there is
//!  none.
//!
//! # Usage
//!
//! ```rust
//!    use discv5_handshake::{
//!        enr::{CombinedKey, EnrBuilder},
//!        node_store::MemoryNodeStore,
//!        transport::ChannelTransport,
//!        Discovery, Discv5ConfigBuilder,
//!    };
//!    use std::{net::Ipv4Addr, sync::Arc};
//!
//!    let runtime = tokio::runtime::Builder::new_multi_thread()
//!        .thread_name("discv5-handshake-example")
//!        .enable_all()
//!        .build()
//!        .unwrap();
//!
//!    // construct a local ENR
//!    let enr_key = CombinedKey::generate_secp256k1();
//!    let enr = EnrBuilder::new("v4")
//!        .ip4(Ipv4Addr::LOCALHOST)
//!        .udp4(9000)
//!        .build(&enr_key)
//!        .unwrap();
//!
//!    runtime.block_on(async {
//!        // packets to send arrive on `datagrams`, ready to be encoded onto a socket
//!        let (transport, _datagrams) =
//!            ChannelTransport::new("127.0.0.1:9000".parse().unwrap());
//!        let discovery = Discovery::new(
//!            enr,
//!            enr_key,
//!            Discv5ConfigBuilder::new().build(),
//!            Arc::new(transport),
//!            Arc::new(MemoryNodeStore::new()),
//!        )
//!        .unwrap();
//!
//!        // decoded packets from the socket are pushed into `discovery.inbound()`
//!        discovery.shutdown();
//!    });
//! ```

mod config;
pub mod crypto;
mod discovery;
mod error;
mod executor;
mod lru_time_cache;
pub mod metrics;
pub mod node_info;
pub mod node_store;
pub mod packet;
pub mod pipeline;
pub mod rpc;
pub mod scheduler;
pub mod session;
pub mod transport;

#[macro_use]
extern crate lazy_static;

pub type Enr = enr::Enr<enr::CombinedKey>;

pub use config::{Discv5Config, Discv5ConfigBuilder};
pub use discovery::{Discovery, InboundHandle};
pub use error::{Discv5Error, RequestError};
pub use executor::{Executor, TokioExecutor};
// re-export the ENR crate
pub use enr;
