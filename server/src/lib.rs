//! # Real-time Transport and Input-Admission Server
//!
//! This library is the transport and input-admission layer of a networked
//! multiplayer server. It accepts UDP packets from many remote peers,
//! demultiplexes them by topic label, and feeds a fixed-rate simulation
//! loop with a time-bounded, per-peer-ordered stream of input commands.
//!
//! ## Pipeline
//!
//! ```text
//! socket -> reader tasks -> inbound channel -> mux -> input topic
//!        -> input queue -> dequeue -> simulation -> snapshot broadcast
//! ```
//!
//! The three stages are coupled by a single promise: the simulation never
//! stalls waiting for a stale or missing input, and never applies inputs
//! out of a peer's own order.
//!
//! ## Module Organization
//!
//! ### Transport Module (`transport`)
//! Owns the UDP socket. A fixed pool of reader tasks decodes inbound
//! datagrams, intercepts `HELLO`/`GOODBYE` handshakes to maintain the
//! peer registries, and forwards everything else into a single bounded
//! envelope channel. Outbound, it offers deadline-bounded sends and a
//! concurrent fan-out broadcast to all known clients.
//!
//! ### Mux Module (`mux`)
//! Routes each envelope to the subscriber registered for its one-byte
//! topic label, stripping the label on the way through. Unroutable and
//! malformed envelopes are dropped with a warning.
//!
//! ### Input Queue Module (`input_queue`)
//! Admits inputs per sender in strictly increasing index order into a
//! small bounded FIFO. Every admitted input carries a one-tick deadline
//! enforced by a timeout watcher; a watcher that fires evicts the queue
//! head, which FIFO ordering guarantees is at least as stale as the
//! watcher's own input.
//!
//! ### Simulation Module (`simulation`)
//! A fixed-rate loop that dequeues one input per tick, advances the
//! position state, and publishes a snapshot for broadcasting.
//!
//! ## Delivery Semantics
//!
//! Only handshake control messages get registry bookkeeping; no payload
//! is acknowledged, retransmitted, or reordered. Peers are advisory
//! liveness records, not authenticated sessions. Backpressure is
//! deliberate: a full input queue blocks the network-facing producer
//! instead of dropping an admitted input.

pub mod input_queue;
pub mod mux;
pub mod simulation;
pub mod transport;
