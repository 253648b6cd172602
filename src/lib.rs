// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

//! Concurrent seat ticketing for trains.
//!
//! Each route keeps, for every inclusive station span `[left, right]`, the
//! seats whose maximal free stretch is exactly that span. Purchases carve a
//! seat out of the tightest enclosing span, refunds merge it back with its
//! free neighbours, and inquiries sum the spans enclosing the request.

pub mod config;
pub mod engine;
pub mod history;
pub mod interval_cell;
pub mod occupancy;
pub mod padded_counter;
pub mod records;
pub mod replay;
pub mod route_allocator;

#[cfg(test)]
mod engine_tests;

pub use config::{ConfigError, EngineConfig, TrainConfig};
pub use engine::TicketingEngine;
pub use records::Ticket;
