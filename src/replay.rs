//! Sequential replay of a recorded history against a fresh engine, checked
//! step by step against a brute-force occupancy model.

use crate::config::{ConfigError, EngineConfig};
use crate::engine::TicketingEngine;
use crate::history::{HistoryLine, Operation};
use crate::occupancy::span_mask;
use crate::records::Ticket;
use crate::route_allocator::AuditViolation;
use ahash::AHashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("record {record}: buy {outcome} while {free} seats were free over ({departure}, {arrival}]")]
    Availability {
        record: usize,
        outcome: &'static str,
        free: usize,
        departure: u32,
        arrival: u32,
    },
    #[error("record {record}: seat {coach}-{seat} on route {route} sold twice over ({departure}, {arrival}]")]
    DoubleSale {
        record: usize,
        route: u32,
        coach: u32,
        seat: u32,
        departure: u32,
        arrival: u32,
    },
    #[error("record {record}: inquiry returned {returned}, expected {expected}")]
    Count {
        record: usize,
        returned: usize,
        expected: usize,
    },
    #[error("record {record}: refund of live ticket {tid} was rejected")]
    RefundRejected { record: usize, tid: u64 },
    #[error("route {route} inconsistent after replay: {violation}")]
    Audit {
        route: u32,
        #[source]
        violation: AuditViolation,
    },
    #[error("cannot build engine: {0}")]
    Config(#[from] ConfigError),
}

/// Per-seat occupancy words kept outside the engine.
pub struct OccupancyOracle {
    config: EngineConfig,
    words: Vec<u64>,
}

fn network_seats(config: &EngineConfig) -> usize {
    config.routes as usize * config.coaches as usize * config.seats as usize
}

impl OccupancyOracle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            words: vec![0; network_seats(&config)],
        }
    }

    fn slot(&self, route: u32, coach: u32, seat: u32) -> usize {
        let per_route = self.config.coaches as usize * self.config.seats as usize;
        (route - 1) as usize * per_route
            + (coach - 1) as usize * self.config.seats as usize
            + (seat - 1) as usize
    }

    fn in_bounds(&self, route: u32, departure: u32, arrival: u32) -> bool {
        (1..=self.config.routes).contains(&route)
            && 1 <= departure
            && departure < arrival
            && arrival <= self.config.stations
    }

    pub fn count(&self, route: u32, departure: u32, arrival: u32) -> usize {
        if !self.in_bounds(route, departure, arrival) {
            return 0;
        }
        let per_route = self.config.coaches as usize * self.config.seats as usize;
        let start = (route - 1) as usize * per_route;
        let mask = span_mask(departure, arrival);

        self.words[start..start + per_route]
            .iter()
            .filter(|word| *word & mask == 0)
            .count()
    }

    /// Marks the ticket's stretch taken; `false` when any of it already was.
    pub fn book(&mut self, ticket: &Ticket) -> bool {
        let slot = self.slot(ticket.route, ticket.coach, ticket.seat);
        let mask = span_mask(ticket.departure, ticket.arrival);
        if self.words[slot] & mask != 0 {
            return false;
        }
        self.words[slot] |= mask;
        true
    }

    pub fn release(&mut self, ticket: &Ticket) {
        let slot = self.slot(ticket.route, ticket.coach, ticket.seat);
        self.words[slot] &= !span_mask(ticket.departure, ticket.arrival);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub buys: usize,
    pub refunds: usize,
    pub inquiries: usize,
    /// Operations whose outcome differs from the recorded one. Expected for
    /// histories captured from concurrent runs.
    pub recorded_disagreements: usize,
}

pub struct Replayer<'a> {
    engine: &'a TicketingEngine,
    oracle: OccupancyOracle,
    // recorded (route, coach, seat) -> ticket this replay obtained for it
    held: AHashMap<(u32, u32, u32), Ticket>,
    stats: ReplayStats,
}

impl<'a> Replayer<'a> {
    pub fn new(engine: &'a TicketingEngine) -> Self {
        Self {
            engine,
            oracle: OccupancyOracle::new(*engine.config()),
            held: AHashMap::new(),
            stats: ReplayStats::default(),
        }
    }

    pub fn apply(&mut self, record: usize, line: &HistoryLine) -> Result<(), ReplayError> {
        let key = (line.route, line.coach, line.seat);

        let agrees = match line.operation {
            Operation::Buy => {
                self.stats.buys += 1;
                let free = self.oracle.count(line.route, line.departure, line.arrival);
                let issued = self
                    .engine
                    .allocate(&line.passenger, line.route, line.departure, line.arrival);

                if issued.is_some() != (free > 0) {
                    return Err(ReplayError::Availability {
                        record,
                        outcome: if issued.is_some() { "succeeded" } else { "failed" },
                        free,
                        departure: line.departure,
                        arrival: line.arrival,
                    });
                }

                match issued {
                    Some(ticket) => {
                        if !self.oracle.book(&ticket) {
                            return Err(ReplayError::DoubleSale {
                                record,
                                route: ticket.route,
                                coach: ticket.coach,
                                seat: ticket.seat,
                                departure: ticket.departure,
                                arrival: ticket.arrival,
                            });
                        }
                        self.held.insert(key, ticket);
                        line.result
                    }
                    None => {
                        self.held.remove(&key);
                        !line.result
                    }
                }
            }
            Operation::Refund => {
                self.stats.refunds += 1;
                match self.held.remove(&key) {
                    Some(ticket) => {
                        if !self.engine.release(&ticket) {
                            return Err(ReplayError::RefundRejected {
                                record,
                                tid: ticket.tid,
                            });
                        }
                        self.oracle.release(&ticket);
                        line.result
                    }
                    None => !line.result,
                }
            }
            Operation::Inquiry => {
                self.stats.inquiries += 1;
                let returned = self.engine.count(line.route, line.departure, line.arrival);
                let expected = self.oracle.count(line.route, line.departure, line.arrival);
                if returned != expected {
                    return Err(ReplayError::Count {
                        record,
                        returned,
                        expected,
                    });
                }
                returned == line.seat as usize
            }
        };

        if !agrees {
            tracing::debug!(record, %line, "replayed outcome differs from the recorded one");
            self.stats.recorded_disagreements += 1;
        }
        Ok(())
    }

    /// Audits the engine and hands back the tallies.
    pub fn finish(self) -> Result<ReplayStats, ReplayError> {
        self.engine
            .audit()
            .map_err(|(route, violation)| ReplayError::Audit { route, violation })?;
        Ok(self.stats)
    }
}

/// Replays `lines` in order against a new engine built from `config`.
pub fn replay(config: EngineConfig, lines: &[HistoryLine]) -> Result<ReplayStats, ReplayError> {
    let engine = TicketingEngine::new(config)?;
    let mut replayer = Replayer::new(&engine);

    for (index, line) in lines.iter().enumerate() {
        replayer.apply(index + 1, line)?;
    }

    replayer.finish()
}
