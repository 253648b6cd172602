use crate::config::{ConfigError, EngineConfig};
use crate::engine::TicketingEngine;
use crate::records::Ticket;
use ahash::AHashSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};

fn engine(routes: u32, coaches: u32, seats: u32, stations: u32) -> TicketingEngine {
    TicketingEngine::new(EngineConfig {
        routes,
        coaches,
        seats,
        stations,
        max_workers: 64,
    })
    .unwrap()
}

#[test]
fn out_of_bounds_purchases_are_refused() {
    let engine = engine(3, 3, 5, 5);

    assert!(engine.allocate("p", 1, 0, 0).is_none());
    assert!(engine.allocate("p", 1, 0, 8).is_none());
    assert!(engine.allocate("p", 1, 18, 8).is_none());
    assert!(engine.allocate("p", 1, 3, 3).is_none());
    assert!(engine.allocate("p", 1, 4, 2).is_none());
    assert!(engine.allocate("p", 1, 1, 6).is_none());
    assert!(engine.allocate("p", 0, 1, 5).is_none());
    assert!(engine.allocate("p", 4, 1, 5).is_none());

    assert_eq!(engine.count(0, 1, 5), 0);
    assert_eq!(engine.count(1, 3, 3), 0);
    assert_eq!(engine.count(1, 0, 2), 0);
    assert_eq!(engine.audit().unwrap().sold_tickets, 0);
}

#[test]
fn full_route_sells_out_and_recovers() {
    let engine = engine(3, 3, 5, 5);

    let mut tickets = Vec::new();
    for i in 0..15 {
        let ticket = engine
            .allocate(&format!("passenger{i}"), 3, 1, 5)
            .expect("seat available");
        assert_eq!((ticket.route, ticket.departure, ticket.arrival), (3, 1, 5));
        tickets.push(ticket);
    }

    assert!(engine.allocate("late", 3, 1, 5).is_none());
    assert!(engine.allocate("late", 3, 2, 3).is_none());
    assert_eq!(engine.count(3, 1, 5), 0);
    assert_eq!(engine.count(3, 2, 3), 0);
    assert_eq!(engine.count(1, 1, 5), 15);

    assert!(engine.release(&tickets[7]));
    assert_eq!(engine.count(3, 1, 5), 1);

    let again = engine.allocate("late", 3, 1, 5).unwrap();
    assert_eq!(again.seat_ref(), tickets[7].seat_ref());
    assert_eq!(engine.count(3, 1, 5), 0);
}

#[test]
fn sold_seats_are_distinct() {
    let engine = engine(1, 2, 4, 6);
    let mut seen = AHashSet::new();
    let mut ids = AHashSet::new();

    while let Some(ticket) = engine.allocate("p", 1, 2, 5) {
        assert!(seen.insert(ticket.seat_ref()));
        assert!(ids.insert(ticket.tid));
    }
    assert_eq!(seen.len(), 8);
    // the stretch before departure is still open on every seat
    assert_eq!(engine.count(1, 1, 2), 8);
    assert_eq!(engine.count(1, 5, 6), 8);
    assert_eq!(engine.count(1, 1, 3), 0);
}

#[test]
fn refund_round_trip_restores_the_count() {
    let engine = engine(3, 3, 5, 5);
    let before = engine.count(2, 2, 4);

    let ticket = engine.allocate("alice", 2, 2, 4).unwrap();
    assert_eq!(engine.count(2, 2, 4), before - 1);

    assert!(engine.release(&ticket));
    assert_eq!(engine.count(2, 2, 4), before);
    assert!(!engine.release(&ticket));
}

#[test]
fn single_segment_purchase_only_affects_its_segment() {
    let engine = engine(3, 3, 5, 5);

    let ticket = engine.allocate("bob", 1, 3, 4).unwrap();
    assert_eq!(engine.count(1, 3, 4), 14);
    assert_eq!(engine.count(1, 1, 2), 15);
    assert_eq!(engine.count(1, 4, 5), 15);
    assert_eq!(engine.count(1, 2, 4), 14);
    assert_eq!(engine.count(1, 1, 5), 14);

    assert!(engine.release(&ticket));
    assert_eq!(engine.count(1, 1, 5), 15);
}

#[test]
fn inquiries_follow_mixed_purchases() {
    let engine = engine(1, 1, 3, 5);

    // fully free seats are taken first, so each purchase lands on its own seat
    let a = engine.allocate("a", 1, 1, 3).unwrap();
    let b = engine.allocate("b", 1, 3, 5).unwrap();
    assert_ne!(a.seat_ref(), b.seat_ref());
    assert_eq!(engine.count(1, 1, 5), 1);
    assert_eq!(engine.count(1, 2, 4), 1);
    assert_eq!(engine.count(1, 1, 2), 2);
    assert_eq!(engine.count(1, 4, 5), 2);

    let c = engine.allocate("c", 1, 2, 4).unwrap();
    assert_eq!(engine.count(1, 2, 4), 0);
    assert_eq!(engine.count(1, 1, 2), 2);
    assert_eq!(engine.count(1, 1, 5), 0);
    let d = engine.allocate("d", 1, 2, 3).unwrap();
    assert_eq!(d.seat_ref(), b.seat_ref());
    assert_eq!(engine.count(1, 1, 2), 2);
    assert_eq!(engine.count(1, 2, 3), 0);

    for ticket in [&a, &b, &c, &d] {
        assert!(engine.release(ticket));
    }
    assert_eq!(engine.count(1, 1, 5), 3);

    let report = engine.audit().unwrap();
    assert_eq!(report.sold_tickets, 0);
    assert_eq!(report.fully_free_seats, 3);
}

#[test]
fn forged_and_foreign_tickets_are_rejected() {
    let engine = engine(3, 3, 5, 5);
    let real = engine.allocate("carol", 1, 1, 4).unwrap();

    let forged = Ticket {
        passenger: "mallory".to_string(),
        ..real.clone()
    };
    assert!(!engine.release(&forged));

    let other_id = Ticket {
        tid: real.tid + 1,
        ..real.clone()
    };
    assert!(!engine.release(&other_id));

    let wrong_span = Ticket {
        arrival: 5,
        ..real.clone()
    };
    assert!(!engine.release(&wrong_span));

    for out_of_bounds in [
        Ticket { route: 9, ..real.clone() },
        Ticket { coach: 4, ..real.clone() },
        Ticket { seat: 0, ..real.clone() },
        Ticket { departure: 4, ..real.clone() },
        Ticket { arrival: 6, ..real.clone() },
    ] {
        assert!(!engine.release(&out_of_bounds));
    }

    assert!(engine.release(&real));
    assert_eq!(engine.count(1, 1, 5), 15);
}

#[test]
fn replay_operations_report_assignment_and_refund() {
    let engine = engine(1, 1, 1, 4);
    let first = engine.allocate("dave", 1, 1, 4).unwrap();
    assert!(engine.release_replay(&first));

    // with the same state the same seat comes back, under a new id
    assert!(engine.allocate_replay(&first));
    assert!(!engine.release_replay(&first));

    let later = Ticket {
        departure: 2,
        ..first.clone()
    };
    assert!(!engine.allocate_replay(&later));
}

#[test]
fn construction_rejects_bad_dimensions() {
    let result = TicketingEngine::new(EngineConfig {
        coaches: 0,
        ..EngineConfig::default()
    });
    assert!(matches!(result, Err(ConfigError::ZeroDimension { name: "coaches" })));

    let result = TicketingEngine::new(EngineConfig {
        stations: 64,
        ..EngineConfig::default()
    });
    assert!(matches!(result, Err(ConfigError::TooManyStations { .. })));

    let widest = engine(1, 1, 1, 63);
    let ticket = widest.allocate("e", 1, 1, 63).unwrap();
    assert_eq!(widest.count(1, 62, 63), 0);
    assert!(widest.release(&ticket));
    assert_eq!(widest.count(1, 1, 63), 1);
}

#[test]
fn concurrent_workload_keeps_an_exact_cover() {
    const WORKERS: u64 = 8;
    const OPERATIONS: usize = 4_000;
    let engine = engine(2, 2, 4, 8);

    let survivors: Vec<Vec<Ticket>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let engine = &engine;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(0x5eed + worker);
                    let mut held: Vec<Ticket> = Vec::new();

                    for op in 0..OPERATIONS {
                        let route = rng.random_range(1..=2);
                        let departure = rng.random_range(1..8);
                        let arrival = rng.random_range(departure + 1..=8);

                        match rng.random_range(0..100) {
                            0..30 if !held.is_empty() => {
                                let index = rng.random_range(0..held.len());
                                let ticket = held.swap_remove(index);
                                assert!(engine.release(&ticket), "refund of a live ticket failed");
                            }
                            0..60 => {
                                let passenger = format!("w{worker}-{op}");
                                if let Some(ticket) = engine.allocate(&passenger, route, departure, arrival) {
                                    held.push(ticket);
                                }
                            }
                            _ => {
                                assert!(engine.count(route, departure, arrival) <= 8);
                            }
                        }
                    }
                    held
                })
            })
            .collect();

        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let live: Vec<&Ticket> = survivors.iter().flatten().collect();
    let report = engine.audit().unwrap();
    assert_eq!(report.sold_tickets, live.len());

    let ids: AHashSet<u64> = live.iter().map(|ticket| ticket.tid).collect();
    assert_eq!(ids.len(), live.len());

    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            if a.route == b.route && a.seat_ref() == b.seat_ref() {
                assert!(
                    a.arrival <= b.departure || b.arrival <= a.departure,
                    "seat sold twice: {a:?} and {b:?}"
                );
            }
        }
    }

    for ticket in &live {
        assert!(engine.release(ticket));
    }
    let report = engine.audit().unwrap();
    assert_eq!(report.sold_tickets, 0);
    assert_eq!(report.fully_free_seats, 16);
    assert_eq!(engine.count(1, 1, 8), 8);
    assert_eq!(engine.count(2, 1, 8), 8);
}

#[test]
fn inquiries_under_refund_churn_stay_within_capacity() {
    const CHURNERS: u64 = 4;
    const INQUIRIES: usize = 200_000;
    let engine = engine(1, 1, 1, 12);
    let done = AtomicBool::new(false);

    let most_seen = std::thread::scope(|scope| {
        for worker in 0..CHURNERS {
            let (engine, done) = (&engine, &done);
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xc0ffee + worker);
                while !done.load(Ordering::Relaxed) {
                    let departure = rng.random_range(1..12);
                    if let Some(ticket) = engine.allocate("churn", 1, departure, departure + 1) {
                        assert!(engine.release(&ticket));
                    }
                }
            });
        }

        let mut rng = StdRng::seed_from_u64(7);
        let mut most_seen = (0, 0, 0);
        for i in 0..INQUIRIES {
            let (departure, arrival) = if i % 2 == 0 {
                (6, 7)
            } else {
                let departure = rng.random_range(1..12);
                (departure, rng.random_range(departure + 1..=12))
            };
            let free = engine.count(1, departure, arrival);
            if free > most_seen.0 {
                most_seen = (free, departure, arrival);
            }
        }
        done.store(true, Ordering::Relaxed);
        most_seen
    });

    let (free, departure, arrival) = most_seen;
    assert!(free <= 1, "count({departure}, {arrival}) returned {free} on a one seat route");

    let report = engine.audit().unwrap();
    assert_eq!(report.sold_tickets, 0);
    assert_eq!(engine.count(1, 1, 12), 1);
}
