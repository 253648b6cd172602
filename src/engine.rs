use crate::config::{ConfigError, EngineConfig};
use crate::padded_counter::SaleIdGenerator;
use crate::records::{SaleRecord, Ticket};
use crate::route_allocator::{AuditReport, AuditViolation, RouteAllocator};

/// Seat ticketing for a fixed network of routes.
///
/// All operations take `&self`; share the engine between worker threads by
/// reference or behind an `Arc`. Requests outside the configured bounds are
/// answered with `None`, `false` or `0` rather than an error.
pub struct TicketingEngine {
    config: EngineConfig,
    routes: Box<[RouteAllocator]>,
    ids: SaleIdGenerator,
}

impl TicketingEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let routes = (0..config.routes)
            .map(|_| RouteAllocator::new(config.coaches, config.seats, config.stations))
            .collect();

        tracing::info!(
            routes = config.routes,
            coaches = config.coaches,
            seats = config.seats,
            stations = config.stations,
            max_workers = config.max_workers,
            "ticketing engine ready"
        );

        Ok(Self {
            config,
            routes,
            ids: SaleIdGenerator::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn route(&self, route: u32) -> Option<&RouteAllocator> {
        if route == 0 {
            return None;
        }
        self.routes.get(route as usize - 1)
    }

    fn valid_span(&self, departure: u32, arrival: u32) -> bool {
        1 <= departure && departure < arrival && arrival <= self.config.stations
    }

    /// Buys a seat on `route` from `departure` to `arrival`.
    ///
    /// `None` when the request is out of bounds or every seat is taken
    /// somewhere on the stretch.
    pub fn allocate(&self, passenger: &str, route: u32, departure: u32, arrival: u32) -> Option<Ticket> {
        if !self.valid_span(departure, arrival) {
            return None;
        }
        let allocator = self.route(route)?;
        // drawn before any cell is locked
        let sale_id = self.ids.next_id();
        let sale = allocator.allocate(passenger, departure, arrival, sale_id)?;

        Some(Ticket::from_sale(sale, route, departure, arrival))
    }

    /// Refunds a ticket. `false` for tickets this engine never sold or
    /// already refunded.
    pub fn release(&self, ticket: &Ticket) -> bool {
        let Some(route) = self.route(ticket.route) else {
            tracing::debug!(route = ticket.route, "refund rejected: unknown route");
            return false;
        };
        if !self.valid_span(ticket.departure, ticket.arrival) || !route.contains_seat(ticket.seat_ref()) {
            tracing::debug!(tid = ticket.tid, "refund rejected: ticket out of bounds");
            return false;
        }

        let released = route.release(&SaleRecord::from(ticket), ticket.departure, ticket.arrival);
        if !released {
            tracing::debug!(tid = ticket.tid, "refund rejected: no such sale");
        }
        released
    }

    /// Seats free over the whole of `departure..arrival` on `route`.
    pub fn count(&self, route: u32, departure: u32, arrival: u32) -> usize {
        if !self.valid_span(departure, arrival) {
            return 0;
        }
        self.route(route)
            .map_or(0, |allocator| allocator.count(departure, arrival))
    }

    /// Re-issues the purchase described by `ticket` and reports whether it
    /// came back with the same seat assignment.
    pub fn allocate_replay(&self, ticket: &Ticket) -> bool {
        self.allocate(&ticket.passenger, ticket.route, ticket.departure, ticket.arrival)
            .is_some_and(|issued| issued.same_assignment(ticket))
    }

    pub fn release_replay(&self, ticket: &Ticket) -> bool {
        self.release(ticket)
    }

    /// Runs [`RouteAllocator::audit`] on every route. Only meaningful while
    /// no operation is in flight.
    pub fn audit(&self) -> Result<AuditReport, (u32, AuditViolation)> {
        let mut total = AuditReport::default();
        for (index, route) in self.routes.iter().enumerate() {
            let report = route.audit().map_err(|violation| {
                tracing::error!(route = index + 1, %violation, "audit failed");
                (index as u32 + 1, violation)
            })?;
            total.free_spans += report.free_spans;
            total.sold_tickets += report.sold_tickets;
            total.fully_free_seats += report.fully_free_seats;
        }
        Ok(total)
    }
}
