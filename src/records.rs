use serde::{Deserialize, Serialize};

/// A physical seat on a route, addressed by 1-based coach and seat numbers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatRef {
    pub coach: u32,
    pub seat: u32,
}

impl SeatRef {
    pub fn new(coach: u32, seat: u32) -> Self {
        Self { coach, seat }
    }
}

/// One active booking as the route allocator stores it.
///
/// Equality and hashing cover the sale id, the seat and the passenger, so a
/// ticket handed back for refund has to match all four to be found.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SaleRecord {
    pub sale_id: u64,
    pub passenger: String,
    pub coach: u32,
    pub seat: u32,
}

impl SaleRecord {
    pub fn seat_ref(&self) -> SeatRef {
        SeatRef::new(self.coach, self.seat)
    }
}

impl From<&Ticket> for SaleRecord {
    fn from(ticket: &Ticket) -> Self {
        SaleRecord {
            sale_id: ticket.tid,
            passenger: ticket.passenger.clone(),
            coach: ticket.coach,
            seat: ticket.seat,
        }
    }
}

/// Ticket returned to callers. Only ever handed back to request a refund.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    pub tid: u64,
    pub passenger: String,
    pub route: u32,
    pub coach: u32,
    pub seat: u32,
    pub departure: u32,
    pub arrival: u32,
}

impl Ticket {
    pub fn from_sale(sale: SaleRecord, route: u32, departure: u32, arrival: u32) -> Self {
        Ticket {
            tid: sale.sale_id,
            passenger: sale.passenger,
            route,
            coach: sale.coach,
            seat: sale.seat,
            departure,
            arrival,
        }
    }

    pub fn seat_ref(&self) -> SeatRef {
        SeatRef::new(self.coach, self.seat)
    }

    /// Same passenger on the same seat over the same stretch, ignoring the sale id.
    pub fn same_assignment(&self, other: &Ticket) -> bool {
        self.passenger == other.passenger
            && self.route == other.route
            && self.coach == other.coach
            && self.seat == other.seat
            && self.departure == other.departure
            && self.arrival == other.arrival
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;

    #[test]
    fn sale_record_keys_a_concurrent_map() {
        let map: DashMap<SaleRecord, ()> = DashMap::new();
        let sale = SaleRecord {
            sale_id: 1,
            passenger: "alice".to_string(),
            coach: 2,
            seat: 3,
        };
        map.insert(sale.clone(), ());
        assert!(map.get(&sale).is_some());

        let other_passenger = SaleRecord {
            passenger: "bob".to_string(),
            ..sale.clone()
        };
        assert!(map.get(&other_passenger).is_none());
    }

    #[test]
    fn ticket_round_trips_to_sale_record() {
        let sale = SaleRecord {
            sale_id: 77,
            passenger: "carol".to_string(),
            coach: 1,
            seat: 4,
        };
        let ticket = Ticket::from_sale(sale.clone(), 2, 3, 5);
        assert_eq!(ticket.route, 2);
        assert_eq!(SaleRecord::from(&ticket), sale);
    }
}
