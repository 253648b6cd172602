use crate::interval_cell::IntervalCell;
use crate::occupancy::{OccupancyTable, merge_window, span_mask, window_guard};
use crate::records::{SaleRecord, SeatRef};
use thiserror::Error;

const SNAPSHOT_ATTEMPTS: usize = 4;

/// Triangular grid holding one value per station span [left, right] with
/// `1 <= left <= right <= stations`.
pub struct SpanGrid<T> {
    stations: u32,
    slots: Box<[T]>,
}

impl<T> SpanGrid<T> {
    pub fn new(stations: u32, mut make: impl FnMut() -> T) -> Self {
        let n = stations as usize;
        let slots = (0..n * (n + 1) / 2).map(|_| make()).collect();
        Self { stations, slots }
    }

    fn index(&self, left: u32, right: u32) -> usize {
        debug_assert!(1 <= left && left <= right && right <= self.stations);
        let n = self.stations as usize;
        let row = left as usize - 1;
        // rows above `left` hold n, n-1, ... entries
        row * n - row * row.saturating_sub(1) / 2 + (right - left) as usize
    }

    pub fn get(&self, left: u32, right: u32) -> &T {
        &self.slots[self.index(left, right)]
    }

    pub fn spans(&self) -> impl Iterator<Item = (u32, u32, &T)> + '_ {
        (1..=self.stations)
            .flat_map(move |left| (left..=self.stations).map(move |right| (left, right)))
            .map(move |(left, right)| (left, right, self.get(left, right)))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuditViolation {
    #[error("seat {coach}-{seat} covers stations ({left}, {right}] twice")]
    Overlap {
        coach: u32,
        seat: u32,
        left: u32,
        right: u32,
    },
    #[error("seat {coach}-{seat} leaves segments {missing:#x} neither free nor sold")]
    Gap { coach: u32, seat: u32, missing: u64 },
    #[error("seat {coach}-{seat} occupancy {bits:#x} disagrees with sold spans {sold:#x}")]
    Occupancy {
        coach: u32,
        seat: u32,
        bits: u64,
        sold: u64,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    pub free_spans: usize,
    pub sold_tickets: usize,
    pub fully_free_seats: usize,
}

/// Seat allocator for a single route.
pub struct RouteAllocator {
    stations: u32,
    coaches: u32,
    seats_per_coach: u32,
    cells: SpanGrid<IntervalCell>,
    occupancy: OccupancyTable,
}

impl RouteAllocator {
    pub fn new(coaches: u32, seats_per_coach: u32, stations: u32) -> Self {
        let cells = SpanGrid::new(stations, IntervalCell::new);

        {
            let mut full_span = cells.get(1, stations).write();
            for coach in 1..=coaches {
                for seat in 1..=seats_per_coach {
                    full_span.insert(SeatRef::new(coach, seat));
                }
            }
        }

        Self {
            stations,
            coaches,
            seats_per_coach,
            cells,
            occupancy: OccupancyTable::new(coaches, seats_per_coach),
        }
    }

    pub fn contains_seat(&self, seat: SeatRef) -> bool {
        (1..=self.coaches).contains(&seat.coach) && (1..=self.seats_per_coach).contains(&seat.seat)
    }

    pub(crate) fn cell(&self, left: u32, right: u32) -> &IntervalCell {
        self.cells.get(left, right)
    }

    /// Books any seat free over (departure, arrival] under `sale_id`, which
    /// the caller draws before any cell is locked. Bounds are checked by the
    /// caller.
    pub fn allocate(
        &self,
        passenger: &str,
        departure: u32,
        arrival: u32,
        sale_id: u64,
    ) -> Option<SaleRecord> {
        if let Some(sale) = self.allocate_from(passenger, departure, arrival, 1, self.stations, sale_id) {
            return Some(sale);
        }

        // tightest enclosing span first
        for left in (1..=departure).rev() {
            for right in arrival..=self.stations {
                if let Some(sale) = self.allocate_from(passenger, departure, arrival, left, right, sale_id) {
                    return Some(sale);
                }
            }
        }
        None
    }

    fn allocate_from(
        &self,
        passenger: &str,
        departure: u32,
        arrival: u32,
        left: u32,
        right: u32,
        sale_id: u64,
    ) -> Option<SaleRecord> {
        let cell = self.cell(left, right);

        let mut outer = loop {
            let Some(stamp) = cell.try_optimistic_read() else {
                std::thread::yield_now();
                continue;
            };
            if cell.free_len_hint() == 0 {
                return None;
            }
            match cell.try_upgrade(stamp) {
                Some(guard) => break guard,
                None => {
                    tracing::trace!(left, right, "cell changed under optimistic read, retrying");
                    std::thread::yield_now();
                }
            }
        };

        let seat = outer.pop_any()?;
        let sale = SaleRecord {
            sale_id,
            passenger: passenger.to_string(),
            coach: seat.coach,
            seat: seat.seat,
        };

        let mut leading = (left < departure).then(|| self.cell(left, departure).write());
        let mut trailing = (arrival < right).then(|| self.cell(arrival, right).write());
        for remainder in leading.iter_mut().chain(trailing.iter_mut()) {
            remainder.insert(seat);
        }

        self.occupancy.mark_occupied(seat, departure, arrival);
        self.cell(departure, arrival).record_sale(sale.clone());

        // the seat leaves the outer span before it shows up in the remainders,
        // so inquiries never see it twice
        drop(outer);
        drop(trailing);
        drop(leading);
        Some(sale)
    }

    /// Returns a booked seat and merges it back into the widest free span
    /// its neighbours allow. `false` when the sale is unknown.
    pub fn release(&self, sale: &SaleRecord, departure: u32, arrival: u32) -> bool {
        if !self.cell(departure, arrival).remove_sale(sale) {
            return false;
        }

        let seat = sale.seat_ref();
        let own = span_mask(departure, arrival);

        loop {
            let observed = self.occupancy.load(seat);
            let (left, right) = merge_window(observed & !own, departure, arrival, self.stations);
            let guard = window_guard(left, right, self.stations);

            let mut merged = self.cell(left, right).write();
            let mut leading = (left < departure).then(|| self.cell(left, departure).write());
            let mut trailing = (arrival < right).then(|| self.cell(arrival, right).write());

            let current = self.occupancy.load(seat);
            if (observed ^ current) & guard != 0 {
                tracing::trace!(left, right, "merge window moved before locking, retrying");
                continue;
            }

            if let Err(moved) = self
                .occupancy
                .clear_occupied(seat, departure, arrival, current, guard)
            {
                tracing::trace!(left, right, moved, "merge window moved at commit, retrying");
                continue;
            }

            for neighbour in leading.iter_mut().chain(trailing.iter_mut()) {
                let removed = neighbour.remove(&seat);
                debug_assert!(removed, "absorbed span did not hold seat {:?}", seat);
            }
            merged.insert(seat);
            return true;
        }
    }

    /// Seats free over the whole of (departure, arrival].
    ///
    /// Sums every span enclosing the request from one validated snapshot of
    /// their stamps. Under sustained contention it settles for per-cell reads,
    /// which may catch a seat mid-move; the result is then capped at the
    /// route's capacity.
    pub fn count(&self, departure: u32, arrival: u32) -> usize {
        let capacity = self.coaches as usize * self.seats_per_coach as usize;
        let enclosing = move || {
            (1..=departure).flat_map(move |left| {
                (arrival..=self.stations)
                    .rev()
                    .map(move |right| self.cell(left, right))
            })
        };

        let mut stamps = Vec::new();
        for _ in 0..SNAPSHOT_ATTEMPTS {
            stamps.clear();
            let mut sum = 0;
            for cell in enclosing() {
                let Some(stamp) = cell.try_optimistic_read() else {
                    break;
                };
                sum += cell.free_len_hint();
                stamps.push(stamp);
            }

            let complete = stamps.len() == departure as usize * (self.stations - arrival + 1) as usize;
            if complete && enclosing().zip(&stamps).all(|(cell, stamp)| cell.validate(*stamp)) {
                return sum.min(capacity);
            }
            tracing::trace!(departure, arrival, "inquiry snapshot moved, retrying");
            std::thread::yield_now();
        }

        enclosing().map(IntervalCell::free_len).sum::<usize>().min(capacity)
    }

    /// Checks at a quiescent point that every seat's free and sold spans tile
    /// the route exactly once and that its occupancy word matches its sales.
    pub fn audit(&self) -> Result<AuditReport, AuditViolation> {
        let seats = self.coaches as usize * self.seats_per_coach as usize;
        let slot = |seat: SeatRef| -> usize {
            (seat.coach - 1) as usize * self.seats_per_coach as usize + (seat.seat - 1) as usize
        };
        let mut covered = vec![0u64; seats];
        let mut sold = vec![0u64; seats];
        let mut report = AuditReport::default();

        let cover = |covered: &mut Vec<u64>, seat: SeatRef, left: u32, right: u32| {
            let mask = span_mask(left, right);
            let bits = &mut covered[slot(seat)];
            if *bits & mask != 0 {
                return Err(AuditViolation::Overlap {
                    coach: seat.coach,
                    seat: seat.seat,
                    left,
                    right,
                });
            }
            *bits |= mask;
            Ok(())
        };

        for (left, right, cell) in self.cells.spans() {
            for seat in cell.read().iter() {
                cover(&mut covered, *seat, left, right)?;
                report.free_spans += 1;
                if left == 1 && right == self.stations {
                    report.fully_free_seats += 1;
                }
            }

            let mut overlap = None;
            cell.for_each_sale(|sale| {
                if overlap.is_some() {
                    return;
                }
                if let Err(violation) = cover(&mut covered, sale.seat_ref(), left, right) {
                    overlap = Some(violation);
                    return;
                }
                sold[slot(sale.seat_ref())] |= span_mask(left, right);
                report.sold_tickets += 1;
            });
            if let Some(violation) = overlap {
                return Err(violation);
            }
        }

        let route_mask = span_mask(1, self.stations);
        for (seat, bits) in self.occupancy.seats() {
            let index = slot(seat);
            if covered[index] != route_mask {
                return Err(AuditViolation::Gap {
                    coach: seat.coach,
                    seat: seat.seat,
                    missing: route_mask & !covered[index],
                });
            }
            if bits != sold[index] {
                return Err(AuditViolation::Occupancy {
                    coach: seat.coach,
                    seat: seat.seat,
                    bits,
                    sold: sold[index],
                });
            }
        }

        Ok(report)
    }
}
