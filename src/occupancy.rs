use crate::records::SeatRef;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest station count whose segments fit in one `u64`.
pub const MAX_STATIONS: u32 = 63;

/// Bits `departure + 1 ..= arrival`, i.e. the segments of (departure, arrival].
///
/// Bit `i` stands for the segment ending at station `i`. `arrival` may run one
/// past [`MAX_STATIONS`] so callers can ask for a window's trailing boundary.
pub fn span_mask(departure: u32, arrival: u32) -> u64 {
    if arrival <= departure {
        return 0;
    }
    let upto = |station: u32| -> u64 {
        if station >= 63 {
            u64::MAX
        } else {
            (1u64 << (station + 1)) - 1
        }
    };
    upto(arrival) & !upto(departure)
}

/// Widest [left, right] around (departure, arrival] whose segments are clear
/// in `others`, which must not include the ticket's own bits.
pub fn merge_window(others: u64, departure: u32, arrival: u32, stations: u32) -> (u32, u32) {
    let mut left = departure;
    while left > 1 && others & (1u64 << left) == 0 {
        left -= 1;
    }

    let mut right = arrival;
    while right < stations && others & (1u64 << (right + 1)) == 0 {
        right += 1;
    }

    (left, right)
}

/// Segments whose change invalidates a merge into [left, right]: the span
/// itself plus the two boundary segments that stopped the scan.
pub fn window_guard(left: u32, right: u32, stations: u32) -> u64 {
    span_mask(left.saturating_sub(1), right + 1) & span_mask(1, stations)
}

/// One atomic occupancy word per (coach, seat) of a route.
pub struct OccupancyTable {
    seats_per_coach: u32,
    words: Box<[AtomicU64]>,
}

impl OccupancyTable {
    pub fn new(coaches: u32, seats_per_coach: u32) -> Self {
        let words = (0..coaches as usize * seats_per_coach as usize)
            .map(|_| AtomicU64::new(0))
            .collect();

        Self {
            seats_per_coach,
            words,
        }
    }

    fn word(&self, seat: SeatRef) -> &AtomicU64 {
        let index = (seat.coach - 1) as usize * self.seats_per_coach as usize + (seat.seat - 1) as usize;
        &self.words[index]
    }

    pub fn load(&self, seat: SeatRef) -> u64 {
        self.word(seat).load(Ordering::Acquire)
    }

    pub fn mark_occupied(&self, seat: SeatRef, departure: u32, arrival: u32) {
        self.word(seat)
            .fetch_or(span_mask(departure, arrival), Ordering::AcqRel);
    }

    /// Clears (departure, arrival] starting from the caller's validated
    /// snapshot.
    ///
    /// Bits inside `guard` must still match `validated` for the clear to land.
    /// Returns the conflicting value when they moved; moves outside `guard`
    /// are absorbed by retrying against the fresh value.
    pub fn clear_occupied(
        &self,
        seat: SeatRef,
        departure: u32,
        arrival: u32,
        validated: u64,
        guard: u64,
    ) -> Result<(), u64> {
        let word = self.word(seat);
        let own = span_mask(departure, arrival);
        let mut expected = validated;

        loop {
            match word.compare_exchange_weak(
                expected,
                expected & !own,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) if (actual ^ validated) & guard != 0 => return Err(actual),
                Err(actual) => expected = actual,
            }
        }
    }

    pub fn seats(&self) -> impl Iterator<Item = (SeatRef, u64)> + '_ {
        self.words.iter().enumerate().map(|(index, word)| {
            let coach = index as u32 / self.seats_per_coach + 1;
            let seat = index as u32 % self.seats_per_coach + 1;
            (SeatRef::new(coach, seat), word.load(Ordering::Acquire))
        })
    }
}
