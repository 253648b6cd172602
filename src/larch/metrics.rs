use std::fmt;
use std::time::Duration;

/// Latency totals for one kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency {
    pub count: u64,
    pub total_ns: u64,
    pub max_ns: u64,
    pub min_ns: u64,
}

impl Default for Latency {
    fn default() -> Self {
        Self {
            count: 0,
            total_ns: 0,
            max_ns: 0,
            min_ns: u64::MAX,
        }
    }
}

impl Latency {
    pub fn record(&mut self, elapsed: Duration) {
        let ns = elapsed.as_nanos() as u64;
        self.count += 1;
        self.total_ns += ns;
        self.max_ns = self.max_ns.max(ns);
        self.min_ns = self.min_ns.min(ns);
    }

    pub fn merge(&mut self, other: &Latency) -> &mut Self {
        self.count += other.count;
        self.total_ns += other.total_ns;
        self.max_ns = self.max_ns.max(other.max_ns);
        self.min_ns = self.min_ns.min(other.min_ns);
        self
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total_ns as f64 / 1e6 / self.count as f64
    }

    /// Operations per millisecond of summed latency, scaled by the number of
    /// workers that produced them.
    pub fn qps(&self, workers: usize) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        // sub-millisecond totals count as one millisecond
        let millis = (self.total_ns as f64 / 1e6).max(1.0);
        self.count as f64 / millis * workers as f64
    }

    pub fn display(&self, workers: usize) -> LatencyDisplay<'_> {
        LatencyDisplay {
            latency: self,
            workers,
        }
    }
}

pub struct LatencyDisplay<'a> {
    latency: &'a Latency,
    workers: usize,
}

impl fmt::Display for LatencyDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min = if self.latency.count == 0 { 0 } else { self.latency.min_ns };
        write!(
            f,
            "count: {}, avg latency: {:.4} ms, max latency: {} ns, min latency: {} ns, QPS: {:.2} ops/ms",
            self.latency.count,
            self.latency.avg_ms(),
            self.latency.max_ns,
            min,
            self.latency.qps(self.workers)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub refund: Latency,
    pub buy: Latency,
    pub inquiry: Latency,
    pub no_ticket: u64,
}

impl Metrics {
    pub fn merge(&mut self, other: &Metrics) -> &mut Self {
        self.refund.merge(&other.refund);
        self.buy.merge(&other.buy);
        self.inquiry.merge(&other.inquiry);
        self.no_ticket += other.no_ticket;
        self
    }

    pub fn total(&self) -> Latency {
        let mut total = Latency::default();
        total.merge(&self.refund).merge(&self.buy).merge(&self.inquiry);
        total
    }

    pub fn report(&self, workers: usize) -> String {
        format!(
            "[[total]]\n{}\n[refund]\n{}\n[buy]\n{}\n[inquiry]\n{}\nno ticket count: {}\n",
            self.total().display(workers),
            self.refund.display(workers),
            self.buy.display(workers),
            self.inquiry.display(workers),
            self.no_ticket
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_extremes() {
        let mut latency = Latency::default();
        latency.record(Duration::from_nanos(300));
        latency.record(Duration::from_nanos(100));
        latency.record(Duration::from_nanos(200));
        assert_eq!(latency.count, 3);
        assert_eq!(latency.total_ns, 600);
        assert_eq!((latency.min_ns, latency.max_ns), (100, 300));
    }

    #[test]
    fn merge_with_empty_keeps_minimum() {
        let mut busy = Latency::default();
        busy.record(Duration::from_millis(2));
        busy.merge(&Latency::default());
        assert_eq!(busy.min_ns, 2_000_000);
        assert_eq!(busy.avg_ms(), 2.0);
        assert_eq!(busy.qps(4), 2.0);
    }

    #[test]
    fn idle_latency_does_not_divide_by_zero() {
        let idle = Latency::default();
        assert_eq!(idle.avg_ms(), 0.0);
        assert_eq!(idle.qps(1), 0.0);
        assert!(idle.display(1).to_string().contains("min latency: 0 ns"));
    }

    #[test]
    fn report_sums_every_kind() {
        let mut metrics = Metrics::default();
        metrics.buy.record(Duration::from_nanos(10));
        metrics.inquiry.record(Duration::from_nanos(20));
        metrics.no_ticket = 1;

        let mut other = Metrics::default();
        other.refund.record(Duration::from_nanos(30));
        other.no_ticket = 2;
        metrics.merge(&other);

        assert_eq!(metrics.total().count, 3);
        assert_eq!(metrics.total().max_ns, 30);
        let report = metrics.report(2);
        assert!(report.starts_with("[[total]]\ncount: 3,"));
        assert!(report.ends_with("no ticket count: 3\n"));
    }
}
