use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    submitted_total: AtomicU64,
    started_total: AtomicU64,
    completed_total: AtomicU64,
    compile_failed_total: AtomicU64,
    timed_out_total: AtomicU64,
    faulted_total: AtomicU64,
    in_flight: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) {
        self.submitted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn started(&self) {
        self.started_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) {
        self.completed_total.fetch_add(1, Ordering::Relaxed);
        self.decrement_in_flight();
    }

    pub fn compile_failed(&self) {
        self.compile_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timed_out(&self) {
        self.timed_out_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn faulted(&self) {
        self.faulted_total.fetch_add(1, Ordering::Relaxed);
        self.decrement_in_flight();
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE job_submitted_total counter\n",
                "job_submitted_total {}\n",
                "# TYPE job_started_total counter\n",
                "job_started_total {}\n",
                "# TYPE job_completed_total counter\n",
                "job_completed_total {}\n",
                "# TYPE job_compile_failed_total counter\n",
                "job_compile_failed_total {}\n",
                "# TYPE job_timed_out_total counter\n",
                "job_timed_out_total {}\n",
                "# TYPE job_faulted_total counter\n",
                "job_faulted_total {}\n",
                "# TYPE jobs_in_flight gauge\n",
                "jobs_in_flight {}\n"
            ),
            self.submitted_total.load(Ordering::Relaxed),
            self.started_total.load(Ordering::Relaxed),
            self.completed_total.load(Ordering::Relaxed),
            self.compile_failed_total.load(Ordering::Relaxed),
            self.timed_out_total.load(Ordering::Relaxed),
            self.faulted_total.load(Ordering::Relaxed),
            self.in_flight.load(Ordering::Relaxed),
        )
    }

    fn decrement_in_flight(&self) {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        while current > 0 {
            match self.in_flight.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}
