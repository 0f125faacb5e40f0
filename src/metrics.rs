use std::{net::SocketAddr, time::Instant};

use metrics::{describe_counter, describe_gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install and start a prometheus http exporter listening on `metrics_addr` and
/// defines all metrics.
pub fn install_prom(metrics_addr: &str) -> anyhow::Result<()> {
    let metrics_addr: SocketAddr = metrics_addr.parse()?;

    // discovery round trips are usually a few millis but can stall for the
    // full request deadline. start at 250 micros and double up to ~8s.
    const US_PER_SEC: f64 = 1000000.0;
    let buckets: Vec<f64> = (0..16)
        .map(|i| (2u32.pow(i) as f64) * 250.0 / US_PER_SEC)
        .collect();

    let builder = PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .set_buckets(&buckets)?;
    builder.install()?;

    describe_metrics();

    Ok(())
}

fn describe_metrics() {
    describe_timer!(
        "xds.request_time",
        "Time to complete a single discovery request/response (seconds)",
    );
    describe_timer!(
        "config.refresh_time",
        "Time to pull and diff a configuration source (seconds)",
    );
    describe_counter!(
        "xds.requests",
        "The total number of discovery requests, by type and result"
    );
    describe_counter!(
        "config.events",
        "The total number of configuration change events generated"
    );
    describe_counter!(
        "egress.rejected",
        "The total number of egress rule sets that failed validation"
    );
    describe_gauge!(
        "cache.egress_rules",
        "The number of keys in the egress rule cache"
    );
    describe_gauge!(
        "cache.endpoint_subsets",
        "The number of clusters in the endpoint subset cache"
    );
}

/// Describe a timer. Shorthand for `describe_histogram!(name, Unit::Seconds,
/// description)` so you don't have to remember what units timers are in.
macro_rules! describe_timer {
    ($name:expr, $description:expr $(,)?) => {{
        ::metrics::describe_histogram!($name, ::metrics::Unit::Seconds, $description)
    }};
}
pub(crate) use describe_timer;

/// Creates a timer that runs until it goes out of scope. Timed values are
/// tracked with a metrics histogram and assumes that durations are recorded as
/// an f64 number of seconds.
macro_rules! scoped_timer {
    ($name:expr $(, $label_key:expr $(=> $label_value:expr)?)* $(,)?) => {{
        let hist = ::metrics::histogram!($name $(, $label_key $(=> $label_value)?)*);
        crate::metrics::TimerGuard::new_at(hist, std::time::Instant::now())
    }};
}
pub(crate) use scoped_timer;

/// An RAII timer guard that records its duration on drop.
///
/// Created with [scoped_timer].
pub(crate) struct TimerGuard {
    hist: Histogram,
    started_at: Instant,
}

impl TimerGuard {
    pub(crate) fn new_at(hist: Histogram, started_at: Instant) -> Self {
        Self { hist, started_at }
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.hist.record(self.started_at.elapsed().as_secs_f64());
    }
}
