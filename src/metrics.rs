//metrics.rs
use lazy_static::lazy_static;
use prometheus::{register_counter, register_histogram, Counter, Histogram, HistogramOpts, Opts};

lazy_static! {
    // Editor metrics
    pub static ref POSTS_CREATED: Counter = register_counter!(Opts::new(
        "posts_created_total",
        "Total number of posts saved from the console"
    ))
    .unwrap();

    pub static ref CATEGORY_REPAIRS: Counter = register_counter!(Opts::new(
        "category_repairs_total",
        "Total number of category repair passes"
    ))
    .unwrap();

    pub static ref CATEGORY_WRITES: Counter = register_counter!(Opts::new(
        "category_writes_total",
        "Total number of category rows written or deleted"
    ))
    .unwrap();

    // Notification metrics
    pub static ref NOTIFICATIONS_SENT: Counter = register_counter!(Opts::new(
        "notifications_sent_total",
        "Total number of notifications sent"
    ))
    .unwrap();

    pub static ref NOTIFICATIONS_FAILED: Counter = register_counter!(Opts::new(
        "notifications_failed_total",
        "Total number of notifications that failed"
    ))
    .unwrap();

    pub static ref DISPATCH_TIME: Histogram = register_histogram!(
        HistogramOpts::new(
            "notification_dispatch_time_seconds",
            "Time taken by the push provider to accept a notification"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    )
    .unwrap();

    // Payment metrics
    pub static ref PAYMENT_LINKS_CREATED: Counter = register_counter!(Opts::new(
        "payment_links_created_total",
        "Total number of payment links issued"
    ))
    .unwrap();

    pub static ref PAYMENT_STATUS_CACHE_HITS: Counter = register_counter!(Opts::new(
        "payment_status_cache_hits_total",
        "Total number of payment status cache hits"
    ))
    .unwrap();

    pub static ref PAYMENT_STATUS_CACHE_MISSES: Counter = register_counter!(Opts::new(
        "payment_status_cache_misses_total",
        "Total number of payment status cache misses"
    ))
    .unwrap();
}

// Function to expose metrics endpoint
pub fn metrics_handler() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return format!("Error encoding metrics: {}", e);
    }

    match String::from_utf8(buffer) {
        Ok(metrics) => metrics,
        Err(e) => format!("Error converting metrics to string: {}", e),
    }
}
