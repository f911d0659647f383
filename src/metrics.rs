use std::sync::LazyLock;

use prometheus::*;

static METRIC_QUERY_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imprint_query_count",
        "count of the fingerprint queries",
        &["kind"]
    )
    .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imprint_query_duration",
        "duration of the per-query ranking in seconds",
        &["kind"]
    )
    .unwrap()
});

static METRIC_QUERY_TOP_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imprint_query_top_score",
        "top score of the per-query result",
        &["kind"],
        (0..=20).map(|x| x as f64 / 20.0).collect()
    )
    .unwrap()
});

/// 增加查询计数，kind 为 exact 或 similar
pub fn inc_query_count(kind: &str) {
    METRIC_QUERY_COUNT.with_label_values(&[kind]).inc();
}

pub fn observe_query_duration(kind: &str, duration: f32) {
    METRIC_QUERY_DURATION.with_label_values(&[kind]).observe(duration as f64);
}

pub fn observe_query_top_score(kind: &str, score: f32) {
    METRIC_QUERY_TOP_SCORE.with_label_values(&[kind]).observe(score as f64);
}
