use std::sync::LazyLock;

use prometheus::*;

static METRIC_QUERY_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("sbir_query_count", "count of the queries by outcome", &["outcome"])
        .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("sbir_query_duration", "duration of the whole pipeline in seconds")
        .unwrap()
});

static METRIC_STAGE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "sbir_stage_duration",
        "duration of each pipeline stage in seconds",
        &["stage"],
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap()
});

/// 流水线的各个阶段
#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Preprocess,
    Embed,
    Search,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Embed => "embed",
            Self::Search => "search",
        }
    }
}

/// 增加查询计数，`outcome` 为 `ok` 或错误类型
pub fn inc_query_count(outcome: &str) {
    METRIC_QUERY_COUNT.with_label_values(&[outcome]).inc();
}

pub fn observe_query_duration(duration: f32) {
    METRIC_QUERY_DURATION.observe(duration as f64);
}

pub fn observe_stage_duration(stage: Stage, duration: f32) {
    METRIC_STAGE_DURATION.with_label_values(&[stage.as_str()]).observe(duration as f64);
}
