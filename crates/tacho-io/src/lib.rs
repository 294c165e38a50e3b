pub mod format;
pub mod gpio;
pub mod metrics;
pub mod timer;

pub use format::{hostname, OutputMode, TextFormatter};
pub use gpio::{auto_detect, Chip, ChipInfo, GpioBank, GpioError, GpioLine};
pub use metrics::{init_metrics, serve_metrics, MetricsError, PrometheusObserver};
pub use timer::TimerFdWait;
