use crate::stats::RpmStats;

/// One channel's result as handed to the formatter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub line: u32,
    pub rpm: f64,
    /// Running statistics, present in watch mode only.
    pub stats: Option<RpmStats>,
}

/// Turns readings into output records. Every returned record ends with a
/// newline.
pub trait OutputFormatter: Send {
    fn format(&self, reading: &Reading) -> String;

    /// One aggregate record for several channels, or `None` if the encoding
    /// has no grouped form.
    fn format_group(&self, _readings: &[Reading]) -> Option<String> {
        None
    }
}

/// Render one round: grouped when more than one channel was declared and the
/// encoding supports it, otherwise one record per reading.
pub fn render_round(formatter: &dyn OutputFormatter, declared: usize, readings: &[Reading]) -> String {
    if readings.is_empty() {
        return String::new();
    }
    if declared > 1 {
        if let Some(group) = formatter.format_group(readings) {
            return group;
        }
    }
    readings.iter().map(|r| formatter.format(r)).collect()
}
