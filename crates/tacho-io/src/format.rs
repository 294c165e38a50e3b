//! Text encodings for readings.

use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use tacho_core::{OutputFormatter, Reading, TimeBase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Human,
    Numeric,
    Json,
    Collectd,
}

/// JSON shape of one reading; statistics only appear in watch mode.
#[derive(Debug, Serialize)]
struct JsonRecord {
    gpio: u32,
    rpm: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avg: Option<i64>,
}

impl From<&Reading> for JsonRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            gpio: reading.line,
            rpm: rounded(reading.rpm),
            min: reading.stats.map(|s| rounded(s.min())),
            max: reading.stats.map(|s| rounded(s.max())),
            avg: reading.stats.map(|s| rounded(s.avg())),
        }
    }
}

fn rounded(value: f64) -> i64 {
    value.round() as i64
}

pub struct TextFormatter {
    mode: OutputMode,
    interval_secs: u64,
    hostname: String,
}

impl TextFormatter {
    /// `interval_secs` is the reporting interval announced to collectd.
    pub fn new(mode: OutputMode, interval_secs: u64) -> Self {
        let hostname = match mode {
            OutputMode::Collectd => hostname(),
            _ => String::new(),
        };
        Self {
            mode,
            interval_secs,
            hostname,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    fn format_at(&self, reading: &Reading, unix_secs: u64) -> String {
        match self.mode {
            OutputMode::Human => match reading.stats {
                Some(stats) => format!(
                    "GPIO{}: RPM: {:.0} (min: {:.0}, max: {:.0}, avg: {:.0})\n",
                    reading.line,
                    reading.rpm,
                    stats.min(),
                    stats.max(),
                    stats.avg()
                ),
                None => format!("GPIO{}: RPM: {:.0}\n", reading.line, reading.rpm),
            },
            OutputMode::Numeric => format!("{:.0}\n", reading.rpm),
            OutputMode::Json => {
                let mut text = json(&JsonRecord::from(reading));
                text.push('\n');
                text
            }
            OutputMode::Collectd => format!(
                "PUTVAL \"{}/gpio-fan-{}/gauge-rpm\" interval={} {}:{:.0}\n",
                self.hostname, reading.line, self.interval_secs, unix_secs, reading.rpm
            ),
        }
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, reading: &Reading) -> String {
        self.format_at(reading, TimeBase::unix_secs())
    }

    fn format_group(&self, readings: &[Reading]) -> Option<String> {
        if self.mode != OutputMode::Json {
            return None;
        }
        let records: Vec<JsonRecord> = readings.iter().map(JsonRecord::from).collect();
        let mut text = json(&records);
        text.push('\n');
        Some(text)
    }
}

fn json<T: Serialize>(value: &T) -> String {
    // Plain structs of integers always serialize.
    serde_json::to_string(value).unwrap_or_default()
}

/// Local host name, or `unknown` if it cannot be read.
pub fn hostname() -> String {
    let mut buf = [0 as libc::c_char; 256];
    // SAFETY: the buffer is valid for `len - 1` bytes and stays NUL-terminated.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len() - 1) };
    if rc != 0 {
        return "unknown".to_string();
    }
    // SAFETY: the last byte is never written, so the buffer holds a NUL.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    match name.to_str() {
        Ok(s) if !s.is_empty() => s.to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacho_core::{render_round, RpmStats};

    fn reading(line: u32, rpm: f64) -> Reading {
        Reading {
            line,
            rpm,
            stats: None,
        }
    }

    fn with_stats(line: u32, values: &[f64]) -> Reading {
        let mut stats = RpmStats::new();
        for v in values {
            stats.update(*v);
        }
        Reading {
            line,
            rpm: *values.last().unwrap(),
            stats: Some(stats),
        }
    }

    #[test]
    fn human_readable() {
        let f = TextFormatter::new(OutputMode::Human, 2);
        assert_eq!(f.format(&reading(17, 1199.6)), "GPIO17: RPM: 1200\n");
        assert_eq!(
            f.format(&with_stats(17, &[1180.0, 1230.0, 1193.0])),
            "GPIO17: RPM: 1193 (min: 1180, max: 1230, avg: 1201)\n"
        );
    }

    #[test]
    fn numeric_is_bare_value() {
        let f = TextFormatter::new(OutputMode::Numeric, 2);
        assert_eq!(f.format(&reading(17, 1200.2)), "1200\n");
        assert_eq!(f.format(&with_stats(17, &[900.0, 1000.0])), "1000\n");
    }

    #[test]
    fn json_rounds_to_integers() {
        let f = TextFormatter::new(OutputMode::Json, 2);
        assert_eq!(f.format(&reading(17, 1199.5)), "{\"gpio\":17,\"rpm\":1200}\n");
        assert_eq!(
            f.format(&with_stats(4, &[100.0, 140.0, 120.0])),
            "{\"gpio\":4,\"rpm\":120,\"min\":100,\"max\":140,\"avg\":120}\n"
        );
    }

    #[test]
    fn json_group_is_one_array() {
        let f = TextFormatter::new(OutputMode::Json, 2);
        let out = render_round(&f, 3, &[reading(17, 1200.0), reading(18, 900.4)]);
        assert_eq!(
            out,
            "[{\"gpio\":17,\"rpm\":1200},{\"gpio\":18,\"rpm\":900}]\n"
        );
        // a single declared channel keeps the plain object
        let out = render_round(&f, 1, &[reading(17, 1200.0)]);
        assert_eq!(out, "{\"gpio\":17,\"rpm\":1200}\n");
    }

    #[test]
    fn only_json_groups() {
        for mode in [OutputMode::Human, OutputMode::Numeric, OutputMode::Collectd] {
            let f = TextFormatter::new(mode, 2);
            assert!(f.format_group(&[reading(1, 1.0)]).is_none());
        }
    }

    #[test]
    fn collectd_putval() {
        let f = TextFormatter::new(OutputMode::Collectd, 5).with_hostname("fanbox");
        assert_eq!(
            f.format_at(&reading(17, 1200.3), 1_700_000_000),
            "PUTVAL \"fanbox/gpio-fan-17/gauge-rpm\" interval=5 1700000000:1200\n"
        );
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }
}
