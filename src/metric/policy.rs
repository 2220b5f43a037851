use crate::{link::Counters, utils::humanize_size};
use std::{fmt::Display, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("unknown metric policy {0:?}, expected one of bandwidth-ema, byte-rate-ema, raw-windowed-diff")]
pub struct PolicyParseError(pub String);

/// 每个 tick 如何把累计计数变成发布到共享表的值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MetricPolicy {
    /// tx+rx，平滑后以 Mbit/s 发布
    #[default]
    BandwidthEma,
    /// tx+rx，平滑后以 B/s 发布
    ByteRateEma,
    /// 仅 tx，窗口内的原始差值，不平滑
    RawWindowedDiff,
}

/// 相邻两次采样之间的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delta {
    /// 计数正常增长
    Rate(f64),
    /// 计数回退（接口被重置），速率按 0 处理
    Reset { previous: u64, current: u64 },
}

impl Delta {
    pub fn rate(&self) -> f64 {
        match self {
            Delta::Rate(rate) => *rate,
            Delta::Reset { .. } => 0.0,
        }
    }
}

impl MetricPolicy {
    pub fn counter(&self, counters: &Counters) -> u64 {
        match self {
            MetricPolicy::BandwidthEma | MetricPolicy::ByteRateEma => {
                counters.tx_bytes.saturating_add(counters.rx_bytes)
            }
            MetricPolicy::RawWindowedDiff => counters.tx_bytes,
        }
    }

    #[inline]
    pub fn is_smoothed(&self) -> bool {
        !matches!(self, MetricPolicy::RawWindowedDiff)
    }

    /// elapsed 为 0 时速率记为 0
    pub fn delta(&self, previous: u64, current: u64, elapsed: Duration) -> Delta {
        let Some(diff) = current.checked_sub(previous) else {
            return Delta::Reset { previous, current };
        };
        match self {
            MetricPolicy::RawWindowedDiff => Delta::Rate(diff as f64),
            MetricPolicy::BandwidthEma | MetricPolicy::ByteRateEma => {
                let secs = elapsed.as_secs_f64();
                if secs > 0.0 {
                    Delta::Rate(diff as f64 / secs)
                } else {
                    Delta::Rate(0.0)
                }
            }
        }
    }

    /// 日志里展示的单条速率
    pub fn describe(&self, rate: f64) -> String {
        match self {
            MetricPolicy::RawWindowedDiff => format!("{} per window", humanize_size(rate as u64)),
            MetricPolicy::BandwidthEma | MetricPolicy::ByteRateEma => {
                format!("{}/s", humanize_size(rate as u64))
            }
        }
    }

    /// 单位换算后截断为共享表里的 u64
    pub fn publishable(&self, value: f64) -> u64 {
        let value = match self {
            MetricPolicy::BandwidthEma => value * 8.0 / 1e6,
            MetricPolicy::ByteRateEma | MetricPolicy::RawWindowedDiff => value,
        };
        // as 会把负数和 NaN 饱和到 0
        value as u64
    }
}

impl From<MetricPolicy> for &'static str {
    #[inline]
    fn from(policy: MetricPolicy) -> Self {
        match policy {
            MetricPolicy::BandwidthEma => "bandwidth-ema",
            MetricPolicy::ByteRateEma => "byte-rate-ema",
            MetricPolicy::RawWindowedDiff => "raw-windowed-diff",
        }
    }
}

impl Display for MetricPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: &'static str = (*self).into();
        write!(f, "{}", s)
    }
}

impl FromStr for MetricPolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bandwidth-ema" | "bandwidth" => Ok(MetricPolicy::BandwidthEma),
            "byte-rate-ema" | "byte-rate" => Ok(MetricPolicy::ByteRateEma),
            "raw-windowed-diff" | "raw" => Ok(MetricPolicy::RawWindowedDiff),
            _ => Err(PolicyParseError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_delta_over_elapsed() {
        let delta = MetricPolicy::ByteRateEma.delta(1000, 1500, Duration::from_secs(1));
        assert_eq!(delta, Delta::Rate(500.0));
        let delta = MetricPolicy::ByteRateEma.delta(1000, 1500, Duration::from_millis(250));
        assert_eq!(delta, Delta::Rate(2000.0));
    }

    #[test]
    fn counter_decrease_clamps_to_zero() {
        let delta = MetricPolicy::ByteRateEma.delta(1500, 1000, Duration::from_secs(1));
        assert_eq!(
            delta,
            Delta::Reset {
                previous: 1500,
                current: 1000
            }
        );
        assert_eq!(delta.rate(), 0.0);

        let delta = MetricPolicy::RawWindowedDiff.delta(u64::MAX, 0, Duration::from_secs(1));
        assert_eq!(delta.rate(), 0.0);
    }

    #[test]
    fn zero_elapsed_is_zero_rate() {
        let delta = MetricPolicy::BandwidthEma.delta(0, 10, Duration::ZERO);
        assert_eq!(delta, Delta::Rate(0.0));
    }

    #[test]
    fn raw_diff_is_not_divided() {
        let delta = MetricPolicy::RawWindowedDiff.delta(100, 400, Duration::from_secs(2));
        assert_eq!(delta, Delta::Rate(300.0));
        assert!(!MetricPolicy::RawWindowedDiff.is_smoothed());
    }

    #[test]
    fn counter_selection() {
        let counters = Counters {
            tx_bytes: 10,
            rx_bytes: 5,
        };
        assert_eq!(MetricPolicy::BandwidthEma.counter(&counters), 15);
        assert_eq!(MetricPolicy::ByteRateEma.counter(&counters), 15);
        assert_eq!(MetricPolicy::RawWindowedDiff.counter(&counters), 10);
    }

    #[test]
    fn bandwidth_published_in_megabits() {
        // 1.25 MB/s = 10 Mbit/s
        assert_eq!(MetricPolicy::BandwidthEma.publishable(1_250_000.0), 10);
        assert_eq!(MetricPolicy::ByteRateEma.publishable(1_250_000.9), 1_250_000);
        assert_eq!(MetricPolicy::ByteRateEma.publishable(-3.0), 0);
    }

    #[test]
    fn describe_uses_policy_unit() {
        assert_eq!(MetricPolicy::ByteRateEma.describe(2048.0), "2 KiB/s");
        assert_eq!(MetricPolicy::BandwidthEma.describe(10.0), "10 B/s");
        assert_eq!(MetricPolicy::RawWindowedDiff.describe(300.0), "300 B per window");
    }

    #[test]
    fn parse_round_trip() {
        for policy in [
            MetricPolicy::BandwidthEma,
            MetricPolicy::ByteRateEma,
            MetricPolicy::RawWindowedDiff,
        ] {
            assert_eq!(policy.to_string().parse::<MetricPolicy>(), Ok(policy));
        }
        assert_eq!(
            "nope".parse::<MetricPolicy>(),
            Err(PolicyParseError("nope".into()))
        );
    }
}
