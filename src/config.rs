use crate::types::{ColorFormat, DepthFormat, DriverLogLevel, Resolution};
use std::time::Duration;

/// Everything needed to bring a session up.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Which attached device to claim.
    pub device_index: u32,
    pub resolution: Resolution,
    pub color_format: ColorFormat,
    pub depth_format: DepthFormat,
    /// Pause between event-processing calls.
    pub pump_idle: Duration,
    /// Largest accepted arrival gap within a pair. `None` pairs the latest
    /// of each stream regardless of age.
    pub max_skew: Option<Duration>,
    pub driver_log_level: DriverLogLevel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            resolution: Resolution::Medium,
            color_format: ColorFormat::Rgb8,
            depth_format: DepthFormat::Depth16,
            pump_idle: Duration::from_millis(2),
            max_skew: None,
            driver_log_level: DriverLogLevel::Warning,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `RGBD_*` environment variables.
    ///
    /// - `RGBD_DEVICE_INDEX`
    /// - `RGBD_RESOLUTION`: `low`, `medium`, `high`
    /// - `RGBD_COLOR_FORMAT`: `rgb`, `yuv`
    /// - `RGBD_DEPTH_FORMAT`: `mm`, `registered`
    /// - `RGBD_PUMP_IDLE_MS`
    /// - `RGBD_MAX_SKEW_MS`: `0` disables the bound
    /// - `RGBD_DRIVER_LOG`: `fatal`, `error`, `warning`, `notice`, `info`, `debug`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_skew_ms = read_parsed(&lookup, "RGBD_MAX_SKEW_MS", 0u64);

        Self {
            device_index: read_parsed(&lookup, "RGBD_DEVICE_INDEX", defaults.device_index),
            resolution: read_choice(
                &lookup,
                "RGBD_RESOLUTION",
                defaults.resolution,
                |v| match v {
                    "low" => Some(Resolution::Low),
                    "medium" => Some(Resolution::Medium),
                    "high" => Some(Resolution::High),
                    _ => None,
                },
            ),
            color_format: read_choice(
                &lookup,
                "RGBD_COLOR_FORMAT",
                defaults.color_format,
                |v| match v {
                    "rgb" => Some(ColorFormat::Rgb8),
                    "yuv" => Some(ColorFormat::YuvRgb),
                    _ => None,
                },
            ),
            depth_format: read_choice(
                &lookup,
                "RGBD_DEPTH_FORMAT",
                defaults.depth_format,
                |v| match v {
                    "mm" => Some(DepthFormat::Depth16),
                    "registered" => Some(DepthFormat::Registered),
                    _ => None,
                },
            ),
            pump_idle: Duration::from_millis(read_parsed(
                &lookup,
                "RGBD_PUMP_IDLE_MS",
                defaults.pump_idle.as_millis() as u64,
            )),
            max_skew: (max_skew_ms > 0).then(|| Duration::from_millis(max_skew_ms)),
            driver_log_level: read_choice(
                &lookup,
                "RGBD_DRIVER_LOG",
                defaults.driver_log_level,
                |v| match v {
                    "fatal" => Some(DriverLogLevel::Fatal),
                    "error" => Some(DriverLogLevel::Error),
                    "warning" => Some(DriverLogLevel::Warning),
                    "notice" => Some(DriverLogLevel::Notice),
                    "info" => Some(DriverLogLevel::Info),
                    "debug" => Some(DriverLogLevel::Debug),
                    _ => None,
                },
            ),
        }
    }
}

fn read_parsed<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy + std::fmt::Debug,
{
    match lookup(name) {
        Some(v) if !v.trim().is_empty() => v.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("Ignoring {}='{}', using {:?}", name, v, default);
            default
        }),
        _ => default,
    }
}

fn read_choice<F, T, P>(lookup: &F, name: &str, default: T, parse: P) -> T
where
    F: Fn(&str) -> Option<String>,
    T: Copy + std::fmt::Debug,
    P: Fn(&str) -> Option<T>,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    let v = raw.trim().to_ascii_lowercase();
    if v.is_empty() {
        return default;
    }
    parse(&v).unwrap_or_else(|| {
        log::warn!("Unknown {}='{}', using {:?}", name, raw, default);
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> SessionConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        assert_eq!(config(&[]), SessionConfig::default());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("RGBD_DEVICE_INDEX", "2"),
            ("RGBD_RESOLUTION", "High"),
            ("RGBD_COLOR_FORMAT", "yuv"),
            ("RGBD_DEPTH_FORMAT", " registered "),
            ("RGBD_PUMP_IDLE_MS", "5"),
            ("RGBD_MAX_SKEW_MS", "33"),
            ("RGBD_DRIVER_LOG", "debug"),
        ]);
        assert_eq!(cfg.device_index, 2);
        assert_eq!(cfg.resolution, Resolution::High);
        assert_eq!(cfg.color_format, ColorFormat::YuvRgb);
        assert_eq!(cfg.depth_format, DepthFormat::Registered);
        assert_eq!(cfg.pump_idle, Duration::from_millis(5));
        assert_eq!(cfg.max_skew, Some(Duration::from_millis(33)));
        assert_eq!(cfg.driver_log_level, DriverLogLevel::Debug);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg = config(&[
            ("RGBD_DEVICE_INDEX", "first"),
            ("RGBD_RESOLUTION", "4k"),
            ("RGBD_MAX_SKEW_MS", "0"),
        ]);
        assert_eq!(cfg.device_index, 0);
        assert_eq!(cfg.resolution, Resolution::Medium);
        assert_eq!(cfg.max_skew, None);
    }
}
