//! # Simulator Configuration
//!
//! Environment-based configuration, read once at startup and immutable
//! afterwards.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use swarm_domain::{Obstacle, Vec3, Workspace};

use crate::error::ConfigError;

/// Vehicle backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In-process simulated physics
    #[default]
    Mock,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "sim" | "simulated" => Ok(Self::Mock),
            other => Err(ConfigError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Engine response to a separation violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Warn and keep flying
    #[default]
    Log,
    /// Put both vehicles into `error`
    Escalate,
}

impl FromStr for CollisionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "warn" => Ok(Self::Log),
            "escalate" | "error" => Ok(Self::Escalate),
            other => Err(ConfigError::InvalidValue {
                key: "COLLISION_POLICY",
                value: other.to_string(),
                reason: "expected 'log' or 'escalate'".to_string(),
            }),
        }
    }
}

/// Battery model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryConfig {
    /// Percent per simulated second while airborne
    pub discharge_rate: f64,
    /// At or below this level a flying vehicle is sent to land
    pub low_threshold: f64,
    /// At or below this level the vehicle goes to `error`
    pub critical_threshold: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            discharge_rate: 100.0 / 420.0,
            low_threshold: 20.0,
            critical_threshold: 5.0,
        }
    }
}

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Vehicle backend
    pub backend: BackendKind,

    /// Upper bound for `createSwarm`
    pub max_vehicles: usize,

    /// Flight volume
    pub workspace: Workspace,

    /// Speed limit (m/s)
    pub max_speed: f64,

    /// Acceleration limit (m/s²)
    pub max_acceleration: f64,

    /// Simulated ticks per simulated second
    pub tick_rate_hz: f64,

    /// Wall-clock speed-up of the async runner
    pub speed_multiplier: f64,

    /// Minimum vehicle-to-vehicle distance
    pub min_separation: f64,

    /// Path-to-obstacle clearance used by the planner
    pub planner_safety_radius: f64,

    /// Ground grid spacing for new vehicles
    pub spawn_spacing: f64,

    pub battery: BatteryConfig,

    /// Standard deviation of the reported-position noise
    pub position_noise_std: f64,

    pub collision_policy: CollisionPolicy,

    /// Static obstacles every goto is planned around
    pub obstacles: Vec<Obstacle>,

    /// Fixed seed for reproducible noise
    pub rng_seed: Option<u64>,

    /// Recent positions kept per vehicle
    pub trail_capacity: usize,

    /// Logging level
    pub log_level: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mock,
            max_vehicles: 10,
            workspace: Workspace::symmetric(1.0, 1.0),
            max_speed: 1.0,
            max_acceleration: 2.0,
            tick_rate_hz: 20.0,
            speed_multiplier: 1.0,
            min_separation: 0.3,
            planner_safety_radius: 0.3,
            spawn_spacing: 0.5,
            battery: BatteryConfig::default(),
            position_noise_std: 0.01,
            collision_policy: CollisionPolicy::Log,
            obstacles: Vec::new(),
            rng_seed: None,
            trail_capacity: 200,
            log_level: "info".to_string(),
        }
    }
}

impl SimConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let half_extent = parse_or(&lookup, "WORKSPACE_HALF_EXTENT", 1.0)?;
        let max_height = parse_or(&lookup, "WORKSPACE_MAX_HEIGHT", 1.0)?;

        let config = Self {
            backend: match lookup("BACKEND") {
                Some(raw) => raw.parse()?,
                None => defaults.backend,
            },
            max_vehicles: parse_or(&lookup, "MAX_DRONES", defaults.max_vehicles)?,
            workspace: Workspace::symmetric(half_extent, max_height),
            max_speed: parse_or(&lookup, "MAX_SPEED", defaults.max_speed)?,
            max_acceleration: parse_or(&lookup, "MAX_ACCELERATION", defaults.max_acceleration)?,
            tick_rate_hz: parse_or(&lookup, "TICK_RATE_HZ", defaults.tick_rate_hz)?,
            speed_multiplier: parse_or(&lookup, "SIMULATION_SPEED", defaults.speed_multiplier)?,
            min_separation: parse_or(&lookup, "MIN_SEPARATION", defaults.min_separation)?,
            planner_safety_radius: parse_or(
                &lookup,
                "PLANNER_SAFETY_RADIUS",
                defaults.planner_safety_radius,
            )?,
            spawn_spacing: parse_or(&lookup, "SPAWN_SPACING", defaults.spawn_spacing)?,
            battery: BatteryConfig {
                discharge_rate: parse_or(
                    &lookup,
                    "BATTERY_DISCHARGE_RATE",
                    defaults.battery.discharge_rate,
                )?,
                low_threshold: parse_or(
                    &lookup,
                    "BATTERY_LOW_THRESHOLD",
                    defaults.battery.low_threshold,
                )?,
                critical_threshold: parse_or(
                    &lookup,
                    "BATTERY_CRITICAL_THRESHOLD",
                    defaults.battery.critical_threshold,
                )?,
            },
            position_noise_std: parse_or(
                &lookup,
                "POSITION_NOISE_STD",
                defaults.position_noise_std,
            )?,
            collision_policy: parse_or(&lookup, "COLLISION_POLICY", defaults.collision_policy)?,
            obstacles: match lookup("OBSTACLES") {
                Some(raw) => parse_obstacles(&raw)?,
                None => Vec::new(),
            },
            rng_seed: match lookup("RNG_SEED") {
                Some(raw) => Some(parse_value("RNG_SEED", &raw)?),
                None => None,
            },
            trail_capacity: parse_or(&lookup, "TRAIL_CAPACITY", defaults.trail_capacity)?,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("MAX_SPEED", self.max_speed)?;
        positive("MAX_ACCELERATION", self.max_acceleration)?;
        positive("TICK_RATE_HZ", self.tick_rate_hz)?;
        positive("SIMULATION_SPEED", self.speed_multiplier)?;
        positive("SPAWN_SPACING", self.spawn_spacing)?;
        positive("WORKSPACE_HALF_EXTENT", self.workspace.max.x - self.workspace.min.x)?;
        positive("WORKSPACE_MAX_HEIGHT", self.workspace.max.z - self.workspace.min.z)?;
        non_negative("MIN_SEPARATION", self.min_separation)?;
        non_negative("PLANNER_SAFETY_RADIUS", self.planner_safety_radius)?;
        non_negative("POSITION_NOISE_STD", self.position_noise_std)?;
        non_negative("BATTERY_DISCHARGE_RATE", self.battery.discharge_rate)?;
        self.wall_tick_interval()?;

        if self.max_vehicles == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_DRONES",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let BatteryConfig {
            low_threshold,
            critical_threshold,
            ..
        } = self.battery;
        if !(0.0..=100.0).contains(&critical_threshold)
            || !(0.0..=100.0).contains(&low_threshold)
            || critical_threshold > low_threshold
        {
            return Err(ConfigError::Inconsistent(format!(
                "battery thresholds must satisfy 0 <= critical ({critical_threshold}) <= low ({low_threshold}) <= 100"
            )));
        }

        if let Some(bad) = self
            .obstacles
            .iter()
            .find(|o| !o.center.is_finite() || !o.radius.is_finite() || o.radius < 0.0)
        {
            return Err(ConfigError::Inconsistent(format!(
                "obstacle at {} has an invalid radius {}",
                bad.center, bad.radius
            )));
        }

        Ok(())
    }

    /// Simulated seconds per tick
    #[must_use]
    pub fn tick_dt(&self) -> f64 {
        1.0 / self.tick_rate_hz
    }

    /// Wall-clock period of the async runner. Fails when the period rounds
    /// to zero or does not fit in a `Duration`.
    pub fn wall_tick_interval(&self) -> Result<Duration, ConfigError> {
        let seconds = self.tick_dt() / self.speed_multiplier;
        match Duration::try_from_secs_f64(seconds) {
            Ok(period) if !period.is_zero() => Ok(period),
            Ok(_) => Err(ConfigError::InvalidValue {
                key: "SIMULATION_SPEED",
                value: self.speed_multiplier.to_string(),
                reason: format!("wall tick period of {seconds} s rounds to zero"),
            }),
            Err(err) => Err(ConfigError::InvalidValue {
                key: "TICK_RATE_HZ",
                value: self.tick_rate_hz.to_string(),
                reason: format!("wall tick period of {seconds} s is not representable: {err}"),
            }),
        }
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(Ok(default), |raw| parse_value(key, &raw))
}

fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be a positive number".to_string(),
        })
    }
}

fn non_negative(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be zero or positive".to_string(),
        })
    }
}

/// Parse `x,y,z[,r];x,y,z[,r];...`. A missing radius means a point obstacle.
pub fn parse_obstacles(raw: &str) -> Result<Vec<Obstacle>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let values = entry
                .split(',')
                .map(|v| parse_value::<f64>("OBSTACLES", v))
                .collect::<Result<Vec<_>, _>>()?;
            match values.as_slice() {
                [x, y, z] => Ok(Obstacle::point(Vec3::new(*x, *y, *z))),
                [x, y, z, r] => Ok(Obstacle::new(Vec3::new(*x, *y, *z), *r)),
                _ => Err(ConfigError::InvalidValue {
                    key: "OBSTACLES",
                    value: entry.to_string(),
                    reason: "expected x,y,z or x,y,z,r".to_string(),
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SimConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.backend, BackendKind::Mock);
        assert_eq!(config.max_vehicles, 10);
        assert!((config.tick_dt() - 0.05).abs() < 1e-12);
        assert!((config.min_separation - 0.3).abs() < 1e-12);
        assert_eq!(config.collision_policy, CollisionPolicy::Log);
        assert!(config.obstacles.is_empty());
        assert_eq!(config.wall_tick_interval().unwrap().as_micros(), 50_000);
    }

    #[test]
    fn test_overrides() {
        let config = SimConfig::from_lookup(lookup_from(&[
            ("MAX_DRONES", "4"),
            ("SIMULATION_SPEED", "2.0"),
            ("COLLISION_POLICY", "escalate"),
            ("RNG_SEED", "42"),
            ("OBSTACLES", "0,0,0.5,0.1; 0.5,0.5,0.5"),
        ]))
        .unwrap();

        assert_eq!(config.max_vehicles, 4);
        assert_eq!(config.collision_policy, CollisionPolicy::Escalate);
        assert_eq!(config.rng_seed, Some(42));
        assert_eq!(config.obstacles.len(), 2);
        assert!((config.obstacles[0].radius - 0.1).abs() < 1e-12);
        assert_eq!(config.wall_tick_interval().unwrap().as_micros(), 25_000);
    }

    #[test]
    fn test_unsupported_backend() {
        let err = SimConfig::from_lookup(lookup_from(&[("BACKEND", "ros2")])).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedBackend("ros2".to_string()));
    }

    #[test]
    fn test_invalid_values() {
        assert!(SimConfig::from_lookup(lookup_from(&[("MAX_SPEED", "fast")])).is_err());
        assert!(SimConfig::from_lookup(lookup_from(&[("MAX_SPEED", "-1")])).is_err());
        assert!(SimConfig::from_lookup(lookup_from(&[("MAX_DRONES", "0")])).is_err());
        assert!(SimConfig::from_lookup(lookup_from(&[("OBSTACLES", "1,2")])).is_err());
        assert!(
            SimConfig::from_lookup(lookup_from(&[
                ("BATTERY_LOW_THRESHOLD", "5"),
                ("BATTERY_CRITICAL_THRESHOLD", "10"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn test_tick_period_must_be_representable() {
        let err = SimConfig::from_lookup(lookup_from(&[("SIMULATION_SPEED", "1e12")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "SIMULATION_SPEED", .. }));

        let err = SimConfig::from_lookup(lookup_from(&[("TICK_RATE_HZ", "1e-30")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "TICK_RATE_HZ", .. }));

        // Slow but valid
        let config = SimConfig::from_lookup(lookup_from(&[("SIMULATION_SPEED", "0.001")])).unwrap();
        assert_eq!(config.wall_tick_interval().unwrap().as_secs(), 50);

        // Hand-built configs are caught before a loop can start
        let config = SimConfig {
            speed_multiplier: 1e12,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_obstacles_skips_empty_entries() {
        let obstacles = parse_obstacles("1,0,0.5;;").unwrap();
        assert_eq!(obstacles, vec![Obstacle::point(Vec3::new(1.0, 0.0, 0.5))]);
        assert!(parse_obstacles("").unwrap().is_empty());
    }
}
