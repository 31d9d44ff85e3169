//! Config for the tournament engine behaviors
//!
//! This module provides configuration options for controlling how workers are launched,
//! how long a strategy is given to answer, and how many turns every round plays.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive, set the value to `"true"` to enable a flag.
//!
//! - `IPD_VERBOSE`: Print match results to stdout (default: `false`)
//! - `IPD_LOG`: Enable logging to a file (default: `false`)
//! - `IPD_ALLOW_UNCONTAINED`: Run workers without cgroup when it cannot be created (default: `false`)
//! - `IPD_DEBUG_WORKER_STDERR`: Let workers write to stderr for debugging (default: `false`)
//! - `IPD_WORKER_RAM_MB`: Confine every worker in a cgroup with this much memory (default: unset)
//! - `IPD_MOVE_TIMEOUT_MS`: Time a worker is given to answer a turn (default: `100`)
//! - `IPD_NOISE`: Probability that a forwarded `C` is received as `D` (default: `0`)
//! - `IPD_TURNS`: Turns per round, `"200"` or an inclusive range `"150-250"` (default: `200`)

use std::time::Duration;

use rand::Rng;

/// How many turns the matches of a round play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnsPolicy {
    /// Every round plays exactly this many turns.
    Fixed(u32),
    /// Each round draws its turn count uniformly in `min..=max`.
    Uniform {
        /// Lower bound, inclusive.
        min: u32,
        /// Upper bound, inclusive.
        max: u32,
    },
}

impl TurnsPolicy {
    /// Turn count of the next round.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match *self {
            TurnsPolicy::Fixed(n) => n,
            TurnsPolicy::Uniform { min, max } => {
                let (low, high) = if min <= max { (min, max) } else { (max, min) };
                rng.gen_range(low..=high)
            }
        }
    }

    fn parse(s: &str) -> Option<TurnsPolicy> {
        match s.split_once('-') {
            Some((min, max)) => Some(TurnsPolicy::Uniform {
                min: min.trim().parse().ok()?,
                max: max.trim().parse().ok()?,
            }),
            None => s.trim().parse().ok().map(TurnsPolicy::Fixed),
        }
    }
}

impl Default for TurnsPolicy {
    fn default() -> Self {
        TurnsPolicy::Fixed(200)
    }
}

/// Configuration for the tournament engine.
#[derive(Debug, Clone, Copy)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) allow_uncontained: bool,
    pub(crate) debug_worker_stderr: bool,
    pub(crate) worker_ram: Option<usize>,
    pub(crate) move_timeout: Duration,
    pub(crate) noise: f64,
    pub(crate) turns: TurnsPolicy,
}

impl Configuration {
    /// Default answer window of a worker for one turn.
    pub const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_millis(100);

    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Match results are not printed.
    /// - Logging to file is disabled.
    /// - Workers are plain processes (no memory limit, so no cgroup).
    /// - Uncontained fallback is not allowed once a memory limit is set.
    /// - Worker stderr output is discarded.
    /// - Workers get 100 ms to answer a turn.
    /// - The channel between workers is noiseless.
    /// - Every round plays 200 turns.
    pub fn new() -> Self {
        Self {
            verbose: false,
            log: false,
            allow_uncontained: false,
            debug_worker_stderr: false,
            worker_ram: None,
            move_timeout: Self::DEFAULT_MOVE_TIMEOUT,
            noise: 0.0,
            turns: TurnsPolicy::default(), // default value
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Any invalid value
    /// (including unset) will result in using the default value for that field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let defaults = Self::new();
        Self {
            verbose: get_env_flag("IPD_VERBOSE", defaults.verbose),
            log: get_env_flag("IPD_LOG", defaults.log),
            allow_uncontained: get_env_flag("IPD_ALLOW_UNCONTAINED", defaults.allow_uncontained),
            debug_worker_stderr: get_env_flag(
                "IPD_DEBUG_WORKER_STDERR",
                defaults.debug_worker_stderr,
            ),
            worker_ram: get_env_parsed("IPD_WORKER_RAM_MB"),
            move_timeout: get_env_parsed("IPD_MOVE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.move_timeout),
            noise: get_env_parsed("IPD_NOISE")
                .map(clamp_probability)
                .unwrap_or(defaults.noise),
            turns: std::env::var("IPD_TURNS")
                .ok()
                .and_then(|s| TurnsPolicy::parse(&s))
                .unwrap_or(defaults.turns),
        }
    }

    /// Enable or disable printing of match results.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Allow workers to run without cgroup when the cgroup cannot be created.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    /// Enable or disable worker stderr output (debug purposes only).
    pub fn with_debug_worker_stderr(mut self, value: bool) -> Self {
        self.debug_worker_stderr = value;
        self
    }

    /// Confine each worker in a cgroup limited to `megabytes` of memory (Linux only).
    pub fn with_worker_ram(mut self, megabytes: usize) -> Self {
        self.worker_ram = Some(megabytes);
        self
    }

    /// Time a worker is given to answer one turn before its move defaults to `C`.
    pub fn with_move_timeout(mut self, timeout: Duration) -> Self {
        self.move_timeout = timeout;
        self
    }

    /// Probability that a forwarded `C` is received as `D` by the opponent. Clamped to `[0, 1]`.
    ///
    /// Only the transmitted token is corrupted, the recorded move stays accurate.
    pub fn with_noise(mut self, probability: f64) -> Self {
        self.noise = clamp_probability(probability);
        self
    }

    /// Set how many turns the matches of each round play.
    pub fn with_turns(mut self, turns: TurnsPolicy) -> Self {
        self.turns = turns;
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn defaults() {
        let config = Configuration::default();
        assert_eq!(config.move_timeout, Duration::from_millis(100));
        assert_eq!(config.turns, TurnsPolicy::Fixed(200));
        assert_eq!(config.noise, 0.0);
        assert!(config.worker_ram.is_none());
    }

    #[test]
    fn noise_is_clamped() {
        assert_eq!(Configuration::new().with_noise(2.0).noise, 1.0);
        assert_eq!(Configuration::new().with_noise(-1.0).noise, 0.0);
        assert_eq!(Configuration::new().with_noise(f64::NAN).noise, 0.0);
        assert_eq!(Configuration::new().with_noise(0.25).noise, 0.25);
    }

    #[test]
    fn turns_policy_parsing() {
        assert_eq!(TurnsPolicy::parse("200"), Some(TurnsPolicy::Fixed(200)));
        assert_eq!(
            TurnsPolicy::parse("150-250"),
            Some(TurnsPolicy::Uniform { min: 150, max: 250 })
        );
        assert_eq!(TurnsPolicy::parse("lots"), None);
        assert_eq!(TurnsPolicy::parse("1-x"), None);
    }

    #[test]
    fn uniform_turns_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = TurnsPolicy::Uniform { min: 10, max: 12 };
        for _ in 0..100 {
            let n = policy.sample(&mut rng);
            assert!((10..=12).contains(&n));
        }
        // swapped bounds are tolerated
        let swapped = TurnsPolicy::Uniform { min: 5, max: 3 };
        for _ in 0..100 {
            assert!((3..=5).contains(&swapped.sample(&mut rng)));
        }
        assert_eq!(TurnsPolicy::Fixed(4).sample(&mut rng), 4);
    }
}
