//! Runtime options.
//!
//! Compile-time tunables (slot counts, bit widths, trace geometry) live in
//! `racescope-common`; everything a deployment may want to vary without
//! rebuilding is here. Options are bound once at `Detector::new` and read
//! from the `RACESCOPE_OPTIONS` environment variable in the embedding
//! case, where the target program cannot pass a struct.

/// Runtime configuration, bound at detector construction.
#[derive(Debug, Clone)]
pub struct Options {
    /// Allow `mutex_lock` to conjure a sync object for an address that
    /// was never `mutex_create`d. Matches how statically initialized
    /// mutexes reach the runtime without a create call.
    pub lazy_mutex_init: bool,
    /// Emit a diagnostic whenever the lazy-init path runs. Useful for
    /// flushing out mutexes whose create call the interceptors missed.
    pub strict_mutex_init: bool,
    /// How many finished threads' traces to retain for post-mortem stack
    /// reconstruction.
    pub max_dead_threads: usize,
    /// Process exit code `finalize` returns when at least one race was
    /// reported.
    pub exit_code: i32,
    /// log2 of the number of shadow lines. Each line costs 72 bytes.
    pub shadow_lines_log2: u8,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            lazy_mutex_init: true,
            strict_mutex_init: false,
            max_dead_threads: 64,
            exit_code: 66,
            shadow_lines_log2: 17,
        }
    }
}

impl Options {
    /// Parse `RACESCOPE_OPTIONS`, a comma-separated `key=value` list, on
    /// top of the defaults. Unknown keys and malformed values are logged
    /// and skipped; options parsing must never take the process down.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("RACESCOPE_OPTIONS") {
            Ok(spec) => Self::parse(&spec),
            Err(_) => Options::default(),
        }
    }

    /// Parse an option string on top of the defaults.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        let mut opts = Options::default();
        for item in spec.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let Some((key, value)) = item.split_once('=') else {
                log::warn!("ignoring malformed option {item:?}");
                continue;
            };
            let ok = match key.trim() {
                "lazy_mutex_init" => parse_bool(value, &mut opts.lazy_mutex_init),
                "strict_mutex_init" => parse_bool(value, &mut opts.strict_mutex_init),
                "max_dead_threads" => parse_num(value, &mut opts.max_dead_threads),
                "exit_code" => parse_num(value, &mut opts.exit_code),
                "shadow_lines_log2" => parse_num(value, &mut opts.shadow_lines_log2),
                other => {
                    log::warn!("ignoring unknown option {other:?}");
                    continue;
                }
            };
            if !ok {
                log::warn!("ignoring bad value for option {key:?}: {value:?}");
            }
        }
        opts
    }
}

fn parse_bool(value: &str, out: &mut bool) -> bool {
    match value.trim() {
        "1" | "true" | "yes" => *out = true,
        "0" | "false" | "no" => *out = false,
        _ => return false,
    }
    true
}

fn parse_num<T: std::str::FromStr>(value: &str, out: &mut T) -> bool {
    match value.trim().parse() {
        Ok(v) => {
            *out = v;
            true
        }
        Err(_) => false,
    }
}
