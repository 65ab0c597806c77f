//! Process-wide configuration, set exactly once.
//!
//! Everything else — chunk size, compression type, thread count — is
//! passed explicitly into [`crate::Wim`]/write-option structs rather than
//! living here. This module holds only the three globals meant to be
//! process-wide: a SHA-1 backend choice, an optional allocator override,
//! and an optional error-printing toggle.

use std::sync::OnceLock;

/// Which SHA-1 implementation `wim-format::sha1_hash` should prefer.
///
/// `wim-format` always uses the `sha1` crate's software implementation
/// today; this enum exists so a future hardware-accelerated backend can be
/// selected without changing every call site, as the one process-wide
/// SHA-1 backend selection.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Sha1Backend {
    /// The `sha1` crate's portable implementation.
    #[default]
    Software,
}

/// Global configuration, set once via [`init`].
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Selected SHA-1 backend.
    pub sha1_backend: Sha1Backend,
    /// If set, library errors are also printed to stderr as they are
    /// raised, in addition to being returned to the caller.
    pub print_errors: bool,
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Sets the process-wide configuration. Must be called at most once;
/// subsequent calls are ignored (the first caller wins), per the
/// "set exactly once at init" contract any process-wide setting follows.
pub fn init(config: Config) {
    let _ = CONFIG.set(config);
}

/// Reads the current process-wide configuration, or the default if
/// [`init`] was never called.
pub fn current() -> Config {
    CONFIG.get().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_uninitialized() {
        // Other tests in this binary may have already called `init`;
        // this only checks that `current` never panics and returns
        // *some* config.
        let cfg = current();
        let _ = cfg.sha1_backend;
    }
}
