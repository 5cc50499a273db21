#![forbid(unsafe_code)]

//! Process-wide engine configuration.
//!
//! The only knob is the default delivery mode used by
//! [`Notifier::to_event`](crate::Notifier::to_event) when the caller passes
//! [`Delivery::Default`](crate::Delivery::Default). Individual calls can
//! always override it.
//!
//! # Environment
//!
//! [`EngineConfig::from_env`] reads `OBSERVA_DEFERRED_DELIVERY`; `1` or `true`
//! (any case) enables deferred delivery.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

/// Environment variable consulted by [`EngineConfig::from_env`].
pub const ENV_DEFERRED_DELIVERY: &str = "OBSERVA_DEFERRED_DELIVERY";

static DEFERRED_DELIVERY: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineConfig {
    /// Queue notifications for [`flush_deferred`](crate::flush_deferred)
    /// instead of delivering them inline.
    pub deferred_delivery: bool,
}

impl EngineConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            deferred_delivery: false,
        }
    }

    #[must_use]
    pub const fn with_deferred_delivery(mut self, enabled: bool) -> Self {
        self.deferred_delivery = enabled;
        self
    }

    /// Defaults overridden by environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    /// name.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        if let Some(val) = lookup(ENV_DEFERRED_DELIVERY) {
            config.deferred_delivery = parse_flag(&val);
        }
        config
    }

    /// Make this configuration the process-wide default.
    pub fn install(self) {
        DEFERRED_DELIVERY.store(self.deferred_delivery, Ordering::Relaxed);
        tracing::debug!(
            deferred_delivery = self.deferred_delivery,
            "engine config installed"
        );
    }

    /// The currently installed configuration.
    #[must_use]
    pub fn current() -> Self {
        Self {
            deferred_delivery: DEFERRED_DELIVERY.load(Ordering::Relaxed),
        }
    }
}

fn parse_flag(val: &str) -> bool {
    let val = val.trim();
    val == "1" || val.eq_ignore_ascii_case("true")
}
