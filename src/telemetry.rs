//! Tracing setup for the binary.
//!
//! `RUST_LOG` controls verbosity; without it the crate logs at `info` and dependencies at
//! `warn`. `LOG_FORMAT=json` switches to one JSON object per line.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    name: Option<&'static str>,
    version: Option<&'static str>,
}

/// Handle returned by [`Telemetry::register`].
#[derive(Debug)]
pub struct TelemetryProviders {
    pub name: &'static str,
    pub version: &'static str,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = Some(version);
        self
    }

    fn default_directives(&self) -> String {
        let target = self.name.unwrap_or("batch_donations").replace('-', "_");
        format!("warn,{target}=info,batch_donations=info")
    }

    /// Install the global subscriber. Only the first call in a process takes effect.
    pub fn register(self) -> TelemetryProviders {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directives()));
        let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

        let registry = tracing_subscriber::registry().with(filter);
        let result = if json {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer().with_target(true)).try_init()
        };

        let providers = TelemetryProviders {
            name: self.name.unwrap_or(env!("CARGO_PKG_NAME")),
            version: self.version.unwrap_or(env!("CARGO_PKG_VERSION")),
        };
        // A subscriber installed earlier in the process keeps receiving events.
        if result.is_ok() {
            tracing::info!(
                name = providers.name,
                version = providers.version,
                "telemetry initialized"
            );
        }
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_use_crate_target() {
        let telemetry = Telemetry::new().with_name("batch-donate");
        assert_eq!(
            telemetry.default_directives(),
            "warn,batch_donate=info,batch_donations=info"
        );
    }

    #[test]
    fn test_register_twice_does_not_panic() {
        let first = Telemetry::new().with_name("batch-donations").with_version("0.1.0").register();
        let second = Telemetry::new().register();
        assert_eq!(first.version, "0.1.0");
        assert_eq!(second.name, env!("CARGO_PKG_NAME"));
    }
}
