use std::sync::Once;

use vigil_config::{init_tracing, sanitize_error_message, VigilConfig};

use crate::pipeline::panic_message;

/// Initialize structured logging and install a process-wide panic hook.
///
/// Probe sites already isolate panics with `catch_unwind`; the hook records
/// everything else (the control thread, host code) through `tracing` before
/// the previous hook runs.
pub fn init(config: &VigilConfig) {
    init_tracing(&config.logging);
    install_panic_hook(config.logging.include_backtrace);
}

/// Chains a hook that logs panics at `error` under the `vigil.panic` target.
/// Only the first call installs anything.
pub fn install_panic_hook(include_backtrace: bool) {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            // Panic payloads often embed `Debug` output of serde errors,
            // which can quote config values.
            let message = sanitize_error_message(&panic_message(info.payload()));
            let location = info.location().map(|location| location.to_string());
            let backtrace = include_backtrace
                .then(|| std::backtrace::Backtrace::force_capture().to_string());
            let thread = std::thread::current();

            tracing::event!(
                target: "vigil.panic",
                tracing::Level::ERROR,
                panic.message = %message,
                panic.location = location.as_deref().unwrap_or("<unknown>"),
                panic.thread = thread.name().unwrap_or("<unnamed>"),
                panic.backtrace = backtrace.as_deref(),
                "panic captured"
            );
            previous(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_keeps_panics_catchable() {
        install_panic_hook(false);
        install_panic_hook(true);
        let result = std::panic::catch_unwind(|| panic!("expected test panic"));
        assert!(result.is_err());
    }
}
