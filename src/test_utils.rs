//! Support code shared by the unit and integration tests.

/// Installs a tracing subscriber wired to the test harness writer.
///
/// The first caller wins and later calls do nothing, so every test can
/// invoke this unconditionally. With the `tracing` cargo feature
/// disabled there is nothing to install.
pub fn init_test_logging() {
    #[cfg(feature = "tracing")]
    {
        use std::sync::Once;
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .compact()
                .with_max_level(tracing::Level::DEBUG)
                .with_test_writer()
                .try_init();
        });
    }
}

/// Per-test entry point: logging setup plus a named start marker.
///
/// Unit tests call this once at the top; the marker makes interleaved
/// output attributable to the test that produced it.
pub fn begin(name: &str) {
    init_test_logging();
    let _ = name;
    crate::tracing_compat::info!(test = name, "begin");
}
