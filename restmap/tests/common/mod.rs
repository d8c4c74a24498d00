// Copyright 2024 Oxide Computer Company

//! Common facilities for automated testing.

use restmap::test_util::LogContext;
use restmap::test_util::TestContext;
use restmap::ConfigLogging;
use restmap::ConfigLoggingIfExists;
use restmap::ConfigLoggingLevel;
use restmap::ConfigServer;
use restmap::RestService;
use slog::o;

pub fn test_setup(test_name: &str, service: RestService) -> TestContext {
    // The default config binds 127.0.0.1 on port 0, which picks any available
    // port.  Tests run concurrently, so a fixed port would conflict.
    let config_server: ConfigServer = Default::default();

    let logctx = create_log_context(test_name);
    let log = logctx.log.new(o!());
    TestContext::new(service, &config_server, Some(logctx), log)
}

pub fn create_log_context(test_name: &str) -> LogContext {
    let log_config = ConfigLogging::File {
        level: ConfigLoggingLevel::Debug,
        path: "UNUSED".into(),
        if_exists: ConfigLoggingIfExists::Fail,
    };
    LogContext::new(test_name, &log_config)
}
