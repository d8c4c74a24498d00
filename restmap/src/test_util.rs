// Copyright 2024 Oxide Computer Company

//! Automated testing facilities.  These are intended for use both by this crate
//! and dependents of this crate.

use bytes::Bytes;
use camino::Utf8PathBuf;
use chrono::DateTime;
use chrono::Utc;
use http::method::Method;
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::Request;
use hyper::Response;
use hyper::StatusCode;
use hyper::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use std::fmt::Debug;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use crate::client::DispatchClient;
use crate::config::ConfigServer;
use crate::definition::RestService;
use crate::error::HttpErrorResponseBody;
use crate::logging::ConfigLogging;
use crate::server::HttpServer;

/// List of allowed HTTP headers in responses.  This is used to make sure we
/// don't leak headers unexpectedly.
const ALLOWED_HEADER_NAMES: [&str; 6] = [
    "allow",
    "alternates",
    "content-length",
    "content-type",
    "date",
    "x-request-id",
];

/// ClientTestContext encapsulates several facilities associated with using an
/// HTTP client for testing.
pub struct ClientTestContext {
    /// actual bind address of the HTTP server under test
    pub bind_address: SocketAddr,
    /// HTTP client, used for making requests against the test server
    client: Client<HttpConnector, Full<Bytes>>,
    /// logger for the test suite HTTP client
    client_log: Logger,
}

impl ClientTestContext {
    /// Set up a `ClientTestContext` for running tests against a server.
    pub fn new(server_addr: SocketAddr, log: Logger) -> ClientTestContext {
        ClientTestContext {
            bind_address: server_addr,
            client: Client::builder(TokioExecutor::new()).build_http(),
            client_log: log,
        }
    }

    /// The base URL of the server, suitable for [`DispatchClient::new()`].
    pub fn base_url(&self) -> String {
        format!("http://{}", self.bind_address)
    }

    /// Given the path for a resource (e.g., "/projects"), return a Uri that
    /// we can use to invoke it from the client.
    pub fn url(&self, path: &str) -> Uri {
        Uri::builder()
            .scheme("http")
            .authority(format!("{}", self.bind_address).as_str())
            .path_and_query(path)
            .build()
            .expect("attempted to construct invalid URI")
    }

    /// Execute an HTTP request against the test server and perform basic
    /// validation of the result, including:
    ///
    /// - the expected status code
    /// - the expected Date header (within reason)
    /// - for error responses: the expected body content
    /// - header names are in allowed list
    /// - any other semantics that can be verified in general
    ///
    /// The body is sent as JSON.
    pub async fn make_request<RequestBodyType: Serialize + Debug>(
        &self,
        method: Method,
        path: &str,
        request_body: Option<RequestBodyType>,
        expected_status: StatusCode,
    ) -> Result<Response<Incoming>, HttpErrorResponseBody> {
        let (body, headers) = match request_body {
            None => (Bytes::new(), Vec::new()),
            Some(input) => (
                Bytes::from(serde_json::to_string(&input).unwrap()),
                vec![(http::header::CONTENT_TYPE, crate::CONTENT_TYPE_JSON)],
            ),
        };

        self.make_request_with_headers(
            method,
            path,
            body,
            &headers,
            expected_status,
        )
        .await
    }

    pub async fn make_request_no_body(
        &self,
        method: Method,
        path: &str,
        expected_status: StatusCode,
    ) -> Result<Response<Incoming>, HttpErrorResponseBody> {
        self.make_request_with_body(method, path, Bytes::new(), expected_status)
            .await
    }

    /// Fetches a resource for which we expect to get an error response.
    pub async fn make_request_error(
        &self,
        method: Method,
        path: &str,
        expected_status: StatusCode,
    ) -> HttpErrorResponseBody {
        self.make_request_with_body(method, path, Bytes::new(), expected_status)
            .await
            .unwrap_err()
    }

    pub async fn make_request_with_body(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
        expected_status: StatusCode,
    ) -> Result<Response<Incoming>, HttpErrorResponseBody> {
        self.make_request_with_headers(method, path, body, &[], expected_status)
            .await
    }

    pub async fn make_request_with_headers(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
        headers: &[(http::header::HeaderName, &str)],
        expected_status: StatusCode,
    ) -> Result<Response<Incoming>, HttpErrorResponseBody> {
        let uri = self.url(path);

        let time_before = chrono::offset::Utc::now().timestamp();
        info!(self.client_log, "client request";
            "method" => %method,
            "uri" => %uri,
            "body" => ?&body,
        );

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name, *value);
        }
        let mut response = self
            .client
            .request(
                builder
                    .body(Full::new(body))
                    .expect("attempted to construct invalid request"),
            )
            .await
            .expect("failed to make request to server");

        // Check that we got the expected response code.
        let status = response.status();
        info!(self.client_log, "client received response"; "status" => ?status);
        assert_eq!(expected_status, status);

        // Check that we didn't have any unexpected headers.
        let headers = response.headers();
        for header_name in headers.keys() {
            if !ALLOWED_HEADER_NAMES
                .iter()
                .any(|allowed| header_name == allowed)
            {
                panic!("header name not in allowed list: \"{}\"", header_name);
            }
        }

        // Sanity check the Date header in the response.  This assertion will
        // fail spuriously if the system clock is adjusted backwards between
        // the request and the response.  The Date header only has precision
        // down to one second, so the comparison is no more precise than that.
        let time_after = chrono::offset::Utc::now().timestamp();
        let date_header = headers
            .get(http::header::DATE)
            .expect("missing Date header")
            .to_str()
            .expect("non-ASCII characters in Date header");
        let time_request = chrono::DateTime::parse_from_rfc2822(date_header)
            .expect("unable to parse server's Date header");
        assert!(
            time_before <= time_after,
            "time obviously went backwards during the test"
        );
        assert!(time_request.timestamp() >= time_before - 1);
        assert!(time_request.timestamp() <= time_after + 1);

        // Validate that we have a request id header.
        let request_id_header = headers
            .get(crate::HEADER_REQUEST_ID)
            .expect("missing request id header")
            .to_str()
            .expect("non-ASCII characters in request id")
            .to_string();

        // For "204 No Content" responses, validate that we got no content in
        // the body.
        if status == StatusCode::NO_CONTENT {
            let body_bytes = response
                .body_mut()
                .collect()
                .await
                .expect("error reading body")
                .to_bytes();
            assert_eq!(0, body_bytes.len());
        }

        // If this was a successful response, there's nothing else to check
        // here.  Return the response so the caller can validate the content if
        // they want.
        if !status.is_client_error() && !status.is_server_error() {
            return Ok(response);
        }

        // We got an error.  Parse the response body to make sure it's valid and
        // then return that.
        let error_body: HttpErrorResponseBody = read_json(&mut response).await;
        info!(self.client_log, "client error"; "error_body" => ?error_body);
        assert_eq!(error_body.request_id, request_id_header);
        Err(error_body)
    }
}

/// Constructs a Logger for use by a test suite.  If a file-based logger is
/// requested, the file will be put in a temporary directory and the name will
/// be unique for a given test name and is likely to be unique across multiple
/// runs of this test.  The file will also be deleted if the test succeeds,
/// indicated by invoking [`LogContext::cleanup_successful`].  This way, you can
/// debug a test failure from the failed instance rather than hoping the
/// failure is reproducible.
///
/// ## Example
///
/// ```
/// # use restmap::ConfigLoggingLevel;
/// #
/// # fn my_logging_config() -> ConfigLogging {
/// #     ConfigLogging::StderrTerminal {
/// #         level: ConfigLoggingLevel::Info,
/// #     }
/// # }
/// #
/// # fn some_invariant() -> bool {
/// #     true
/// # }
/// #
/// use restmap::ConfigLogging;
/// use restmap::test_util::LogContext;
///
/// #[macro_use]
/// extern crate slog; // for the `info!` macro below
///
/// # fn main() {
/// let log_config: ConfigLogging = my_logging_config();
/// let logctx = LogContext::new("my_test", &log_config);
/// let log = &logctx.log;
///
/// // Run your test.  Use the log like you normally would.
/// info!(log, "the test is going great");
/// assert!(some_invariant());
///
/// // Upon successful completion, invoke `cleanup_successful()`.
/// logctx.cleanup_successful();
/// # }
/// ```
///
/// If the test fails (e.g., the `some_invariant()` assertion fails), the log
/// file will be retained.  If the test gets as far as calling
/// `cleanup_successful()`, the log file will be removed.
///
/// Note that `cleanup_successful()` is not invoked automatically on `drop`
/// because that would remove the file even if the test failed.  You have to
/// explicitly call `cleanup_successful`, normally as one of the last steps in
/// your test.
pub struct LogContext {
    /// general-purpose logger
    pub log: Logger,
    log_path: Option<Utf8PathBuf>,
}

impl LogContext {
    /// Sets up a LogContext.  If `initial_config_logging` specifies a
    /// file-based log (i.e., [`ConfigLogging::File`]), then the requested path
    /// _must_ be the string `"UNUSED"` and it will be replaced with a file
    /// name (in a temporary directory) containing `test_name` and other
    /// information to make the filename likely to be unique across multiple
    /// runs (e.g., process id).
    pub fn new(
        test_name: &str,
        initial_config_logging: &ConfigLogging,
    ) -> LogContext {
        // If the caller requested a file path, assert that the path matches our
        // sentinel.  Then override the path with one uniquely generated for
        // this test.
        let (log_path, log_config) = match initial_config_logging {
            ConfigLogging::File { level, path: dummy_path, if_exists } => {
                assert_eq!(
                    dummy_path.as_str(),
                    "UNUSED",
                    "for test suite logging configuration, when mode = \
                     \"file\" is used, the path MUST be the sentinel string \
                     \"UNUSED\".  It will be replaced with a unique path for \
                     each test."
                );
                let new_path = log_file_for_test(test_name);
                eprintln!("log file: {:?}", new_path);
                (
                    Some(new_path.clone()),
                    ConfigLogging::File {
                        level: *level,
                        path: new_path,
                        if_exists: *if_exists,
                    },
                )
            }
            other_config => (None, other_config.clone()),
        };

        let log = log_config.to_logger(test_name).unwrap();
        LogContext { log, log_path }
    }

    /// Removes the log file, if this was a file-based logger.
    pub fn cleanup_successful(self) {
        if let Some(ref log_path) = self.log_path {
            fs::remove_file(log_path).unwrap();
        }
    }
}

/// TestContext is used to manage a matched server and clients for the common
/// test-case pattern of setting up a logger, server, and client and tearing
/// them all down at the end.
pub struct TestContext {
    pub client_testctx: ClientTestContext,
    pub dispatch_client: DispatchClient,
    pub server: HttpServer,
    pub log: Logger,
    log_context: Option<LogContext>,
}

impl TestContext {
    /// Instantiate a TestContext by starting a server for `service` with
    /// `config_server` and `log`, then creating clients for whatever address
    /// the server wound up bound to.
    ///
    /// This interface requires that `config_server.bind_address.port()` be
    /// `0` to allow the server to bind to any available port.  This is
    /// necessary in order for it to be used concurrently by many tests.
    pub fn new(
        service: RestService,
        config_server: &ConfigServer,
        log_context: Option<LogContext>,
        log: Logger,
    ) -> TestContext {
        assert_eq!(
            0,
            config_server.bind_address.port(),
            "test suite only supports binding on port 0 (any available port)"
        );

        let server =
            HttpServer::start(config_server, service.clone(), &log).unwrap();

        let server_addr = server.local_addr();
        let client_log = log.new(o!("http_client" => "restmap test suite"));
        let client_testctx = ClientTestContext::new(server_addr, client_log);
        let dispatch_client =
            DispatchClient::new(&client_testctx.base_url(), service, &log);

        TestContext {
            client_testctx,
            dispatch_client,
            server,
            log,
            log_context,
        }
    }

    /// Requests a graceful shutdown of the server, waits for that to complete,
    /// and cleans up the associated log context (if any).
    pub async fn teardown(self) {
        self.server.close().await.expect("server stopped with an error");
        if let Some(log_context) = self.log_context {
            log_context.cleanup_successful();
        }
    }
}

/// Given a hyper response whose body is expected to be a JSON object that
/// should be parseable via Serde as type T, asynchronously read the body of
/// the response and parse it, returning an instance of T.
pub async fn read_json<T: DeserializeOwned>(
    response: &mut Response<Incoming>,
) -> T {
    let headers = response.headers();
    assert_eq!(
        crate::CONTENT_TYPE_JSON,
        headers.get(http::header::CONTENT_TYPE).expect("missing content-type")
    );
    let body_bytes = response
        .body_mut()
        .collect()
        .await
        .expect("error reading body")
        .to_bytes();
    serde_json::from_slice(body_bytes.as_ref())
        .expect("failed to parse server body as expected type")
}

/// Given a hyper response whose body is expected to be a UTF-8-encoded string,
/// asynchronously read the body.
pub async fn read_string(response: &mut Response<Incoming>) -> String {
    let body_bytes = response
        .body_mut()
        .collect()
        .await
        .expect("error reading body")
        .to_bytes();
    String::from_utf8(body_bytes.as_ref().into())
        .expect("response contained non-UTF-8 bytes")
}

/// Fetches a single resource.
pub async fn object_get<T: DeserializeOwned>(
    client: &ClientTestContext,
    object_url: &str,
) -> T {
    let mut response = client
        .make_request_no_body(Method::GET, object_url, StatusCode::OK)
        .await
        .unwrap();
    read_json::<T>(&mut response).await
}

static TEST_SUITE_LOGGER_ID: AtomicU32 = AtomicU32::new(0);

/// Returns a unique path name in a temporary directory that includes the given
/// `test_name`.
pub fn log_file_for_test(test_name: &str) -> Utf8PathBuf {
    let arg0 = {
        let arg0path = std::env::args().next().unwrap();
        Path::new(&arg0path).file_name().unwrap().to_str().unwrap().to_string()
    };

    let mut pathbuf = Utf8PathBuf::try_from(std::env::temp_dir())
        .expect("temp dir is not valid UTF-8");
    let id = TEST_SUITE_LOGGER_ID.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id();
    pathbuf.push(format!("{}-{}.{}.{}.log", arg0, test_name, pid, id));
    pathbuf
}

/// Load an object of type `T` (usually a hunk of configuration) from the string
/// `contents`.  `label` is used as an identifying string in a log message.  It
/// should be unique for each test.
pub fn read_config<T: DeserializeOwned + Debug>(
    label: &str,
    contents: &str,
) -> Result<T, toml::de::Error> {
    let result = toml::from_str(contents);
    eprintln!("config \"{}\": {:?}", label, result);
    result
}

// Bunyan testing facilities

/// Represents a Bunyan log record.  This form does not support any non-standard
/// fields.  "level" is not yet supported because we don't (yet) need it.
#[derive(Deserialize)]
pub struct BunyanLogRecord {
    pub time: DateTime<Utc>,
    pub name: String,
    pub hostname: String,
    pub pid: u32,
    pub msg: String,
    pub v: usize,
}

/// Read a file containing a Bunyan-format log, returning an array of records.
pub fn read_bunyan_log<P: AsRef<Path>>(logpath: P) -> Vec<BunyanLogRecord> {
    let log_contents = fs::read_to_string(logpath).unwrap();
    log_contents
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str::<BunyanLogRecord>(line).unwrap())
        .collect::<Vec<BunyanLogRecord>>()
}

/// Analogous to a BunyanLogRecord, but where all fields are optional.
pub struct BunyanLogRecordSpec {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub pid: Option<u32>,
    pub v: Option<usize>,
}

/// Verify that the key fields of the log records emitted by `iter` match the
/// corresponding values in `expected`.  Fields that are `None` in `expected`
/// will not be checked.
pub fn verify_bunyan_records<'a, 'b, I>(
    iter: I,
    expected: &'a BunyanLogRecordSpec,
) where
    I: Iterator<Item = &'b BunyanLogRecord>,
{
    for record in iter {
        if let Some(ref expected_name) = expected.name {
            assert_eq!(expected_name, &record.name);
        }
        if let Some(ref expected_hostname) = expected.hostname {
            assert_eq!(expected_hostname, &record.hostname);
        }
        if let Some(expected_pid) = expected.pid {
            assert_eq!(expected_pid, record.pid);
        }
        if let Some(expected_v) = expected.v {
            assert_eq!(expected_v, record.v);
        }
    }
}

/// Verify that the Bunyan records emitted by `iter` are chronologically
/// sequential and after `maybe_time_before` and before `maybe_time_after`, if
/// those latter two parameters are specified.
pub fn verify_bunyan_records_sequential<'a, I>(
    iter: I,
    maybe_time_before: Option<&'a DateTime<Utc>>,
    maybe_time_after: Option<&'a DateTime<Utc>>,
) where
    I: Iterator<Item = &'a BunyanLogRecord>,
{
    let mut maybe_should_be_before = maybe_time_before;

    for record in iter {
        if let Some(should_be_before) = maybe_should_be_before {
            assert!(should_be_before.timestamp() <= record.time.timestamp());
        }
        maybe_should_be_before = Some(&record.time);
    }

    if let Some(should_be_before) = maybe_should_be_before {
        if let Some(time_after) = maybe_time_after {
            assert!(should_be_before.timestamp() <= time_after.timestamp());
        }
    }
}
