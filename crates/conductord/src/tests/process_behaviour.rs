//! Behavioural tests covering daemon launch, reader supervision, and shutdown.

use std::cell::RefCell;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use conductor_config::ReaderBackend;
use conductor_protocol::rpc::ServiceDirectory;
use conductor_protocol::{ClientIdentifier, Command, CommandType, ResultStatus, SubCommand};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::bootstrap::ConfigLoader;
use crate::dispatch::UnavailableDispatcher;
use crate::health::HealthReporter;
use crate::process::{LaunchError, ShutdownCause, ShutdownError, ShutdownSignal};
use crate::process::launch::{LaunchPlan, run_daemon_with};
use crate::reader::rpc::RPC_SERVICE_NAME;
use crate::tests::support::{
    FailingConfigLoader, HealthEvent, RecordingHealthReporter, TestClient, TestConfigLoader,
    wait_until,
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<ProcessTestWorld> {
    RefCell::new(ProcessTestWorld::new())
}

#[given("a daemon configured for the {backend} reader")]
fn given_backend(world: &RefCell<ProcessTestWorld>, backend: String) -> StepResult {
    let backend = match backend.as_str() {
        "socket" => ReaderBackend::Socket,
        "rpc" => ReaderBackend::Rpc,
        "both" => ReaderBackend::Both,
        other => return Err(format!("unknown backend '{other}'")),
    };
    world.borrow_mut().loader = Arc::new(TestConfigLoader::with_backend(backend));
    Ok(())
}

#[given("a daemon with an invalid configuration")]
fn given_invalid_configuration(world: &RefCell<ProcessTestWorld>) {
    world.borrow_mut().loader = Arc::new(FailingConfigLoader);
}

#[when("the daemon starts")]
fn when_daemon_starts(world: &RefCell<ProcessTestWorld>) {
    world.borrow_mut().start();
}

#[when("the daemon is ready")]
fn when_daemon_ready(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world.borrow().wait_for_readers()
}

#[when("shutdown is triggered")]
fn when_shutdown_triggered(world: &RefCell<ProcessTestWorld>) {
    world.borrow().shutdown.trigger();
}

#[when("the daemon run completes")]
fn when_daemon_completes(world: &RefCell<ProcessTestWorld>) -> StepResult {
    world.borrow_mut().join()
}

#[then("a socket client is answered with a failure")]
fn then_socket_client_fails(world: &RefCell<ProcessTestWorld>) {
    let endpoint = world.borrow().socket_endpoint();
    let mut client = TestClient::connect(&endpoint);
    client.send(&Command::new(CommandType::Normal, SubCommand::Start).with_sequence(1));
    let status = client.receive_result().map(|result| result.status);
    assert_eq!(status, Some(ResultStatus::Fail));
}

#[then("an rpc caller is answered with a failure")]
fn then_rpc_caller_fails(world: &RefCell<ProcessTestWorld>) {
    let service = world
        .borrow()
        .directory
        .lookup(RPC_SERVICE_NAME)
        .expect("rpc service published");
    let caller = ClientIdentifier::new(nix::unistd::geteuid().as_raw(), 99);
    let result = service.send_command(
        caller,
        Command::new(CommandType::Normal, SubCommand::Start).with_sequence(2),
    );
    assert_eq!(result.status, ResultStatus::Fail);
}

#[then("the daemon run succeeds")]
fn then_daemon_succeeds(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    let result = world.result.as_ref().expect("daemon result recorded");
    assert!(result.is_ok(), "daemon run should succeed: {result:?}");
}

#[then("the daemon run fails during bootstrap")]
fn then_daemon_fails(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    let result = world.result.as_ref().expect("daemon result recorded");
    assert!(
        matches!(result, Err(LaunchError::Bootstrap { .. })),
        "unexpected result: {result:?}"
    );
}

#[then("the socket file is removed")]
fn then_socket_removed(world: &RefCell<ProcessTestWorld>) {
    let endpoint = world.borrow().socket_endpoint();
    let path = endpoint.unix_path().expect("unix socket path");
    assert!(!path.exists(), "{path} should be removed after shutdown");
}

#[then("the rpc service is withdrawn")]
fn then_rpc_withdrawn(world: &RefCell<ProcessTestWorld>) {
    assert!(
        world.borrow().directory.lookup(RPC_SERVICE_NAME).is_none(),
        "rpc service should be withdrawn"
    );
}

#[then("the reporter recorded the {reader} reader stopping")]
fn then_reader_stopped(world: &RefCell<ProcessTestWorld>, reader: String) {
    let events = world.borrow().reporter.events();
    let stopped = events
        .iter()
        .any(|event| matches!(event, HealthEvent::ReaderStopped(name) if *name == reader));
    assert!(stopped, "stop event for {reader} missing: {events:?}");
}

#[then("the reporter recorded a requested shutdown before the readers stopped")]
fn then_shutdown_recorded(world: &RefCell<ProcessTestWorld>) {
    let events = world.borrow().reporter.events();
    let requested = events
        .iter()
        .position(|event| *event == HealthEvent::ShutdownRequested(ShutdownCause::Requested));
    let first_stop = events
        .iter()
        .position(|event| matches!(event, HealthEvent::ReaderStopped(_)));
    assert!(
        matches!((requested, first_stop), (Some(shutdown), Some(stop)) if shutdown < stop),
        "shutdown must be reported before readers stop: {events:?}"
    );
}

#[then("the readers stopped in reverse start order")]
fn then_reverse_stop_order(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    let mut started = world.reporter.started_readers();
    started.reverse();
    assert_eq!(world.reporter.stopped_readers(), started);
}

#[then("the reporter saw the {backend} backend configured")]
fn then_backend_configured(world: &RefCell<ProcessTestWorld>, backend: String) {
    let configured = world.borrow().reporter.configured_backend();
    assert_eq!(configured.map(|value| value.to_string()), Some(backend));
}

#[then("no reader was started")]
fn then_no_reader_started(world: &RefCell<ProcessTestWorld>) {
    let world = world.borrow();
    assert!(world.reporter.started_readers().is_empty());
    assert_eq!(world.reporter.configured_backend(), None);
}

struct ProcessTestWorld {
    loader: Arc<dyn ConfigLoader>,
    reporter: Arc<RecordingHealthReporter>,
    directory: Arc<ServiceDirectory>,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
}

impl ProcessTestWorld {
    fn new() -> Self {
        Self {
            loader: Arc::new(TestConfigLoader::new()),
            reporter: Arc::new(RecordingHealthReporter::default()),
            directory: Arc::new(ServiceDirectory::new()),
            shutdown: TestShutdownSignal::new(),
            handle: None,
            result: None,
        }
    }

    fn start(&mut self) {
        let plan = LaunchPlan {
            loader: Arc::clone(&self.loader),
            shutdown: self.shutdown.clone(),
            reporter: self.reporter.clone() as Arc<dyn HealthReporter>,
            dispatcher: Arc::new(UnavailableDispatcher),
            directory: Arc::clone(&self.directory),
        };
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
    }

    fn socket_endpoint(&self) -> conductor_config::SocketEndpoint {
        self.loader
            .load()
            .expect("test configuration loads")
            .daemon_socket
    }

    fn wait_for_readers(&self) -> StepResult {
        let config = self.loader.load().map_err(|error| error.to_string())?;
        let expected = usize::from(config.reader_backend.uses_socket())
            + usize::from(config.reader_backend.uses_rpc());
        if wait_until(WAIT_TIMEOUT, || self.reporter.started_readers().len() == expected) {
            Ok(())
        } else {
            Err(format!("readers did not start: {:?}", self.reporter.events()))
        }
    }

    fn join(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| String::from("daemon not running"))?;
        let result = handle
            .join()
            .map_err(|_| String::from("daemon thread panicked"))?;
        self.result = Some(result);
        Ok(())
    }
}

impl Drop for ProcessTestWorld {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}

#[derive(Clone)]
struct TestShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        *triggered = true;
        cvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<ShutdownCause, ShutdownError> {
        let (lock, cvar) = &*self.inner;
        let triggered = lock.lock().expect("shutdown mutex poisoned");
        let _released = cvar
            .wait_while(triggered, |triggered| !*triggered)
            .expect("shutdown mutex poisoned during wait");
        Ok(ShutdownCause::Requested)
    }
}

#[scenario(path = "tests/features/daemon_process.feature")]
fn daemon_process(#[from(world)] _: RefCell<ProcessTestWorld>) {}
