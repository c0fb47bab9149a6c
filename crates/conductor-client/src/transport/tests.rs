//! Unit tests for the socket and RPC transports.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};
use rstest::rstest;

use conductor_protocol::rpc::{DeathNotifier, DeathWatch, PeerEvent, ResponseListener, RpcService};
use conductor_protocol::{
    ClientIdentifier, Command, CommandResult, CommandType, Frame, FrameDecoder, FrameKind, Label,
    Response, ResponseKind, ResponseStatus, ResultPayload, ResultStatus, SubCommand,
};

use super::*;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingListener {
    responses: Mutex<Vec<Response>>,
}

impl ResponseListener for RecordingListener {
    fn on_response(&self, response: Response) {
        self.responses
            .lock()
            .expect("listener lock")
            .push(response);
    }
}

fn read_command(peer: &mut UnixStream) -> Command {
    let mut decoder = FrameDecoder::new();
    let mut buffer = [0_u8; 1024];
    loop {
        if let Some(frame) = decoder.next_frame().expect("valid frame") {
            assert_eq!(frame.kind(), FrameKind::Command);
            return frame.to_command().expect("command body");
        }
        let read = peer.read(&mut buffer).expect("read command");
        assert!(read > 0, "client closed the socket");
        decoder.extend(buffer.get(..read).expect("in bounds"));
    }
}

fn send_frame(peer: &mut UnixStream, frame: &Frame) {
    peer.write_all(&frame.encode().expect("encode")).expect("send frame");
}

fn command(sequence: u32) -> Command {
    Command::new(CommandType::Normal, SubCommand::Start)
        .with_command_line("cat")
        .with_sequence(sequence)
}

#[rstest]
fn socket_call_returns_matching_result() {
    let (client, mut daemon) = UnixStream::pair().expect("socket pair");
    let transport =
        SocketTransport::from_stream(client, String::from("pair"), CALL_TIMEOUT).expect("transport");

    let server = std::thread::spawn(move || {
        let received = read_command(&mut daemon);
        let stale = CommandResult::new(ResultStatus::Ok, received.sequence.wrapping_sub(1));
        send_frame(&mut daemon, &Frame::result(&stale).expect("frame"));
        let result = CommandResult::new(ResultStatus::Exists, received.sequence)
            .with_label(Label::new(received.sequence, 4));
        send_frame(&mut daemon, &Frame::result(&result).expect("frame"));
        daemon
    });

    let result = transport.execute(&command(7));
    assert_eq!(result.status, ResultStatus::Exists);
    assert_eq!(result.sequence, 7);
    assert_eq!(result.label, Label::new(7, 4));
    drop(server.join().expect("server thread"));
}

#[rstest]
fn socket_call_times_out_without_a_result() {
    let (client, daemon) = UnixStream::pair().expect("socket pair");
    let transport = SocketTransport::from_stream(
        client,
        String::from("pair"),
        Duration::from_millis(50),
    )
    .expect("transport");

    let result = transport.execute(&command(3));
    assert_eq!(result.status, ResultStatus::Timeout);
    assert_eq!(result.sequence, 3);
    drop(daemon);
}

#[rstest]
fn socket_call_fails_when_daemon_hangs_up() {
    let (client, daemon) = UnixStream::pair().expect("socket pair");
    let transport =
        SocketTransport::from_stream(client, String::from("pair"), CALL_TIMEOUT).expect("transport");
    drop(daemon);

    let result = transport.execute(&command(9));
    assert_eq!(result.status, ResultStatus::Fail);
}

#[rstest]
fn socket_result_carries_passed_descriptor() {
    let (client, mut daemon) = UnixStream::pair().expect("socket pair");
    let transport =
        SocketTransport::from_stream(client, String::from("pair"), CALL_TIMEOUT).expect("transport");

    let server = std::thread::spawn(move || {
        let received = read_command(&mut daemon);
        let (reader, writer) = std::io::pipe().expect("pipe");
        let writer = OwnedFd::from(writer);
        let result = CommandResult::new(ResultStatus::Ok, received.sequence)
            .with_payload(ResultPayload::Fd(OwnedFd::from(reader)));
        let bytes = Frame::result(&result)
            .expect("frame")
            .encode()
            .expect("encode");
        let descriptors = [result.descriptor().expect("descriptor").as_raw_fd()];
        let control = [ControlMessage::ScmRights(&descriptors)];
        sendmsg::<()>(
            daemon.as_raw_fd(),
            &[std::io::IoSlice::new(&bytes)],
            &control,
            MsgFlags::empty(),
            None,
        )
        .expect("sendmsg");
        (daemon, writer)
    });

    let mut result = transport.execute(&command(11));
    let (daemon, writer) = server.join().expect("server thread");
    assert!(result.is_ok());

    std::fs::File::from(writer)
        .write_all(b"ping")
        .expect("write to pipe");
    let mut received = [0_u8; 4];
    std::fs::File::from(result.take_descriptor().expect("descriptor"))
        .read_exact(&mut received)
        .expect("read from passed descriptor");
    assert_eq!(&received, b"ping");
    drop(daemon);
}

#[rstest]
fn socket_responses_reach_the_listener() {
    let (client, mut daemon) = UnixStream::pair().expect("socket pair");
    let transport =
        SocketTransport::from_stream(client, String::from("pair"), CALL_TIMEOUT).expect("transport");
    let listener = Arc::new(RecordingListener::default());
    let weak: Weak<dyn ResponseListener> =
        Arc::downgrade(&(Arc::clone(&listener) as Arc<dyn ResponseListener>));
    transport.set_listener(weak);

    let response = Response::new(
        ResponseKind::Normal,
        Label::new(2, 1),
        ResponseStatus::Exit,
        "",
    );
    send_frame(&mut daemon, &Frame::response(&response).expect("frame"));

    // A call round trip orders the response ahead of the result.
    let server = std::thread::spawn(move || {
        let received = read_command(&mut daemon);
        let result = CommandResult::new(ResultStatus::Ok, received.sequence);
        send_frame(&mut daemon, &Frame::result(&result).expect("frame"));
        daemon
    });
    transport.execute(&command(1));
    drop(server.join().expect("server thread"));

    let responses = listener.responses.lock().expect("listener lock");
    assert_eq!(responses.as_slice(), [response]);
}

/// Registers an event from inside the completion callback.
struct EventOnFinish {
    registry: Weak<crate::Registry>,
    accepted: mpsc::Sender<(bool, Duration)>,
}

impl crate::CompletionListener for EventOnFinish {
    fn service_finished(
        &self,
        _handle: &Arc<crate::ServiceHandle>,
        _response: &crate::ServiceResponse,
    ) {
        let registry = self.registry.upgrade().expect("registry alive");
        let started = std::time::Instant::now();
        let accepted = registry.add_event("evt", "/bin/evt", None);
        self.accepted
            .send((accepted, started.elapsed()))
            .expect("report outcome");
    }

    fn command_finished(
        &self,
        _handle: &Arc<crate::CommandHandle>,
        _response: &crate::CommandResponse,
    ) {
    }
}

#[rstest]
fn completion_callback_can_issue_commands_over_the_socket() {
    let (client, mut daemon) = UnixStream::pair().expect("socket pair");
    let timeout = Duration::from_secs(10);
    let transport: Arc<dyn Transport> = Arc::new(
        SocketTransport::from_stream(client, String::from("pair"), timeout).expect("transport"),
    );
    let registry = crate::Registry::new(transport, crate::RegistryDefaults::default());
    let (accepted_tx, accepted_rx) = mpsc::channel();
    let listener = Arc::new(EventOnFinish {
        registry: Arc::downgrade(&registry),
        accepted: accepted_tx,
    });
    registry.set_completion_listener(listener);
    let (tracked_tx, tracked_rx) = mpsc::channel::<()>();

    let server = std::thread::spawn(move || {
        // Both namespace lookups miss, then the start succeeds.
        for _ in 0..2 {
            let lookup = read_command(&mut daemon);
            assert_eq!(lookup.sub_command, SubCommand::Info);
            let missing = CommandResult::new(ResultStatus::Fail, lookup.sequence);
            send_frame(&mut daemon, &Frame::result(&missing).expect("frame"));
        }
        let start = read_command(&mut daemon);
        let label = Label::new(start.sequence, 1);
        let started = CommandResult::new(ResultStatus::Ok, start.sequence).with_label(label);
        send_frame(&mut daemon, &Frame::result(&started).expect("frame"));

        tracked_rx.recv().expect("service tracked");
        let finished = Response::new(ResponseKind::Service, label, ResponseStatus::Exit, "svc");
        send_frame(&mut daemon, &Frame::response(&finished).expect("frame"));

        let event = read_command(&mut daemon);
        assert_eq!(event.command_type, CommandType::Event);
        assert_eq!(event.sub_command, SubCommand::Add);
        let added = CommandResult::new(ResultStatus::Ok, event.sequence);
        send_frame(&mut daemon, &Frame::result(&added).expect("frame"));
        daemon
    });

    let handle = registry.check_service("svc", Some("/bin/svc"), None);
    assert_eq!(handle.error(), crate::ErrorCode::Ok);
    tracked_tx.send(()).expect("daemon waiting");

    let (accepted, elapsed) = accepted_rx
        .recv_timeout(timeout * 2)
        .expect("callback finished");
    assert!(accepted, "event registration from the callback failed");
    assert!(elapsed < Duration::from_secs(2), "callback call took {elapsed:?}");
    drop(server.join().expect("server thread"));
}

#[derive(Default)]
struct FakeService {
    calls: Mutex<Vec<(ClientIdentifier, Command)>>,
    listener: Mutex<Option<Arc<dyn ResponseListener>>>,
    unregistered: AtomicUsize,
    events: Mutex<Option<Receiver<PeerEvent>>>,
    watch: Mutex<Option<DeathWatch>>,
}

impl RpcService for FakeService {
    fn send_command(&self, caller: ClientIdentifier, command: Command) -> CommandResult {
        let sequence = command.sequence;
        self.calls.lock().expect("calls lock").push((caller, command));
        CommandResult::new(ResultStatus::Ok, sequence)
    }

    fn register_listener(
        &self,
        caller: ClientIdentifier,
        listener: Arc<dyn ResponseListener>,
    ) -> DeathNotifier {
        *self.listener.lock().expect("listener lock") = Some(listener);
        let (events_tx, events_rx) = mpsc::channel();
        *self.events.lock().expect("events lock") = Some(events_rx);
        let (notifier, watch) = DeathNotifier::new(caller, events_tx);
        *self.watch.lock().expect("watch lock") = Some(watch);
        notifier
    }

    fn unregister_listener(&self, _caller: ClientIdentifier) {
        self.unregistered.fetch_add(1, Ordering::SeqCst);
        if let Some(watch) = self.watch.lock().expect("watch lock").take() {
            watch.disarm();
        }
    }
}

fn rpc_pair() -> (Arc<FakeService>, RpcTransport) {
    let service = Arc::new(FakeService::default());
    let transport = RpcTransport::with_identity(
        Arc::clone(&service) as Arc<dyn RpcService>,
        ClientIdentifier::new(1000, 77),
    );
    (service, transport)
}

#[rstest]
fn rpc_call_tags_the_caller() {
    let (service, transport) = rpc_pair();
    let result = transport.execute(&command(5));

    assert!(result.is_ok());
    let calls = service.calls.lock().expect("calls lock");
    let (caller, sent) = calls.first().expect("one call");
    assert_eq!(*caller, ClientIdentifier::new(1000, 77));
    assert_eq!(sent.sequence, 5);
}

#[rstest]
fn rpc_listener_bridge_forwards_responses() {
    let (service, transport) = rpc_pair();
    let listener = Arc::new(RecordingListener::default());
    let weak: Weak<dyn ResponseListener> =
        Arc::downgrade(&(Arc::clone(&listener) as Arc<dyn ResponseListener>));
    transport.set_listener(weak);

    let response = Response::new(ResponseKind::Service, Label::new(4, 2), ResponseStatus::Signal, "svc");
    let bridge = service
        .listener
        .lock()
        .expect("listener lock")
        .clone()
        .expect("registered");
    bridge.on_response(response.clone());

    assert_eq!(
        listener.responses.lock().expect("listener lock").as_slice(),
        [response]
    );
}

#[rstest]
fn dropping_the_transport_reports_death() {
    let (service, transport) = rpc_pair();
    let listener: Arc<dyn ResponseListener> = Arc::new(RecordingListener::default());
    transport.set_listener(Arc::downgrade(&listener));
    drop(transport);

    let events = service.events.lock().expect("events lock");
    let event = events
        .as_ref()
        .expect("registered")
        .try_recv()
        .expect("death reported");
    assert_eq!(event, PeerEvent::Died(ClientIdentifier::new(1000, 77)));
}

#[rstest]
fn unregister_withdraws_without_death() {
    let (service, transport) = rpc_pair();
    let listener: Arc<dyn ResponseListener> = Arc::new(RecordingListener::default());
    transport.set_listener(Arc::downgrade(&listener));
    transport.unregister();
    drop(transport);

    assert_eq!(service.unregistered.load(Ordering::SeqCst), 1);
    let events = service.events.lock().expect("events lock");
    assert!(events.as_ref().expect("registered").try_recv().is_err());
}

#[rstest]
fn connect_rejects_unpublished_service() {
    let directory = ServiceDirectory::new();
    let error = RpcTransport::connect(&directory, "conductor").expect_err("nothing published");
    assert!(matches!(error, TransportError::ServiceUnavailable { name } if name == "conductor"));
}
