//! End-to-end tests of the service: requests against real files on disk,
//! with events collected through a channel-backed sink.

use std::io::Write;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use charon_service::queue::{JobQueue, Request, MAX_QUEUE_SIZE};
use charon_service::service::{EventSink, FileService, CANCELED_MESSAGE};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Data(String, Vec<String>),
    Completed(String),
    Error(String, String),
}

impl Event {
    fn id(&self) -> &str {
        match self {
            Event::Data(id, _) | Event::Completed(id) | Event::Error(id, _) => id,
        }
    }
}

struct ChannelSink {
    sender: Mutex<Sender<Event>>,
}

impl ChannelSink {
    fn new() -> (Arc<Self>, Receiver<Event>) {
        let (sender, receiver) = channel();
        (
            Arc::new(ChannelSink {
                sender: Mutex::new(sender),
            }),
            receiver,
        )
    }
}

impl EventSink for ChannelSink {
    fn data(&self, request_id: &str, data: charon::DataMap) {
        let keys = data.keys().cloned().collect();
        let sender = self.sender.lock().unwrap();
        let _ = sender.send(Event::Data(request_id.to_string(), keys));
    }

    fn completed(&self, request_id: &str) {
        let sender = self.sender.lock().unwrap();
        let _ = sender.send(Event::Completed(request_id.to_string()));
    }

    fn error(&self, request_id: &str, message: &str) {
        let sender = self.sender.lock().unwrap();
        let _ = sender.send(Event::Error(request_id.to_string(), message.to_string()));
    }
}

const ULTIGCODE: &str = ";FLAVOR:UltiGCode\n;TIME:100\nG0 X0\n";

fn write_gcode_file() -> tempfile::NamedTempFile {
    let mut tmp = tempfile::Builder::new()
        .suffix(".gcode")
        .tempfile()
        .expect("create temp file");
    tmp.write_all(ULTIGCODE.as_bytes()).expect("write g-code");
    tmp.flush().expect("flush");
    tmp
}

fn recv(receiver: &Receiver<Event>) -> Event {
    receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("expected an event")
}

#[test]
fn a_request_streams_data_then_completed() {
    let tmp = write_gcode_file();
    let path = tmp.path().to_str().unwrap().to_string();
    let (sink, events) = ChannelSink::new();
    let service = FileService::start(sink);

    let accepted = service.start_request(
        "A",
        &path,
        vec![
            "/metadata/toolpath/default/machine_type".to_string(),
            "/metadata/toolpath/default/time".to_string(),
        ],
        |_| {},
    );
    assert!(accepted);

    match recv(&events) {
        Event::Data(id, keys) => {
            assert_eq!("A", id);
            assert_eq!(
                vec!["/metadata/toolpath/default/machine_type".to_string()],
                keys
            );
        }
        other => panic!("expected a data event, got {:?}", other),
    }
    match recv(&events) {
        Event::Data(id, keys) => {
            assert_eq!("A", id);
            assert_eq!(vec!["/metadata/toolpath/default/time".to_string()], keys);
        }
        other => panic!("expected a data event, got {:?}", other),
    }
    assert_eq!(Event::Completed("A".to_string()), recv(&events));

    service.shutdown();
}

#[test]
fn failures_emit_a_single_error_event() {
    let (sink, events) = ChannelSink::new();
    let service = FileService::start(sink);

    assert!(service.start_request("A", "/does/not/exist.gcode", vec![], |_| {}));
    match recv(&events) {
        Event::Error(id, _message) => assert_eq!("A", id),
        other => panic!("expected an error event, got {:?}", other),
    }

    // Unknown extensions are errors too, not panics.
    assert!(service.start_request("B", "/tmp/file.stl", vec![], |_| {}));
    match recv(&events) {
        Event::Error(id, message) => {
            assert_eq!("B", id);
            assert!(message.contains(".stl"));
        }
        other => panic!("expected an error event, got {:?}", other),
    }

    service.shutdown();
    assert!(events.try_recv().is_err());
}

#[test]
fn lifo_dispatch_runs_the_newest_request_first() {
    let tmp = write_gcode_file();
    let path = tmp.path().to_str().unwrap().to_string();
    let (sink, events) = ChannelSink::new();

    // Enqueue both requests before any worker exists, then start a single
    // worker: dispatch order is deterministic.
    let queue = Arc::new(JobQueue::new(MAX_QUEUE_SIZE));
    queue
        .enqueue(Request::new(
            "A",
            &path,
            vec!["/metadata/toolpath/default/machine_type".to_string()],
        ))
        .unwrap();
    queue
        .enqueue(Request::new(
            "B",
            &path,
            vec!["/metadata/toolpath/default/machine_type".to_string()],
        ))
        .unwrap();

    let service = FileService::with_queue(queue, sink, 1);

    let first = recv(&events);
    assert_eq!("B", first.id());
    // Drain B's terminal event, then A's pair.
    assert_eq!(Event::Completed("B".to_string()), recv(&events));
    assert_eq!("A", recv(&events).id());
    assert_eq!(Event::Completed("A".to_string()), recv(&events));

    service.shutdown();
}

#[test]
fn cancellation_emits_the_terminal_error_and_skips_the_work() {
    let tmp = write_gcode_file();
    let path = tmp.path().to_str().unwrap().to_string();
    let (sink, events) = ChannelSink::new();

    // No workers yet: the queue holds both requests while we cancel one.
    let queue = Arc::new(JobQueue::new(MAX_QUEUE_SIZE));
    let service = FileService::with_queue(queue.clone(), sink.clone(), 0);

    assert!(service.start_request("A", &path, vec!["/metadata".to_string()], |_| {}));
    assert!(service.start_request("B", &path, vec!["/metadata".to_string()], |_| {}));
    service.cancel_request("B");

    assert_eq!(
        Event::Error("B".to_string(), CANCELED_MESSAGE.to_string()),
        recv(&events)
    );

    // A late worker discards the cancelled entry without events for it.
    let worker = FileService::with_queue(queue, sink, 1);
    let mut seen = Vec::new();
    seen.push(recv(&events));
    seen.push(recv(&events));
    assert!(seen.iter().all(|event| event.id() == "A"));

    worker.shutdown();
    service.shutdown();
}

#[test]
fn rejected_requests_acknowledge_false() {
    let (sink, _events) = ChannelSink::new();
    let queue = Arc::new(JobQueue::new(1));
    let service = FileService::with_queue(queue, sink, 0);

    let mut acks = Vec::new();
    service.start_request("A", "/tmp/a.gcode", vec![], |ok| acks.push(ok));
    service.start_request("A", "/tmp/a.gcode", vec![], |ok| acks.push(ok));
    service.start_request("B", "/tmp/b.gcode", vec![], |ok| acks.push(ok));
    assert_eq!(vec![true, false, false], acks);

    service.shutdown();
}
