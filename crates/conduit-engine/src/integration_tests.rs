//! End-to-end scenarios driving the broker, state machine, and drivers together against the
//! fakes in [`crate::fakes`] instead of a real socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::config::{Options, Settings};
use crate::drivers::{io_fn, paced_send_io_fn, IoBackend};
use crate::error::SocketError;
use crate::fakes::{always_fails_with_io, always_ok, send_task, FakeIoBackend, FakeIoPattern};
use crate::io::CompletionVerdict;
use crate::mediastream::{ControlAction, MediaStreamServer};
use crate::socket::{ConnectionSocket, SocketHandle, StateNotifier};
use crate::{Broker, Stats};

struct NullNotifier;
impl StateNotifier for NullNotifier {
    fn complete_state(&self, _error: Option<SocketError>) {}
}

fn new_bare_socket() -> Arc<ConnectionSocket> {
    let notifier: Arc<dyn StateNotifier> = Arc::new(NullNotifier);
    Arc::new(ConnectionSocket::new(Arc::downgrade(&notifier)))
}

#[tokio::test]
async fn one_successful_client_connection() {
    let settings = Arc::new(
        Settings::builder()
            .create(always_ok())
            .connect(always_ok())
            .io(io_fn(FakeIoBackend::new() as Arc<dyn IoBackend>, Options::empty()))
            .pattern_factory(|| Ok(FakeIoPattern::immediately_done() as Arc<dyn crate::io::IoPattern>))
            .iterations(1)
            .connection_limit(1)
            .connection_throttle_limit(1)
            .build()
            .unwrap(),
    );
    let stats = Arc::new(Stats::new());
    let broker = Broker::new(Arc::clone(&settings), Arc::clone(&stats));
    broker.start();
    broker.wait().await;

    let quota = broker.quota();
    assert_eq!(quota.pending_sockets, 0);
    assert_eq!(quota.active_sockets, 0);
    assert_eq!(
        stats.historic.successful_connections.load(Ordering::Relaxed),
        1
    );
}

async fn create_with_concurrency_tracking(
    concurrent: Arc<AtomicU32>,
    max_concurrent: Arc<AtomicU32>,
) -> Result<(), SocketError> {
    let now = concurrent.fetch_add(1, Ordering::AcqRel) + 1;
    max_concurrent.fetch_max(now, Ordering::AcqRel);
    tokio::time::sleep(Duration::from_millis(5)).await;
    concurrent.fetch_sub(1, Ordering::AcqRel);
    Ok(())
}

#[tokio::test]
async fn many_with_throttle() {
    let concurrent = Arc::new(AtomicU32::new(0));
    let max_concurrent = Arc::new(AtomicU32::new(0));

    let concurrent_for_create = Arc::clone(&concurrent);
    let max_for_create = Arc::clone(&max_concurrent);
    let create = move |_weak: Weak<ConnectionSocket>| {
        Box::pin(create_with_concurrency_tracking(
            Arc::clone(&concurrent_for_create),
            Arc::clone(&max_for_create),
        )) as crate::config::BoxFuture<'static, crate::config::FunctorResult>
    };

    let settings = Arc::new(
        Settings::builder()
            .create(create)
            .connect(always_ok())
            .io(io_fn(FakeIoBackend::new() as Arc<dyn IoBackend>, Options::empty()))
            .pattern_factory(|| Ok(FakeIoPattern::immediately_done() as Arc<dyn crate::io::IoPattern>))
            .iterations(1)
            .connection_limit(15)
            .connection_throttle_limit(5)
            .build()
            .unwrap(),
    );
    let stats = Arc::new(Stats::new());
    let broker = Broker::new(Arc::clone(&settings), Arc::clone(&stats));
    broker.start();
    broker.wait().await;

    assert!(
        max_concurrent.load(Ordering::Acquire) <= 5,
        "throttle limit exceeded: saw {} concurrently creating sockets",
        max_concurrent.load(Ordering::Acquire)
    );
    assert_eq!(
        stats.historic.successful_connections.load(Ordering::Relaxed),
        15
    );
    let quota = broker.quota();
    assert_eq!(quota.pending_sockets, 0);
    assert_eq!(quota.active_sockets, 0);
}

/// Regression coverage for the broker's quota invariant: `pending + active` must never exceed
/// `connection_limit` for a client configuration, across refills driven by multiple iterations.
/// The `create` functor fires for every admitted connection, including the ones `refresh_sockets`
/// admits to backfill a slot freed by an earlier connection's `initiating_io`/`closing` — exactly
/// the refill path where the overall connection-limit gate matters, not just the per-tick
/// throttle.
#[tokio::test]
async fn quota_invariant_holds_across_iterations() {
    let connection_limit = 3u32;
    let iterations = 4u64;

    let broker_cell: Arc<StdMutex<Option<Weak<Broker>>>> = Arc::new(StdMutex::new(None));
    let violation = Arc::new(AtomicBool::new(false));

    let broker_cell_for_create = Arc::clone(&broker_cell);
    let violation_for_create = Arc::clone(&violation);
    let create = move |_weak: Weak<ConnectionSocket>| {
        let broker_cell = Arc::clone(&broker_cell_for_create);
        let violation = Arc::clone(&violation_for_create);
        Box::pin(async move {
            if let Some(broker) = broker_cell
                .lock()
                .unwrap()
                .as_ref()
                .and_then(Weak::upgrade)
            {
                let quota = broker.quota();
                if quota.pending_sockets + quota.active_sockets > connection_limit {
                    violation.store(true, Ordering::SeqCst);
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(())
        }) as crate::config::BoxFuture<'static, crate::config::FunctorResult>
    };

    let settings = Arc::new(
        Settings::builder()
            .create(create)
            .connect(always_ok())
            .io(io_fn(FakeIoBackend::new() as Arc<dyn IoBackend>, Options::empty()))
            .pattern_factory(|| Ok(FakeIoPattern::immediately_done() as Arc<dyn crate::io::IoPattern>))
            .iterations(iterations)
            .connection_limit(connection_limit)
            .connection_throttle_limit(connection_limit)
            .build()
            .unwrap(),
    );
    let stats = Arc::new(Stats::new());
    let broker = Broker::new(Arc::clone(&settings), Arc::clone(&stats));
    *broker_cell.lock().unwrap() = Some(Arc::downgrade(&broker));
    broker.start();
    broker.wait().await;

    assert!(
        !violation.load(Ordering::SeqCst),
        "observed pending + active > connection_limit during the run"
    );
    assert_eq!(
        stats.historic.successful_connections.load(Ordering::Relaxed),
        iterations * u64::from(connection_limit)
    );
}

#[tokio::test]
async fn client_fails_connect() {
    let settings = Arc::new(
        Settings::builder()
            .create(always_ok())
            .connect(always_fails_with_io(std::io::ErrorKind::ConnectionRefused))
            .io(io_fn(FakeIoBackend::new() as Arc<dyn IoBackend>, Options::empty()))
            .connection_limit(1)
            .build()
            .unwrap(),
    );
    let stats = Arc::new(Stats::new());
    let broker = Broker::new(Arc::clone(&settings), Arc::clone(&stats));
    broker.start();
    broker.wait().await;

    assert_eq!(stats.historic.connection_errors.load(Ordering::Relaxed), 1);
    let quota = broker.quota();
    assert_eq!(quota.pending_sockets, 0);
    assert_eq!(quota.active_sockets, 0);
}

#[tokio::test]
async fn single_io_fails_immediately() {
    let pattern = FakeIoPattern::new(
        vec![send_task(b"hi", 0, 1)],
        vec![CompletionVerdict::FailedIo],
        Some(SocketError::Reset),
    );
    let pattern_for_factory = Arc::clone(&pattern);

    let settings = Arc::new(
        Settings::builder()
            .create(always_ok())
            .connect(always_ok())
            .io(io_fn(FakeIoBackend::new() as Arc<dyn IoBackend>, Options::empty()))
            .pattern_factory(move || Ok(Arc::clone(&pattern_for_factory) as Arc<dyn crate::io::IoPattern>))
            .connection_limit(1)
            .build()
            .unwrap(),
    );
    let stats = Arc::new(Stats::new());
    let broker = Broker::new(Arc::clone(&settings), Arc::clone(&stats));
    broker.start();
    broker.wait().await;

    assert_eq!(pattern.initiate_calls(), 1, "a second task must not be initiated");
    assert_eq!(pattern.complete_calls(), 1);
    assert_eq!(stats.historic.connection_errors.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn fail_after_n() {
    let tasks = (1..=5).map(|n| send_task(b"hi", 0, n)).collect();
    let verdicts = vec![
        CompletionVerdict::ContinueIo,
        CompletionVerdict::ContinueIo,
        CompletionVerdict::ContinueIo,
        CompletionVerdict::ContinueIo,
        CompletionVerdict::FailedIo,
    ];
    let pattern = FakeIoPattern::new(tasks, verdicts, Some(SocketError::Reset));
    let pattern_for_factory = Arc::clone(&pattern);

    let settings = Arc::new(
        Settings::builder()
            .create(always_ok())
            .connect(always_ok())
            .io(io_fn(FakeIoBackend::new() as Arc<dyn IoBackend>, Options::empty()))
            .pattern_factory(move || Ok(Arc::clone(&pattern_for_factory) as Arc<dyn crate::io::IoPattern>))
            .connection_limit(1)
            .build()
            .unwrap(),
    );
    let stats = Arc::new(Stats::new());
    let broker = Broker::new(Arc::clone(&settings), Arc::clone(&stats));
    broker.start();
    broker.wait().await;

    assert_eq!(pattern.complete_calls(), 5);
    assert_eq!(stats.historic.connection_errors.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn protocol_error_counts_separately_from_connection_error() {
    let pattern = FakeIoPattern::new(
        vec![send_task(b"hi", 0, 1)],
        vec![CompletionVerdict::FailedIo],
        Some(SocketError::Protocol("bad sequence number".into())),
    );
    let pattern_for_factory = Arc::clone(&pattern);

    let settings = Arc::new(
        Settings::builder()
            .create(always_ok())
            .connect(always_ok())
            .io(io_fn(FakeIoBackend::new() as Arc<dyn IoBackend>, Options::empty()))
            .pattern_factory(move || Ok(Arc::clone(&pattern_for_factory) as Arc<dyn crate::io::IoPattern>))
            .connection_limit(1)
            .build()
            .unwrap(),
    );
    let stats = Arc::new(Stats::new());
    let broker = Broker::new(Arc::clone(&settings), Arc::clone(&stats));
    broker.start();
    broker.wait().await;

    assert_eq!(stats.historic.protocol_errors.load(Ordering::Relaxed), 1);
    assert_eq!(stats.historic.connection_errors.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn paced_send_honors_offsets_and_order() {
    // A fragment size larger than every payload keeps each task's bytes unfragmented, so what
    // the backend observes is exactly the 8-byte sequence number each task carries as its
    // payload, letting this test isolate pacing/ordering from the wire framing exercised
    // separately by `paced_send_fragments_oversized_payloads` below.
    let fragment_size = 1024;
    let tasks: Vec<_> = (1..=10u64)
        .map(|n| send_task(&n.to_be_bytes(), 100, n))
        .collect();
    let mut verdicts = vec![CompletionVerdict::ContinueIo; 9];
    verdicts.push(CompletionVerdict::CompletedIo);
    let pattern = FakeIoPattern::new(tasks, verdicts, None);

    let backend = FakeIoBackend::new();
    let backend_dyn: Arc<dyn IoBackend> = Arc::clone(&backend) as Arc<dyn IoBackend>;

    let socket = new_bare_socket();
    socket.set_io_pattern(pattern);
    let weak = Arc::downgrade(&socket);

    let functor = paced_send_io_fn(backend_dyn, fragment_size);
    let start = tokio::time::Instant::now();
    functor(weak).await.expect("paced loop should complete cleanly");

    let sends = backend.sends.lock();
    assert_eq!(sends.len(), 10);

    let elapsed = sends.last().unwrap().0.duration_since(start);
    let expected = Duration::from_millis(1000);
    let tolerance = expected.mul_f32(0.2);
    assert!(
        elapsed >= expected.saturating_sub(tolerance) && elapsed <= expected + tolerance,
        "paced sends took {elapsed:?}, expected close to {expected:?}"
    );

    let mut last_seq = 0u64;
    for (_, payload) in sends.iter() {
        let seq = u64::from_be_bytes(payload.as_slice().try_into().unwrap());
        assert!(seq > last_seq, "sequence numbers must strictly increase");
        last_seq = seq;
    }
}

#[tokio::test]
async fn paced_send_fragments_oversized_payloads() {
    // 48 bytes split into two 24-byte fragments; 16-byte header + 24-byte chunk meets the
    // wire format's 40-byte floor exactly.
    let payload = vec![0xABu8; 48];
    let fragment_size = 24;
    let pattern = FakeIoPattern::new(
        vec![send_task(&payload, 0, 7)],
        vec![CompletionVerdict::CompletedIo],
        None,
    );

    let backend = FakeIoBackend::new();
    let backend_dyn: Arc<dyn IoBackend> = Arc::clone(&backend) as Arc<dyn IoBackend>;
    let socket = new_bare_socket();
    socket.set_io_pattern(pattern);
    let weak = Arc::downgrade(&socket);

    paced_send_io_fn(backend_dyn, fragment_size)(weak)
        .await
        .expect("fragmented paced send should complete cleanly");

    let sends = backend.sends.lock();
    assert_eq!(sends.len(), 2, "a 48-byte payload over a 24-byte fragment size is two fragments");
    for (index, (_, frame)) in sends.iter().enumerate() {
        let (header, remainder) =
            crate::mediastream::DataFrameHeader::decode(frame).expect("frame should decode");
        assert_eq!(header.sequence_number, 7);
        assert_eq!(header.fragment_index, index as u32);
        assert_eq!(header.fragment_count, 2);
        assert_eq!(remainder, &payload[index * fragment_size..(index + 1) * fragment_size]);
    }
}

async fn bind_test_server() -> (Arc<MediaStreamServer>, SocketAddr) {
    let server = MediaStreamServer::bind(&["127.0.0.1:0".parse().unwrap()])
        .await
        .unwrap();
    server.start();
    let addr = server.listen_addrs()[0];
    (server, addr)
}

#[tokio::test]
async fn media_stream_matches_handshake_that_arrived_first() {
    let (server, addr) = bind_test_server().await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&[ControlAction::Start.encode()], addr)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let socket = new_bare_socket();
    let weak = Arc::downgrade(&socket);
    server.accept_fn()(weak).await.expect("accept should match the waiting handshake");

    assert_eq!(socket.local_address(), Some(addr));
    assert_eq!(socket.target_address(), Some(client.local_addr().unwrap()));
    assert!(matches!(*socket.lock().await, SocketHandle::Udp(_)));
}

#[tokio::test]
async fn media_stream_matches_handshake_that_arrives_after_accept() {
    let (server, addr) = bind_test_server().await;

    let socket = new_bare_socket();
    let weak = Arc::downgrade(&socket);
    let accept_future = server.accept_fn()(weak);
    let accept_task = tokio::spawn(accept_future);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&[ControlAction::Start.encode()], addr)
        .await
        .unwrap();

    accept_task
        .await
        .unwrap()
        .expect("accept should match the handshake once it arrives");

    assert_eq!(socket.target_address(), Some(client.local_addr().unwrap()));
}

#[tokio::test]
async fn media_stream_duplicate_handshake_is_deduplicated() {
    let (server, addr) = bind_test_server().await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&[ControlAction::Start.encode()], addr)
        .await
        .unwrap();
    client
        .send_to(&[ControlAction::Start.encode()], addr)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(server.duplicate_handshakes(), 1);
}
