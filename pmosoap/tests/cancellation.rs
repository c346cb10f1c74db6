use std::io::{ErrorKind as IoErrorKind, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pmosoap::{
    Action, CallContext, Canceller, ErrorKind, HttpTransport, SoapClient, SoapError, Transport,
    TransportError, TransportResponse, payload_element,
};

/// Transport qui compte les appels sans jamais répondre utilement.
#[derive(Default)]
struct CountingTransport {
    calls: AtomicUsize,
}

impl Transport for CountingTransport {
    fn round_trip(
        &self,
        _address: &str,
        _request: &[u8],
        _ctx: &CallContext,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Io("unreachable".to_string()))
    }
}

/// Accepte les connexions, lit la requête et ne répond jamais.
fn silent_server() -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}/onvif/device_service", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let mut held: Vec<TcpStream> = Vec::new();
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let _ = stream.set_read_timeout(Some(Duration::from_secs(3)));
            let _ = stream.read(&mut buf);
            held.push(stream);
            thread::sleep(Duration::from_secs(3));
        }
    });

    (address, handle)
}

fn request() -> pmosoap::Element {
    let service = Action::GetSystemDateAndTime.service().unwrap();
    payload_element(service.namespace(), service.prefix(), "GetSystemDateAndTime", &[])
}

#[test]
fn expired_deadline_never_reaches_the_transport() {
    let client = SoapClient::with_transport(Arc::new(CountingTransport::default()));
    let ctx = CallContext::with_deadline(Instant::now() - Duration::from_millis(10));

    let err = client.invoke("http://camera", &request(), &ctx).unwrap_err();
    assert!(matches!(err, SoapError::Cancelled));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(client.transport().calls.load(Ordering::SeqCst), 0);
}

#[test]
fn transport_failure_is_not_a_fault() {
    let client = SoapClient::with_transport(CountingTransport::default());
    let err = client
        .invoke("http://camera", &request(), &CallContext::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.fault().is_none());
    assert_eq!(client.transport().calls.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_token_aborts_a_pending_call() {
    let (address, _server) = silent_server();
    let client = SoapClient::with_transport(HttpTransport::with_timeout(Duration::from_secs(30)));

    let canceller = Canceller::new();
    let ctx = CallContext::new().cancel_token(canceller.token());

    let started = Instant::now();
    let cancel_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        canceller.cancel();
    });

    let err = client.invoke(&address, &request(), &ctx).unwrap_err();
    cancel_thread.join().unwrap();

    assert!(matches!(err, SoapError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// Lit une requête complète puis rapporte ce que donne la lecture suivante
/// et le temps écoulé avant qu'elle ne revienne.
fn closing_watch_server() -> (
    String,
    crossbeam_channel::Receiver<()>,
    crossbeam_channel::Receiver<(Result<usize, IoErrorKind>, Duration)>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}/onvif/device_service", listener.local_addr().unwrap());
    let (read_tx, read_rx) = crossbeam_channel::bounded(1);
    let (closed_tx, closed_rx) = crossbeam_channel::bounded(1);

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        while !received.windows(13).any(|w| w == b"</s:Envelope>") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
        let _ = read_tx.send(());

        let waiting = Instant::now();
        let outcome = stream.read(&mut buf).map_err(|e| e.kind());
        let _ = closed_tx.send((outcome, waiting.elapsed()));
    });

    (address, read_rx, closed_rx)
}

#[test]
fn cancelled_call_closes_its_connection() {
    let (address, request_read, closed) = closing_watch_server();
    let client = SoapClient::with_transport(HttpTransport::with_timeout(Duration::from_secs(30)));

    let canceller = Canceller::new();
    let ctx = CallContext::new().cancel_token(canceller.token());
    let cancel_thread = thread::spawn(move || {
        request_read.recv_timeout(Duration::from_secs(5)).unwrap();
        canceller.cancel();
    });

    let err = client.invoke(&address, &request(), &ctx).unwrap_err();
    cancel_thread.join().unwrap();
    assert!(matches!(err, SoapError::Cancelled));

    let (outcome, waited) = closed.recv_timeout(Duration::from_secs(6)).unwrap();
    assert!(
        matches!(outcome, Ok(0) | Err(IoErrorKind::ConnectionReset)),
        "connection still open: {:?}",
        outcome
    );
    assert!(waited < Duration::from_secs(2));
}

#[test]
fn expired_deadline_closes_its_connection() {
    let (address, _request_read, closed) = closing_watch_server();
    let client = SoapClient::with_transport(HttpTransport::with_timeout(Duration::from_secs(30)));

    let err = client
        .invoke(&address, &request(), &CallContext::with_timeout(Duration::from_millis(500)))
        .unwrap_err();
    assert!(matches!(err, SoapError::Cancelled));

    let (outcome, waited) = closed.recv_timeout(Duration::from_secs(6)).unwrap();
    assert!(matches!(outcome, Ok(0) | Err(IoErrorKind::ConnectionReset)));
    assert!(waited < Duration::from_secs(2));
}

#[test]
fn deadline_aborts_a_pending_call() {
    let (address, _server) = silent_server();
    let client = SoapClient::with_transport(HttpTransport::with_timeout(Duration::from_secs(30)));

    let started = Instant::now();
    let err = client
        .invoke(&address, &request(), &CallContext::with_timeout(Duration::from_millis(300)))
        .unwrap_err();

    assert!(matches!(err, SoapError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn refused_connection_is_a_transport_error() {
    // Port libéré juste après la réservation : la connexion est refusée
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let client = SoapClient::with_transport(HttpTransport::with_timeout(Duration::from_secs(2)));

    let err = client
        .invoke(
            &format!("http://127.0.0.1:{}/onvif", port),
            &request(),
            &CallContext::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}
