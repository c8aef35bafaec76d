//! End-to-end relay tests over real sockets: a fake tunnel agent on one
//! side, raw public HTTP connections on the other.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use burrow_proto::{Frame, FrameReader, FrameSigner, FrameWriter};
use burrow_relay::registry::ClientRegistry;
use burrow_relay::router::RequestRouter;
use burrow_relay::server::{FrontendConfig, http_frontend, tunnel};

const SECRET: &str = "integration-secret";

async fn start_relay() -> (SocketAddr, SocketAddr, ClientRegistry) {
    let registry = ClientRegistry::new();
    let router = RequestRouter::new(registry.clone(), Duration::from_secs(10));

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tunnel_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    let tunnel_addr = tunnel_listener.local_addr().unwrap();

    tokio::spawn(http_frontend::serve(
        http_listener,
        router,
        FrontendConfig::default(),
    ));
    tokio::spawn(tunnel::serve(
        tunnel_listener,
        registry.clone(),
        FrameSigner::new(SECRET),
    ));

    (http_addr, tunnel_addr, registry)
}

/// Wait until the registry sees `n` clients (registration is async).
async fn await_clients(registry: &ClientRegistry, n: usize) {
    for _ in 0..200 {
        if registry.client_count().await == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("registry never reached {n} clients");
}

/// Connect a fake agent that answers every request frame by applying
/// `respond` to the raw request bytes.
fn spawn_agent<F>(tunnel_addr: SocketAddr, respond: F) -> tokio::task::JoinHandle<()>
where
    F: Fn(&[u8]) -> Vec<u8> + Send + 'static,
{
    tokio::spawn(async move {
        let stream = TcpStream::connect(tunnel_addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half, FrameSigner::new(SECRET));
        let mut writer = FrameWriter::new(write_half, FrameSigner::new(SECRET));

        writer.write_frame(&Frame::register(Uuid::new_v4())).await.unwrap();

        while let Ok(Some(frame)) = reader.read_frame().await {
            if let Frame::Request(req) = frame {
                let response = Frame::response(req.id, respond(&req.data));
                writer.write_frame(&response).await.unwrap();
            }
        }
    })
}

async fn public_request(http_addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(http_addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn health_probe_round_trip() {
    let (http_addr, tunnel_addr, registry) = start_relay().await;

    let _agent = spawn_agent(tunnel_addr, |_req| {
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 20\r\n\r\n{\"status\":\"healthy\"}"
            .to_vec()
    });
    await_clients(&registry, 1).await;

    let response =
        public_request(http_addr, b"GET /health HTTP/1.1\r\nHost: relay\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("{\"status\":\"healthy\"}"));
}

#[tokio::test]
async fn empty_registry_yields_503() {
    let (http_addr, _tunnel_addr, _registry) = start_relay().await;

    let response = public_request(http_addr, b"GET /x HTTP/1.1\r\nHost: relay\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
}

#[tokio::test]
async fn chunked_upload_is_rejected_with_501() {
    let (http_addr, _tunnel_addr, _registry) = start_relay().await;

    let response = public_request(
        http_addr,
        b"POST /upload HTTP/1.1\r\nHost: relay\r\nTransfer-Encoding: chunked\r\n\r\n",
    )
    .await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
}

#[tokio::test]
async fn bad_signature_closes_tunnel_connection() {
    let (_http_addr, tunnel_addr, registry) = start_relay().await;

    let stream = TcpStream::connect(tunnel_addr).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut writer = FrameWriter::new(write_half, FrameSigner::new("not-the-secret"));
    writer.write_frame(&Frame::register(Uuid::new_v4())).await.unwrap();

    // The relay drops the frame and closes the connection.
    let mut reader = read_half;
    let mut buf = [0u8; 16];
    let closed = tokio::time::timeout(Duration::from_secs(5), reader.read(&mut buf))
        .await
        .expect("relay did not close the connection");
    assert_eq!(closed.unwrap(), 0);
    assert_eq!(registry.client_count().await, 0);
}

#[tokio::test]
async fn request_body_reaches_agent_verbatim() {
    let (http_addr, tunnel_addr, registry) = start_relay().await;

    // Echo the request back so the test can inspect what the agent saw.
    let _agent = spawn_agent(tunnel_addr, |req| {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
            req.len()
        )
        .into_bytes();
        response.extend_from_slice(req);
        response
    });
    await_clients(&registry, 1).await;

    let body: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
    let mut request = format!(
        "POST /upload HTTP/1.1\r\nHost: relay\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);

    let response = public_request(http_addr, &request).await;

    // The echoed payload (after the response's own head) must be the
    // exact request wire bytes, body included.
    let echoed = &response[response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .unwrap()..];
    assert_eq!(echoed, request.as_slice());
}

#[tokio::test]
async fn concurrent_requests_land_on_the_right_connections() {
    let (http_addr, tunnel_addr, registry) = start_relay().await;

    // Respond with the request's own start line as the body.
    let _agent = spawn_agent(tunnel_addr, |req| {
        let line_end = req.windows(2).position(|w| w == b"\r\n").unwrap();
        let start_line = &req[..line_end];
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            start_line.len()
        )
        .into_bytes();
        response.extend_from_slice(start_line);
        response
    });
    await_clients(&registry, 1).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        tasks.push(tokio::spawn(async move {
            let raw = format!("GET /path/{i} HTTP/1.1\r\nHost: relay\r\n\r\n");
            (i, public_request(http_addr, raw.as_bytes()).await)
        }));
    }

    for task in tasks {
        let (i, response) = task.await.unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(
            text.ends_with(&format!("GET /path/{i} HTTP/1.1")),
            "response for /path/{i} was misdelivered: {text}"
        );
    }
}
