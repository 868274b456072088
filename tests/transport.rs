use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use keysync::keylist::{Endpoint, Keylist};
use keysync::transport::{Fetch, FetchError, HttpTransport, SocksProxy};

const AUTHORITY: &str = "927F419D7EC82C2F149C1BD1403C2657CD994F73";

/// A port with nothing listening on it.
fn closed_port() -> u16 {
    let l = TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

/// Serve exactly one connection with a canned reply.
fn serve_once(reply: Vec<u8>) -> (u16, JoinHandle<()>) {
    let l = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = l.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut conn, _) = l.accept().unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut req = Vec::new();
        let mut buf = [0u8; 512];
        while !req.windows(4).any(|w| w == b"\r\n\r\n") {
            match conn.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => req.extend_from_slice(&buf[..n]),
            }
        }
        let _ = conn.write_all(&reply);
    });
    (port, handle)
}

/// Accept one connection and answer with garbage before reading anything.
fn serve_garbage() -> (u16, JoinHandle<()>) {
    let l = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = l.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut conn, _) = l.accept().unwrap();
        let _ = conn.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
    });
    (port, handle)
}

fn http_reply(status: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5), 1024)
}

#[test]
fn fetch_returns_exact_body() {
    let (port, server) = serve_once(http_reply("200 OK", b"{\"keys\":[]}"));
    let body = transport()
        .fetch(&format!("http://127.0.0.1:{port}/keylist.json"), None)
        .unwrap();
    assert_eq!(body, b"{\"keys\":[]}");
    server.join().unwrap();
}

#[test]
fn malformed_url_is_url_download_error() {
    let err = transport().fetch("not a url", None).unwrap_err();
    assert!(matches!(err, FetchError::UrlDownload { .. }), "{err}");
}

#[test]
fn unreachable_host_is_url_download_error() {
    let err = transport()
        .fetch(&format!("http://127.0.0.1:{}/", closed_port()), None)
        .unwrap_err();
    assert!(matches!(err, FetchError::UrlDownload { .. }), "{err}");
}

#[test]
fn http_error_status_is_url_download_error() {
    let (port, server) = serve_once(http_reply("404 Not Found", b"gone"));
    let err = transport()
        .fetch(&format!("http://127.0.0.1:{port}/missing"), None)
        .unwrap_err();
    assert!(matches!(err, FetchError::UrlDownload { ref reason, .. } if reason.contains("404")), "{err}");
    server.join().unwrap();
}

#[test]
fn oversized_body_is_rejected() {
    let (port, server) = serve_once(http_reply("200 OK", &[b'x'; 4096]));
    let err = transport()
        .fetch(&format!("http://127.0.0.1:{port}/big"), None)
        .unwrap_err();
    assert!(matches!(err, FetchError::UrlDownload { ref reason, .. } if reason.contains("exceeds")), "{err}");
    server.join().unwrap();
}

#[test]
fn maximal_size_cap_reads_whole_body() {
    let (port, server) = serve_once(http_reply("200 OK", b"{\"keys\": []}"));
    let body = HttpTransport::new(Duration::from_secs(5), u64::MAX)
        .fetch(&format!("http://127.0.0.1:{port}/keylist.json"), None)
        .unwrap();
    assert_eq!(body, b"{\"keys\": []}");
    server.join().unwrap();
}

#[test]
fn unreachable_proxy_is_proxy_error() {
    let proxy = SocksProxy { host: "127.0.0.1".into(), port: closed_port() };
    let err = transport()
        .fetch("https://example.com/keylist.json", Some(&proxy))
        .unwrap_err();
    assert!(err.is_proxy(), "{err}");
}

#[test]
fn misbehaving_proxy_is_proxy_error() {
    let (port, server) = serve_garbage();
    let proxy = SocksProxy { host: "127.0.0.1".into(), port };
    let err = transport()
        .fetch("http://example.com/keylist.json", Some(&proxy))
        .unwrap_err();
    assert!(err.is_proxy(), "{err}");
    server.join().unwrap();
}

#[test]
fn keylist_with_broken_proxy_settings_is_proxy_error() {
    let mut ep = Endpoint::new("https://example.com/keylist.json", AUTHORITY.parse().unwrap());
    ep.use_proxy = true;
    ep.proxy_host = Some("127.0.0.1".into());
    ep.proxy_port = Some("not-a-port".into());
    let err = Keylist::new(ep).fetch(&transport()).unwrap_err();
    assert!(err.is_proxy(), "{err}");
}

#[test]
fn keylist_fetch_uses_configured_proxy() {
    let ep = Endpoint::new("https://example.com/keylist.json", AUTHORITY.parse().unwrap())
        .with_proxy("127.0.0.1", closed_port().to_string());
    let err = Keylist::new(ep).fetch(&transport()).unwrap_err();
    assert!(err.is_proxy(), "{err}");
}

#[test]
fn keylist_fetch_returns_bytes_without_retaining_them() {
    let (port, server) = serve_once(http_reply("200 OK", b"{}"));
    let kl = Keylist::new(Endpoint::new(
        format!("http://127.0.0.1:{port}/keylist.json"),
        AUTHORITY.parse().unwrap(),
    ));
    assert_eq!(kl.fetch(&transport()).unwrap(), b"{}");
    assert!(kl.fetched_document().is_none());
    server.join().unwrap();
}
