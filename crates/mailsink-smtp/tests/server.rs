//! Integration tests against a real listener on a loopback port.

#![allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;

use mailsink_mime::encoding::encode_base64;
use mailsink_smtp::{
    MailItemReceiver, Reply, ReplyCode, ServerConfig, ServerHandle, SmtpServer, mail_channel,
};

struct TestServer {
    addr: SocketAddr,
    handle: ServerHandle,
    serve: JoinHandle<mailsink_smtp::Result<()>>,
    rx: MailItemReceiver,
}

async fn start(config: ServerConfig) -> TestServer {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        ..config
    };
    let (sender, rx) = mail_channel(16);
    let server = SmtpServer::bind(config, sender).await.unwrap();
    let addr = server.local_addr();
    let handle = server.handle();
    let serve = tokio::spawn(server.serve());
    TestServer {
        addr,
        handle,
        serve,
        rx,
    }
}

/// Minimal line-based SMTP client.
struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    /// Reads one possibly multi-line reply; `None` on EOF.
    async fn reply(&mut self) -> Option<Reply> {
        let mut code = None;
        let mut message = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await.unwrap() == 0 {
                return None;
            }
            let line = line.trim_end_matches(['\r', '\n']);
            let digits: u16 = line[..3].parse().unwrap();
            assert_eq!(*code.get_or_insert(digits), digits, "code changed mid-reply");
            message.push(line.get(4..).unwrap_or_default().to_string());
            // "250-" continues the reply, "250 " or a bare code ends it
            if line.as_bytes().get(3) != Some(&b'-') {
                return Some(Reply::new(ReplyCode::new(digits), message));
            }
        }
    }

    async fn code(&mut self) -> u16 {
        self.reply().await.unwrap().code.as_u16()
    }

    async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    async fn command(&mut self, line: &str) -> u16 {
        self.send(&format!("{line}\r\n")).await;
        self.code().await
    }

    async fn greeted(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        assert_eq!(client.code().await, 220);
        assert_eq!(client.command("EHLO test.local").await, 250);
        client
    }

    async fn send_mail(&mut self, from: &str, to: &[&str], message: &str) -> u16 {
        assert_eq!(self.command(&format!("MAIL FROM:<{from}>")).await, 250);
        for rcpt in to {
            assert_eq!(self.command(&format!("RCPT TO:<{rcpt}>")).await, 250);
        }
        assert_eq!(self.command("DATA").await, 354);
        self.send(message).await;
        self.send(".\r\n").await;
        self.code().await
    }
}

#[tokio::test]
async fn test_capture_scenario() {
    let mut server = start(ServerConfig::default()).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.code().await, 220);
    assert_eq!(client.command("HELO x").await, 250);
    assert_eq!(client.command("MAIL FROM:<a@b.com>").await, 250);
    assert_eq!(client.command("RCPT TO:<c@d.com>").await, 250);
    assert_eq!(client.command("DATA").await, 354);
    client.send("Subject: Hi\r\n\r\nHello\r\n.\r\n").await;
    assert_eq!(client.code().await, 250);
    assert_eq!(client.command("QUIT").await, 221);
    assert!(client.reply().await.is_none());

    let item = server.rx.recv().await.unwrap();
    assert_eq!(item.from_address, "a@b.com");
    assert_eq!(item.to_addresses, vec!["c@d.com".to_string()]);
    assert_eq!(item.subject, "Hi");
    assert_eq!(item.body.text.as_deref(), Some("Hello"));
}

#[tokio::test]
async fn test_ehlo_advertises_limits() {
    let server = start(ServerConfig {
        max_message_size: 2048,
        ..ServerConfig::default()
    })
    .await;
    let mut client = Client::connect(server.addr).await;
    client.reply().await.unwrap();

    client.send("EHLO test.local\r\n").await;
    let reply = client.reply().await.unwrap();
    assert_eq!(reply.code.as_u16(), 250);
    assert!(reply.message.iter().any(|line| line == "SIZE 2048"));
    assert!(reply.message.iter().any(|line| line == "8BITMIME"));
}

#[tokio::test]
async fn test_capacity_rejection() {
    let server = start(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;

    let mut first = Client::greeted(server.addr).await;

    let mut second = Client::connect(server.addr).await;
    let reply = second.reply().await.unwrap();
    assert_eq!(reply.code.as_u16(), 421);
    assert!(reply.message_text().contains("Too many connections"));
    assert!(second.reply().await.is_none());

    assert_eq!(first.command("NOOP").await, 250);
    assert_eq!(server.handle.live_connections(), 1);
}

#[tokio::test]
async fn test_slot_is_freed_after_quit() {
    let server = start(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;

    let mut first = Client::greeted(server.addr).await;
    assert_eq!(first.command("QUIT").await, 221);
    assert!(first.reply().await.is_none());

    // Release happens when the handler task unwinds.
    for _ in 0..50 {
        if server.handle.live_connections() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut second = Client::connect(server.addr).await;
    assert_eq!(second.code().await, 220);
}

#[tokio::test]
async fn test_oversized_message_is_refused() {
    let mut server = start(ServerConfig {
        max_message_size: 1024,
        ..ServerConfig::default()
    })
    .await;
    let mut client = Client::greeted(server.addr).await;

    let big = format!("Subject: big\r\n\r\n{}\r\n", "x".repeat(100).repeat(20));
    assert_eq!(client.send_mail("a@b.com", &["c@d.com"], &big).await, 552);

    let small = "Subject: small\r\n\r\nok\r\n";
    assert_eq!(client.send_mail("a@b.com", &["c@d.com"], small).await, 250);

    assert_eq!(server.rx.recv().await.unwrap().subject, "small");
    assert!(server.rx.try_recv().is_none());
}

#[tokio::test]
async fn test_declared_size_above_limit() {
    let server = start(ServerConfig {
        max_message_size: 1024,
        ..ServerConfig::default()
    })
    .await;
    let mut client = Client::greeted(server.addr).await;
    assert_eq!(client.command("MAIL FROM:<a@b.com> SIZE=4096").await, 552);
    assert_eq!(client.command("MAIL FROM:<a@b.com> SIZE=512").await, 250);
}

#[tokio::test]
async fn test_rset_starts_fresh_transaction() {
    let mut server = start(ServerConfig::default()).await;
    let mut client = Client::greeted(server.addr).await;

    assert_eq!(client.command("MAIL FROM:<old@b.com>").await, 250);
    assert_eq!(client.command("RCPT TO:<dropped@d.com>").await, 250);
    assert_eq!(client.command("RSET").await, 250);

    let code = client
        .send_mail("new@b.com", &["kept@d.com"], "Subject: fresh\r\n\r\nbody\r\n")
        .await;
    assert_eq!(code, 250);

    let item = server.rx.recv().await.unwrap();
    assert_eq!(item.from_address, "new@b.com");
    assert_eq!(item.to_addresses, vec!["kept@d.com".to_string()]);
}

#[tokio::test]
async fn test_out_of_sequence_commands() {
    let mut server = start(ServerConfig::default()).await;
    let mut client = Client::connect(server.addr).await;
    assert_eq!(client.code().await, 220);

    assert_eq!(client.command("MAIL FROM:<a@b.com>").await, 503);
    assert_eq!(client.command("HELO x").await, 250);
    assert_eq!(client.command("RCPT TO:<c@d.com>").await, 503);
    assert_eq!(client.command("DATA").await, 503);
    assert_eq!(client.command("MAIL FROM:<a@b.com>").await, 250);
    assert_eq!(client.command("MAIL FROM:<again@b.com>").await, 503);
    assert_eq!(client.command("DATA").await, 503);
    assert_eq!(client.command("QUIT").await, 221);

    assert!(server.rx.try_recv().is_none());
}

#[tokio::test]
async fn test_error_budget_closes_connection() {
    let server = start(ServerConfig {
        max_errors: 3,
        ..ServerConfig::default()
    })
    .await;
    let mut client = Client::greeted(server.addr).await;

    assert_eq!(client.command("BOGUS").await, 500);
    assert_eq!(client.command("BOGUS").await, 500);
    assert_eq!(client.command("BOGUS").await, 421);
    assert!(client.reply().await.is_none());
}

#[tokio::test]
async fn test_concurrent_clients_each_capture() {
    let mut server = start(ServerConfig::default()).await;

    let clients: Vec<_> = (0..8)
        .map(|n| {
            let addr = server.addr;
            tokio::spawn(async move {
                let mut client = Client::greeted(addr).await;
                let message = format!("Subject: client {n}\r\n\r\nbody {n}\r\n");
                let code = client
                    .send_mail(&format!("sender{n}@b.com"), &["c@d.com"], &message)
                    .await;
                client.command("QUIT").await;
                code
            })
        })
        .collect();

    for client in clients {
        assert_eq!(client.await.unwrap(), 250);
    }

    let mut subjects = Vec::new();
    for _ in 0..8 {
        subjects.push(server.rx.recv().await.unwrap().subject);
    }
    subjects.sort();
    let mut expected: Vec<_> = (0..8).map(|n| format!("client {n}")).collect();
    expected.sort();
    assert_eq!(subjects, expected);
}

#[tokio::test]
async fn test_multipart_attachments_round_trip() {
    let mut server = start(ServerConfig::default()).await;
    let mut client = Client::greeted(server.addr).await;

    let payloads: Vec<Vec<u8>> = vec![
        b"plain attachment".to_vec(),
        (0u8..=255).collect(),
        vec![0xAB; 3000],
    ];

    let mut message = String::from(
        "Subject: files\r\nMIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\r\n\
         --XYZ\r\nContent-Type: text/plain\r\n\r\nsee attached\r\n",
    );
    for (n, payload) in payloads.iter().enumerate() {
        message.push_str(&format!(
            "--XYZ\r\nContent-Type: application/octet-stream\r\n\
             Content-Disposition: attachment; filename=\"file{n}.bin\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{}\r\n",
            encode_base64(payload)
        ));
    }
    message.push_str("--XYZ--\r\n");

    assert_eq!(client.send_mail("a@b.com", &["c@d.com"], &message).await, 250);

    let item = server.rx.recv().await.unwrap();
    assert_eq!(item.body.text.as_deref(), Some("see attached"));
    assert_eq!(item.attachments.len(), payloads.len());
    for (n, (attachment, payload)) in item.attachments.iter().zip(&payloads).enumerate() {
        assert_eq!(attachment.file_name, format!("file{n}.bin"));
        assert_eq!(&attachment.contents, payload);
    }
}

#[tokio::test]
async fn test_stop_drains_open_transaction() {
    let mut server = start(ServerConfig::default()).await;
    let mut idle = Client::greeted(server.addr).await;
    let mut busy = Client::greeted(server.addr).await;
    assert_eq!(busy.command("MAIL FROM:<a@b.com>").await, 250);

    let handle = server.handle.clone();
    let stop = tokio::spawn(async move { handle.stop(Duration::from_secs(10)).await });

    // Idle session is told to go away at once.
    assert_eq!(idle.code().await, 421);

    assert_eq!(busy.command("RCPT TO:<c@d.com>").await, 250);
    assert_eq!(busy.command("DATA").await, 354);
    busy.send("Subject: last one\r\n\r\nbody\r\n.\r\n").await;
    assert_eq!(busy.code().await, 250);
    assert_eq!(busy.code().await, 421);

    let report = stop.await.unwrap();
    assert!(report.drained);
    assert_eq!(report.forced, 0);
    server.serve.await.unwrap().unwrap();

    assert_eq!(server.rx.recv().await.unwrap().subject, "last one");
    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn test_stop_forces_stuck_transaction() {
    let mut server = start(ServerConfig::default()).await;
    let mut stuck = Client::greeted(server.addr).await;
    assert_eq!(stuck.command("MAIL FROM:<a@b.com>").await, 250);
    assert_eq!(stuck.command("RCPT TO:<c@d.com>").await, 250);
    assert_eq!(stuck.command("DATA").await, 354);
    stuck.send("Subject: never finished\r\n\r\n").await;

    let report = server.handle.stop(Duration::from_millis(200)).await;
    assert!(!report.drained);
    assert_eq!(report.forced, 1);
    assert_eq!(server.handle.live_connections(), 0);

    assert!(stuck.reply().await.is_none());
    assert!(server.rx.try_recv().is_none());
}
