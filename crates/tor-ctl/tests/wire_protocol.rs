//! Black-box tests against [`Connection`] over a `tokio::io::duplex` pair
//! standing in for a real control socket, the same substitution-for-a-
//! socket technique `Connection::from_io`'s own docs describe.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tor_ctl::{BusEvent, Command, Connection, ControlError, EventKind, Executor};

async fn read_line(io: &mut tokio::io::DuplexStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        io.read_exact(&mut byte).await.unwrap();
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n") {
            buf.truncate(buf.len() - 2);
            return String::from_utf8(buf).unwrap();
        }
    }
}

#[tokio::test]
async fn simple_command_round_trips_to_success() {
    let (client_io, mut server_io) = tokio::io::duplex(4096);
    let connection = Connection::from_io(client_io, 64 * 1024);

    let send = tokio::spawn(async move { connection.send(Command::new("GETINFO").arg("version")).await });

    assert_eq!(read_line(&mut server_io).await, "GETINFO version");
    server_io.write_all(b"250-version=0.4.7.13\r\n").await.unwrap();
    server_io.write_all(b"250 OK\r\n").await.unwrap();

    let reply = send.await.unwrap().unwrap();
    assert_eq!(reply.status(), 250);
    assert_eq!(reply.lines.len(), 2);
    assert_eq!(reply.final_message(), "OK");
}

#[tokio::test]
async fn data_block_command_is_dot_stuffed_on_the_wire() {
    let (client_io, mut server_io) = tokio::io::duplex(4096);
    let connection = Connection::from_io(client_io, 64 * 1024);

    let command = Command::new("POSTDESCRIPTOR").with_data(b"line one\n.foo\nline three".to_vec());
    let send = tokio::spawn(async move { connection.send(command).await });

    assert_eq!(read_line(&mut server_io).await, "+POSTDESCRIPTOR");
    assert_eq!(read_line(&mut server_io).await, "line one");
    assert_eq!(
        read_line(&mut server_io).await,
        "..foo",
        "a leading dot on a data line must be doubled on the wire"
    );
    assert_eq!(read_line(&mut server_io).await, "line three");
    assert_eq!(read_line(&mut server_io).await, ".");

    server_io.write_all(b"250 OK\r\n").await.unwrap();
    let reply = send.await.unwrap().unwrap();
    assert!(reply.is_success());
}

#[tokio::test]
async fn event_interleaved_between_commands_reaches_the_bus_not_the_job() {
    let (client_io, mut server_io) = tokio::io::duplex(4096);
    let connection = Connection::from_io(client_io, 64 * 1024);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    connection.subscribe(
        EventKind::Control,
        Executor::Immediate,
        std::sync::Arc::new(move |event| {
            if let BusEvent::Control(record) = event {
                let _ = tx.send(record);
            }
        }),
    );

    let job = connection.enqueue(Command::new("GETINFO").arg("version"));
    assert_eq!(read_line(&mut server_io).await, "GETINFO version");

    // tor interleaves an async event before the reply to the in-flight command.
    server_io
        .write_all(b"650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=10\r\n")
        .await
        .unwrap();
    server_io.write_all(b"250 OK\r\n").await.unwrap();

    let reply = job.wait().await.unwrap();
    assert_eq!(reply.final_message(), "OK");

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.keyword, "STATUS_CLIENT");
}

#[tokio::test]
async fn malformed_line_tears_down_the_connection() {
    let (client_io, mut server_io) = tokio::io::duplex(4096);
    let connection = Connection::from_io(client_io, 64 * 1024);

    let job = connection.enqueue(Command::new("GETINFO").arg("version"));
    assert_eq!(read_line(&mut server_io).await, "GETINFO version");
    server_io.write_all(b"not a status line\r\n").await.unwrap();

    let result = job.wait().await;
    assert!(matches!(result, Err(ControlError::Protocol { .. })));
}

#[tokio::test]
async fn socket_eof_fails_pending_jobs_with_closed() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let connection = Connection::from_io(client_io, 64 * 1024);

    let job = connection.enqueue(Command::new("GETINFO").arg("version"));
    drop(server_io);

    let result = job.wait().await;
    assert!(matches!(result, Err(ControlError::Closed)));
}
