use scale_reader::{AddrFamily, Event, Link, LinkError, ScaleConfig};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn data_sent_while_connecting_is_delivered() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ScaleConfig::new("127.0.0.1", port).unwrap();

    let (rx_send, events) = Link::rx_channel();
    let link = Link::connect(&config, Link::rx_to_channel(rx_send)).unwrap();
    link.send(b"Z\r".to_vec()).unwrap();

    let (mut stream, _) = listener.accept().unwrap();
    let mut got = [0u8; 2];
    stream.read_exact(&mut got).unwrap();
    assert_eq!(&got, b"Z\r");

    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Connected(peer) => assert_eq!(peer.port(), port),
        other => panic!("expected Connected, got {:?}", other),
    }

    stream.write_all(b"0.000 kg\r\n").unwrap();
    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Data(chunk) => assert_eq!(chunk, b"0.000 kg\r\n".to_vec()),
        other => panic!("expected Data, got {:?}", other),
    }

    drop(stream);
    assert!(matches!(events.recv_timeout(TIMEOUT).unwrap(), Event::Closed));
    // The link thread is done and the channel disconnects.
    assert!(events.recv_timeout(TIMEOUT).is_err());
}

#[test]
fn dropping_the_link_closes_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ScaleConfig::new("127.0.0.1", port).unwrap();

    let (rx_send, events) = Link::rx_channel();
    let link = Link::connect(&config, Link::rx_to_channel(rx_send)).unwrap();
    let (mut stream, _) = listener.accept().unwrap();
    assert!(matches!(
        events.recv_timeout(TIMEOUT).unwrap(),
        Event::Connected(_)
    ));

    drop(link);
    let peer = thread::spawn(move || {
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).map(|_| rest.len())
    });
    assert!(matches!(events.recv_timeout(TIMEOUT).unwrap(), Event::Closed));
    assert_eq!(peer.join().unwrap().unwrap(), 0);
}

#[test]
fn resolution_failure_is_an_error_event() {
    let mut config = ScaleConfig::new("127.0.0.1", 9000).unwrap();
    config.family = AddrFamily::V6;

    let (rx_send, events) = Link::rx_channel();
    let _link = Link::connect(&config, Link::rx_to_channel(rx_send)).unwrap();
    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Error(LinkError::Resolve { target, .. }) => assert_eq!(target, "127.0.0.1:9000"),
        other => panic!("expected a resolution error, got {:?}", other),
    }
    assert!(events.recv_timeout(TIMEOUT).is_err());
}

#[test]
fn send_after_close_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ScaleConfig::new("127.0.0.1", port).unwrap();

    let (rx_send, events) = Link::rx_channel();
    let link = Link::connect(&config, Link::rx_to_channel(rx_send)).unwrap();
    let _stream = listener.accept().unwrap();
    assert!(matches!(
        events.recv_timeout(TIMEOUT).unwrap(),
        Event::Connected(_)
    ));

    link.close();
    assert!(matches!(events.recv_timeout(TIMEOUT).unwrap(), Event::Closed));
    assert!(events.recv_timeout(TIMEOUT).is_err());
    assert!(link.send(b"P\r".to_vec()).is_err());
}
