//! End-to-end RPC round trip over a real TCP socket: binds a client,
//! reads it back, and checks the `interfaces()` catalog, all from several
//! concurrently-connecting threads against one `router_lock`.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;

use kitero_core::{Interface, QoS, Router};
use kitero_rpc::RpcServer;
use serde_json::{json, Value};

fn sample_router() -> Router {
    let qos = QoS::new("qos1", "basic", HashMap::new());
    let mut qoses = HashMap::new();
    qoses.insert("qos1".to_string(), qos);
    let mut interfaces = HashMap::new();
    interfaces.insert("eth1".to_string(), Interface::new("eth1", "uplink", qoses));
    Router::new(vec!["eth0".to_string()], interfaces)
}

fn call(stream: &mut TcpStream, method: &str, args: &[Value]) -> Value {
    let mut request = vec![Value::from(method)];
    request.extend_from_slice(args);
    writeln!(stream, "{}", Value::Array(request)).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    serde_json::from_str(&line).unwrap()
}

#[test]
fn bind_then_client_round_trips_over_the_wire() {
    let server = RpcServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    let router = Arc::new(Mutex::new(sample_router()));
    thread::spawn(move || server.serve(router));

    let mut stream = TcpStream::connect(addr).unwrap();

    let response = call(
        &mut stream,
        "bind_client",
        &[Value::from("192.168.1.5"), Value::from("eth1"), Value::from("qos1")],
    );
    assert_eq!(response["status"], 0);

    let response = call(&mut stream, "client", &[Value::from("192.168.1.5")]);
    assert_eq!(response, json!({"status": 0, "value": ["eth1", "qos1"]}));

    let response = call(&mut stream, "interfaces", &[]);
    assert_eq!(response["status"], 0);
    assert!(response["value"]["eth1"].is_object());
}

#[test]
fn concurrent_clients_all_succeed_under_the_router_lock() {
    let server = RpcServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    let router = Arc::new(Mutex::new(sample_router()));
    thread::spawn(move || server.serve(router));

    let handles: Vec<_> = (0..7)
        .map(|i| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                let client = format!("10.0.0.{}", i + 1);
                let response = call(
                    &mut stream,
                    "bind_client",
                    &[Value::from(client.clone()), Value::from("eth1"), Value::from("qos1")],
                );
                assert_eq!(response["status"], 0);
                let response = call(&mut stream, "client", &[Value::from(client)]);
                assert_eq!(response["value"], json!(["eth1", "qos1"]));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn unknown_method_keeps_the_connection_open() {
    let server = RpcServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    let router = Arc::new(Mutex::new(sample_router()));
    thread::spawn(move || server.serve(router));

    let mut stream = TcpStream::connect(addr).unwrap();
    let response = call(&mut stream, "delete_everything", &[]);
    assert_eq!(response["status"], -1);
    assert_eq!(response["exception"]["class"], "AttributeError");

    // The same connection still answers subsequent requests.
    let response = call(&mut stream, "ping", &[]);
    assert_eq!(response, json!({"status": 0, "value": null}));
}
