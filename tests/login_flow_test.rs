//! End-to-end tests between a serving and a dialing engine: login
//! exchange and heartbeat cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use framelink::commands::login::{
    self, Heartbeat, LoginRequest, LoginResponse, CMD_HEARTBEAT_REQ, CMD_LOGIN_REQ, CMD_LOGIN_RESP,
};
use framelink::config::Config;
use framelink::engine::EngineCallbacks;
use framelink::{CommandRouter, Engine};

fn test_config(timer_interval: Duration) -> Config {
    let mut config = Config::default();
    config.network.timer_interval = timer_interval;
    config.network.recv_timeout = Duration::from_millis(200);
    config.network.send_timeout = Duration::from_secs(1);
    config
}

#[tokio::test]
async fn test_login_round_trip() {
    // Serving side: login handler replies 200/SpiderMan.
    let mut server_router = CommandRouter::new();
    login::register_server(&mut server_router);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Arc::new(Engine::new(
        test_config(Duration::from_secs(1)).network,
        server_router,
        EngineCallbacks::new(),
    ));
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = serving.serve_listener(listener).await;
    });

    // Dialing side: send the login on connect, report the response.
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<LoginResponse>();
    let mut client_router = CommandRouter::new();
    client_router.register::<LoginResponse, _, _>(CMD_LOGIN_RESP, move |session, response| {
        let response_tx = response_tx.clone();
        async move {
            session.mark_logon();
            response_tx.send(response).unwrap();
            Ok(())
        }
    });

    let callbacks = EngineCallbacks::new().on_connect(|session| async move {
        session
            .send(
                CMD_LOGIN_REQ,
                &LoginRequest {
                    account: "dio".to_string(),
                },
            )
            .await
    });

    let mut client_config = test_config(Duration::from_secs(1));
    client_config.network.bind_addr = addr;
    let client = Engine::new(client_config.network, client_router, callbacks);
    client.connect(Some(Duration::from_secs(2))).await.unwrap();

    let response = timeout(Duration::from_secs(3), response_rx.recv())
        .await
        .expect("login response should arrive")
        .unwrap();
    assert_eq!(response.code, 200);
    assert_eq!(response.info.id, 1);
    assert_eq!(response.info.name, "SpiderMan.");

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_heartbeat_emitted_per_interval() {
    // Serving side counts heartbeat requests.
    let (beat_tx, mut beat_rx) = mpsc::unbounded_channel::<()>();
    let mut server_router = CommandRouter::new();
    server_router.register::<Heartbeat, _, _>(CMD_HEARTBEAT_REQ, move |_session, _hb| {
        let beat_tx = beat_tx.clone();
        async move {
            beat_tx.send(()).unwrap();
            Ok(())
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Arc::new(Engine::new(
        test_config(Duration::from_secs(10)).network,
        server_router,
        EngineCallbacks::new(),
    ));
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = serving.serve_listener(listener).await;
    });

    // Dialing side emits one heartbeat per timer expiry, no other traffic.
    let callbacks = EngineCallbacks::new().on_timeout(|session| async move {
        session.send(CMD_HEARTBEAT_REQ, &Heartbeat {}).await
    });

    let mut client_config = test_config(Duration::from_millis(100));
    client_config.network.bind_addr = addr;
    let client = Engine::new(client_config.network, CommandRouter::new(), callbacks);
    client.connect(Some(Duration::from_secs(2))).await.unwrap();

    // Roughly 3.5 intervals of quiet time.
    tokio::time::sleep(Duration::from_millis(350)).await;
    client.shutdown();
    server.shutdown();

    let mut beats = 0;
    while beat_rx.try_recv().is_ok() {
        beats += 1;
    }
    assert!(
        (2..=5).contains(&beats),
        "expected one heartbeat per interval, saw {}",
        beats
    );
}
