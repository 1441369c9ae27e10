use super::wait_until;
use crate::mock::*;
use crate::*;
use cocaine::{CocaineError, ServiceFactory, ServiceState};
use rmpv::Value;
use rstest::*;
use std::sync::Arc;
use std::time::Duration;

#[logfn]
#[rstest]
fn test_streaming_call(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 1, &["list", "echo"]).await;
        mock.on("node", "echo", vec![Answer::Chunk(Value::from("echo")), Answer::Choke]);

        let factory = ServiceFactory::new(mock.config());
        let node = factory.create_service("node", 1);
        assert_eq!(node.state(), ServiceState::Disconnected);
        let mut ch = node.call_args("echo", &("hi", 1)).await.expect("call");
        assert_eq!(ch.session(), 1);
        assert_eq!(ch.rx.get().await.expect("chunk"), Value::from("echo"));
        assert!(ch.rx.get().await.unwrap_err().is_choke());
        // completed sessions keep answering Choke
        assert!(ch.rx.get().await.unwrap_err().is_choke());
        assert_eq!(node.state(), ServiceState::Connected);
        assert_eq!(node.methods(), vec!["list".to_string(), "echo".to_string()]);
        assert_eq!(node.session_count(), 0);
    });
}

#[logfn]
#[rstest]
fn test_service_error(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 1, &["list"]).await;
        mock.on("node", "list", vec![Answer::error(100, "reason")]);

        let factory = ServiceFactory::new(mock.config());
        let node = factory.create_service("node", 1);
        let mut ch = node.call("list", vec![]).await.expect("call");
        match ch.rx.get().await {
            Err(CocaineError::Service(e)) => {
                assert_eq!(e.category, MOCK_CATEGORY);
                assert_eq!(e.code, 100);
                assert_eq!(e.reason, "reason");
                assert_eq!(e.service, "node");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(ch.rx.get().await.unwrap_err().is_choke());
    });
}

#[logfn]
#[rstest]
fn test_version_mismatch(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 2, &["list"]).await;

        let factory = ServiceFactory::new(mock.config());
        let node = factory.create_service("node", 1);
        match node.call("list", vec![]).await {
            Err(CocaineError::VersionMismatch { service, expected, got }) => {
                assert_eq!((service.as_str(), expected, got), ("node", 1, 2));
            }
            other => panic!("unexpected {:?}", other.map(|ch| ch.session())),
        }
        // the service itself was never contacted
        assert_eq!(mock.connections("node"), 0);
        assert_eq!(mock.frames("node"), 0);
        assert_eq!(node.state(), ServiceState::Disconnected);

        // version 0 takes whatever is published
        mock.on("node", "list", vec![Answer::Chunk(Value::from(1)), Answer::Choke]);
        let any = factory.create_service("node", 0);
        let mut ch = any.call("list", vec![]).await.expect("call");
        assert_eq!(ch.rx.get().await.expect("chunk"), Value::from(1));
        assert_eq!(mock.connections("node"), 1);
    });
}

#[logfn]
#[rstest]
fn test_unknown_method_and_service(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 1, &["list"]).await;

        let factory = ServiceFactory::new(mock.config());
        let node = factory.create_service("node", 1);
        match node.call("missing", vec![]).await {
            Err(CocaineError::NoSuchMethod(name)) => assert_eq!(name, "missing"),
            other => panic!("unexpected {:?}", other.map(|ch| ch.session())),
        }
        assert_eq!(mock.frames("node"), 0);

        let nope = factory.create_service("nope", 0);
        match nope.call("list", vec![]).await {
            Err(CocaineError::Resolve { name, reason }) => {
                assert_eq!(name, "nope");
                assert_eq!(reason, "service is not available");
            }
            other => panic!("unexpected {:?}", other.map(|ch| ch.session())),
        }
    });
}

#[logfn]
#[rstest]
fn test_receive_timeout(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 1, &["list"]).await;
        mock.on("node", "list", vec![Answer::Hang]);

        let factory = ServiceFactory::new(mock.config());
        let node = factory.create_service("node", 1);
        let mut ch = node.call("list", vec![]).await.expect("call");
        match ch.rx.get_timeout(Duration::from_millis(100)).await {
            Err(CocaineError::Timeout(d)) => assert_eq!(d, Duration::from_millis(100)),
            other => panic!("unexpected {:?}", other),
        }
        // a timeout does not end the session
        assert_eq!(node.session_count(), 1);
        drop(ch);
        assert_eq!(node.session_count(), 0);
    });
}

#[logfn]
#[rstest]
fn test_concurrent_calls(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 1, &["echo"]).await;
        mock.on("node", "echo", vec![Answer::Chunk(Value::from("echo")), Answer::Choke]);

        let factory = ServiceFactory::new(mock.config());
        let node = Arc::new(factory.create_service("node", 1));
        let mut handles = Vec::new();
        for i in 0..10 {
            let node = node.clone();
            handles.push(tokio::spawn(async move {
                let mut ch = node.call("echo", vec![Value::from(i)]).await.expect("call");
                assert_eq!(ch.rx.get().await.expect("chunk"), Value::from("echo"));
                ch.session()
            }));
        }
        let mut sessions = Vec::new();
        for h in handles {
            sessions.push(h.await.expect("join"));
        }
        sessions.sort();
        sessions.dedup();
        assert_eq!(sessions, (1..=10).collect::<Vec<u64>>());
        assert_eq!(mock.connections("node"), 1);
        assert_eq!(mock.frames(LOCATOR), 1);
    });
}

#[logfn]
#[rstest]
fn test_traced_call(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 1, &["echo"]).await;
        mock.on("node", "echo", vec![Answer::Chunk(Value::Nil), Answer::Choke]);

        let factory = ServiceFactory::new(mock.config());
        let node = factory.create_service("node", 1);
        let trace = cocaine::headers::Trace { trace_id: 1, span_id: 2, parent_id: 0 };
        let mut ch = node.call_traced("echo", vec![], &trace).await.expect("call");
        assert_eq!(ch.rx.get().await.expect("chunk"), Value::Nil);
        assert_eq!(mock.last_headers("node"), Some(trace.pack()));
    });
}

#[logfn]
#[rstest]
fn test_array_chunk(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 1, &["echo"]).await;
        let chunk = Value::Array(vec![Value::from("echo")]);
        mock.on("node", "echo", vec![Answer::Chunk(chunk.clone()), Answer::Choke]);

        let factory = ServiceFactory::new(mock.config());
        let node = factory.create_service("node", 1);
        let mut ch = node.call("echo", vec![]).await.expect("call");
        // a one element array stays an array
        assert_eq!(ch.rx.get().await.expect("chunk"), chunk);
        assert!(ch.rx.get().await.unwrap_err().is_choke());
    });
}

#[logfn]
#[rstest]
fn test_reconnect_skips_resolve_cache(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        let endpoint = mock.register("node", 1, &["list"]).await;
        mock.on("node", "list", vec![Answer::Chunk(Value::from(1)), Answer::Choke]);

        let mut config = mock.config();
        config.resolve_cache_ttl = Some(Duration::from_secs(60));
        let factory = ServiceFactory::new(config);
        let node = factory.create_service("node", 1);
        let mut ch = node.call("list", vec![]).await.expect("call");
        assert_eq!(ch.rx.get().await.expect("chunk"), Value::from(1));
        assert!(matches!(node.call("echo", vec![]).await, Err(CocaineError::NoSuchMethod(_))));

        // the service restarts behind the same endpoint with one more method
        mock.publish("node", vec![endpoint], 1, streaming_api(&["list", "echo"]));
        mock.drop_connections("node");
        assert!(wait_until(|| node.state() == ServiceState::Disconnected).await);

        mock.on("node", "echo", vec![Answer::Chunk(Value::from("echo")), Answer::Choke]);
        let mut ch = node.call("echo", vec![]).await.expect("call after restart");
        assert_eq!(ch.rx.get().await.expect("chunk"), Value::from("echo"));
        assert_eq!(node.methods(), vec!["list".to_string(), "echo".to_string()]);
        assert_eq!(mock.frames(LOCATOR), 2);
        assert_eq!(mock.connections("node"), 2);
    });
}

#[logfn]
#[rstest]
fn test_concurrent_calls_share_failed_connect(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        let dead = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let port = listener.local_addr().expect("addr").port();
            cocaine::Endpoint::new("127.0.0.1", port)
        };
        mock.publish("dead", vec![dead], 1, streaming_api(&["list"]));
        // keep the resolve in flight until every caller is waiting on it
        mock.delay(LOCATOR, Duration::from_millis(200));

        let factory = ServiceFactory::new(mock.config());
        let service = Arc::new(factory.create_service("dead", 1));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.call("list", vec![]).await.map(|ch| ch.session())
            }));
        }
        for h in handles {
            match h.await.expect("join") {
                Err(CocaineError::Connect(e)) => assert_eq!(e.service, "dead"),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(mock.frames(LOCATOR), 1);
        assert_eq!(service.state(), ServiceState::Disconnected);

        // a caller arriving afterwards makes its own attempt
        assert!(service.call("list", vec![]).await.is_err());
        assert_eq!(mock.frames(LOCATOR), 2);
    });
}
