use super::wait_until;
use crate::mock::*;
use crate::*;
use cocaine::ServiceFactory;
use rmpv::Value;
use rstest::*;
use std::time::Duration;

#[logfn]
#[rstest]
fn test_resolve(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        let endpoint = mock.register("node", 3, &["list", "echo"]).await;

        let factory = ServiceFactory::new(mock.config());
        let info = factory.locator().resolve("node").await.expect("resolve");
        assert_eq!(info.endpoints, vec![endpoint]);
        assert_eq!(info.version, 3);
        assert_eq!(info.api.find("echo").map(|m| m.id), Some(1));
        assert_eq!(info.api.len(), 2);
        assert!(factory.locator().is_connected());
    });
}

#[logfn]
#[rstest]
#[case(true)]
#[case(false)]
fn test_resolve_cache(runner: TestRunner, #[case] cached: bool) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        mock.register("node", 1, &["list"]).await;

        let mut config = mock.config();
        if cached {
            config.resolve_cache_ttl = Some(Duration::from_secs(60));
        }
        let factory = ServiceFactory::new(config);
        factory.locator().resolve("node").await.expect("resolve");
        factory.locator().resolve("node").await.expect("resolve");
        assert_eq!(mock.frames(LOCATOR), if cached { 1 } else { 2 });
        assert_eq!(factory.cache().map(|c| c.len()), if cached { Some(1) } else { None });

        factory.locator().invalidate("node");
        factory.locator().resolve("node").await.expect("resolve");
        assert_eq!(mock.frames(LOCATOR), if cached { 2 } else { 3 });
    });
}

#[logfn]
#[rstest]
fn test_locator_reconnect(runner: TestRunner) {
    runner.block_on(async move {
        let mock = RuntimeMock::start().await;
        let factory = ServiceFactory::new(mock.config());
        let locator = factory.locator().clone();

        assert_eq!(locator.cluster().await.expect("cluster"), Value::Map(Vec::new()));
        locator.refresh(&["group"]).await.expect("refresh");

        mock.drop_connections(LOCATOR);
        assert!(wait_until(|| !locator.is_connected()).await);
        assert_eq!(locator.cluster().await.expect("cluster"), Value::Map(Vec::new()));
        assert_eq!(mock.connections(LOCATOR), 2);
        factory.shutdown();
        assert!(!locator.is_connected());
    });
}
