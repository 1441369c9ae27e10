use crate::channel::Channel;
use crate::service::Service;
use crate::transport::ClientTransport;
use cocaine_core::CocaineError;
use rmpv::Value;

#[inline]
fn tag_list(tags: &[&str]) -> Value {
    Value::Array(tags.iter().map(|t| Value::from(*t)).collect())
}

/// The key-value storage service of the cloud, every operation returns its [Channel]
pub struct Storage<P: ClientTransport> {
    service: Service<P>,
}

impl<P: ClientTransport> Storage<P> {
    pub fn new(service: Service<P>) -> Self {
        Self { service }
    }

    #[inline]
    pub fn service(&self) -> &Service<P> {
        &self.service
    }

    /// Keys of `collection` carrying every tag
    pub async fn find(&self, collection: &str, tags: &[&str]) -> Result<Channel, CocaineError> {
        self.service.call("find", vec![Value::from(collection), tag_list(tags)]).await
    }

    pub async fn read(&self, collection: &str, key: &str) -> Result<Channel, CocaineError> {
        self.service.call("read", vec![Value::from(collection), Value::from(key)]).await
    }

    pub async fn write(
        &self, collection: &str, key: &str, value: Value, tags: &[&str],
    ) -> Result<Channel, CocaineError> {
        let args = vec![Value::from(collection), Value::from(key), value, tag_list(tags)];
        self.service.call("write", args).await
    }

    pub async fn remove(&self, collection: &str, key: &str) -> Result<Channel, CocaineError> {
        self.service.call("remove", vec![Value::from(collection), Value::from(key)]).await
    }
}
