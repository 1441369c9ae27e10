use crate::StorageOp;
use cocaine::{Channel, CocaineError, ServiceFactory};
use rmpv::Value;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Cocaine(#[from] CocaineError),
    #[error("invalid arguments: {0}")]
    Args(String),
    #[error("cannot format output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("cannot write output: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Tool {
    factory: Arc<ServiceFactory>,
    timeout: Duration,
    json: bool,
}

impl Tool {
    pub fn new(config: cocaine::ClientConfig, json: bool) -> Self {
        let timeout = config.timeout.resolve_timeout;
        Self { factory: ServiceFactory::new(config), timeout, json }
    }

    pub fn shutdown(&self) {
        self.factory.shutdown();
    }

    fn print(&self, v: &Value) -> Result<(), ToolError> {
        self.write_values(std::slice::from_ref(v), &mut std::io::stdout().lock())
    }

    fn write_values<W: Write>(&self, values: &[Value], out: &mut W) -> Result<(), ToolError> {
        for v in values {
            if self.json {
                writeln!(out, "{}", serde_json::to_string(v)?)?;
            } else {
                writeln!(out, "{}", v)?;
            }
        }
        Ok(())
    }

    /// Every value of the session, or the error that ended it
    async fn collect(&self, mut ch: Channel) -> Result<Vec<Value>, CocaineError> {
        let mut values = Vec::new();
        loop {
            match ch.rx.get_timeout(self.timeout).await {
                Ok(v) => values.push(v),
                Err(e) if e.is_choke() => return Ok(values),
                Err(e) => return Err(e),
            }
        }
    }

    /// Output is written only once the session completed cleanly
    async fn drain(&self, ch: Channel) -> Result<(), ToolError> {
        let values = self.collect(ch).await?;
        self.write_values(&values, &mut std::io::stdout().lock())
    }

    pub async fn resolve(&self, name: &str) -> Result<(), ToolError> {
        let info = self.factory.locator().resolve(name).await?;
        if self.json {
            return self.print(&info.to_value());
        }
        for ep in info.endpoints.iter() {
            println!("endpoint {}", ep);
        }
        println!("version {}", info.version);
        for m in info.api.methods() {
            println!("method {} {}", m.id, m.name);
        }
        Ok(())
    }

    pub async fn call(&self, service: &str, method: &str, args: &[String]) -> Result<(), ToolError> {
        let args = args.iter().map(|a| parse_arg(a)).collect::<Result<Vec<_>, _>>()?;
        let service = self.factory.create_service(service, 0);
        let ch = service.call(method, args).await?;
        self.drain(ch).await
    }

    pub async fn storage(&self, op: StorageOp) -> Result<(), ToolError> {
        let storage = self.factory.create_storage();
        let ch = match op {
            StorageOp::Read { collection, key } => storage.read(&collection, &key).await?,
            StorageOp::Write { collection, key, value, tags } => {
                let tags = tags.iter().map(|t| t.as_str()).collect::<Vec<_>>();
                storage.write(&collection, &key, Value::from(value), &tags).await?
            }
            StorageOp::Find { collection, tags } => {
                let tags = tags.iter().map(|t| t.as_str()).collect::<Vec<_>>();
                storage.find(&collection, &tags).await?
            }
            StorageOp::Remove { collection, key } => storage.remove(&collection, &key).await?,
        };
        self.drain(ch).await
    }
}

/// JSON when it parses, otherwise the raw string
fn parse_arg(arg: &str) -> Result<Value, ToolError> {
    let json = match serde_json::from_str::<serde_json::Value>(arg) {
        Ok(json) => json,
        Err(_) => return Ok(Value::from(arg)),
    };
    rmpv::ext::to_value(&json).map_err(|e| ToolError::Args(format!("{}: {}", arg, e)))
}
