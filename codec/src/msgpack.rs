use cocaine_core::CocaineError;
use rmpv::Value;
use serde::{Serialize, de::DeserializeOwned};

/// Conversions between typed arguments and the dynamic payload of a frame
pub struct MsgpCodec();

impl MsgpCodec {
    /// A tuple or sequence becomes the argument list, anything else a single argument
    pub fn encode_args<T: Serialize>(args: &T) -> Result<Vec<Value>, CocaineError> {
        match rmpv::ext::to_value(args) {
            Ok(Value::Array(list)) => return Ok(list),
            Ok(Value::Nil) => return Ok(Vec::new()),
            Ok(v) => return Ok(vec![v]),
            Err(e) => {
                log::error!("encode error: {:?}", e);
                return Err(CocaineError::Frame(e.to_string()));
            }
        }
    }

    #[inline]
    pub fn decode<T: DeserializeOwned>(v: Value) -> Result<T, CocaineError> {
        match rmpv::ext::from_value::<T>(v) {
            Ok(r) => return Ok(r),
            Err(e) => {
                log::warn!("decode error: {:?}", e);
                return Err(CocaineError::Frame(e.to_string()));
            }
        }
    }
}
