//! PayloadCodec - conversion between typed tasks and positional JSON args.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::CourierError;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode task args: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode task args: {0}")]
    Decode(#[source] serde_json::Error),
}

impl From<CodecError> for CourierError {
    fn from(e: CodecError) -> Self {
        CourierError::Serialization(e.to_string())
    }
}

/// Encodes a task to envelope args and back.
///
/// A value that serializes to an array becomes the args list as-is; anything
/// else becomes a single argument. Decoding mirrors that: the whole list is
/// tried first, then a lone argument on its own.
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Serialize>(task: &T) -> Result<Vec<Value>, CodecError> {
        match serde_json::to_value(task).map_err(CodecError::Encode)? {
            Value::Array(args) => Ok(args),
            single => Ok(vec![single]),
        }
    }

    pub fn decode<T: DeserializeOwned>(args: Vec<Value>) -> Result<T, CodecError> {
        if args.len() == 1 {
            let list = Value::Array(args);
            return match serde_json::from_value::<T>(list.clone()) {
                Ok(task) => Ok(task),
                Err(first) => match list {
                    Value::Array(mut args) => {
                        serde_json::from_value(args.remove(0)).map_err(|_| CodecError::Decode(first))
                    }
                    _ => Err(CodecError::Decode(first)),
                },
            };
        }
        serde_json::from_value(Value::Array(args)).map_err(CodecError::Decode)
    }
}
