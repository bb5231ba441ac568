//! Message envelope returned by the background service to the content side.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// `{ success: true, data }` or `{ success: false, error }`.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundResponse<T> {
    Success(T),
    Failure(String),
}

impl<T> BackgroundResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::Success(data)
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self::Failure(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Failure(error) => Err(error),
        }
    }
}

impl<T: Serialize> Serialize for BackgroundResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("BackgroundResponse", 2)?;
        match self {
            Self::Success(data) => {
                s.serialize_field("success", &true)?;
                s.serialize_field("data", data)?;
            }
            Self::Failure(error) => {
                s.serialize_field("success", &false)?;
                s.serialize_field("error", error)?;
            }
        }
        s.end()
    }
}

#[derive(Deserialize)]
struct RawResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for BackgroundResponse<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawResponse::<T>::deserialize(deserializer)?;
        match (raw.success, raw.data, raw.error) {
            (true, Some(data), _) => Ok(Self::Success(data)),
            (true, None, _) => Err(de::Error::missing_field("data")),
            (false, _, Some(error)) => Ok(Self::Failure(error)),
            (false, _, None) => Err(de::Error::missing_field("error")),
        }
    }
}
