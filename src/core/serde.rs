use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use super::types::DeviceToken;

/// Serializes Duration as seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Ok(Duration::from_secs_f64(secs))
}

/// Serializes a device token as its hex representation
pub fn serialize_token<S>(token: &DeviceToken, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    hex::encode(token.as_bytes()).serialize(serializer)
}

/// Deserializes a device token from a 32-character hex string
pub fn deserialize_token<'de, D>(deserializer: D) -> Result<DeviceToken, D::Error>
where
    D: Deserializer<'de>,
{
    let hex_str = String::deserialize(deserializer)?;
    DeviceToken::from_hex(&hex_str).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Test {
            #[serde(serialize_with = "serialize_duration")]
            #[serde(deserialize_with = "deserialize_duration")]
            timeout: Duration,
        }

        let original = Test {
            timeout: Duration::from_millis(3000),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(serialized, r#"{"timeout":3.0}"#);

        let deserialized: Test = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.timeout, original.timeout);
    }

    #[test]
    fn test_token_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Test {
            #[serde(serialize_with = "serialize_token")]
            #[serde(deserialize_with = "deserialize_token")]
            token: DeviceToken,
        }

        let original = Test {
            token: DeviceToken([0xab; 16]),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(
            serialized,
            r#"{"token":"abababababababababababababababab"}"#
        );

        let deserialized: Test = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.token, original.token);
    }

    #[test]
    fn test_token_deserialization_rejects_garbage() {
        #[derive(Deserialize)]
        struct Test {
            #[serde(deserialize_with = "deserialize_token")]
            #[allow(dead_code)]
            token: DeviceToken,
        }

        assert!(serde_json::from_str::<Test>(r#"{"token":"zz"}"#).is_err());
    }
}
