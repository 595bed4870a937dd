use std::{fmt, path::Path};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{de, Deserialize, Deserializer, Serialize};

// The following define where to find the server and how long to wait on it.
const SERVER: &str = "127.0.0.1"; // Address of the NUT server.
const PORT: u16 = 3493; // Default upsd port.
const CONNECTION_TIMEOUT: u64 = 10; // Seconds to wait while dialing the server.
const OP_TIMEOUT: u64 = 10; // Seconds to wait on each read or write.
const POLL_DELAY: u64 = 10; // Seconds to wait between polls.
const MEASUREMENT: &str = "upsd";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    #[serde(deserialize_with = "any_scalar")]
    pub server: String,
    pub port: u16,
    #[serde(deserialize_with = "any_scalar")]
    pub username: String,
    #[serde(deserialize_with = "any_scalar")]
    pub password: String,
    pub connection_timeout: u64,
    pub op_timeout: u64,
    pub poll_delay: u64,
    #[serde(deserialize_with = "any_scalar")]
    pub measurement: String,
}

// Environment values arrive typed, so `UPSD_PASSWORD=123456` is a number by
// the time it gets here. Take any scalar back as text.
fn any_scalar<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    struct ScalarVisitor;

    impl<'de> de::Visitor<'de> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a string, number or boolean")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: SERVER.to_string(),
            port: PORT,
            username: String::new(),
            password: String::new(),
            connection_timeout: CONNECTION_TIMEOUT,
            op_timeout: OP_TIMEOUT,
            poll_delay: POLL_DELAY,
            measurement: MEASUREMENT.to_string(),
        }
    }
}

impl Settings {
    // Defaults, then the TOML file if it exists, then `UPSD_*` variables.
    pub fn load(path: &Path) -> Result<Settings, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("UPSD_"))
            .extract()
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}
