use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// First eight hex digits, used in log lines.
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }

            /// Last eight hex digits. For v7 ids these come from the random
            /// bits, so ids minted in the same millisecond still differ.
            pub fn tail(&self) -> String {
                self.0.simple().to_string()[24..].to_string()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(OrderId);
uuid_id!(UserId);
uuid_id!(VariantId);
uuid_id!(PurchaseRequestId);
uuid_id!(PaymentId);

/// Human-facing job code, `{prefix}/{YYYYMMDD}-{seq:03}`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct JobCode(String);

impl JobCode {
    pub fn compose(prefix: &str, day: chrono::NaiveDate, seq: u32) -> Self {
        Self(format!("{}/{}-{:03}", prefix, day.format("%Y%m%d"), seq))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
