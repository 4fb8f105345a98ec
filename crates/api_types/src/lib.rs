use serde::{Deserialize, Serialize};

/// Collection segment of a `/users/{uid}/{kind}` path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Sales,
    Expenses,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Expenses => "expenses",
        }
    }
}

pub mod auth {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TokenSignIn {
        pub token: String,
    }

    /// Identity issued by the server.
    ///
    /// `token` is the bearer credential for every `/users/{uid}` route and can
    /// be exchanged for the same `uid` later through `/auth/token`.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Session {
        pub uid: String,
        pub token: String,
    }
}

pub mod document {
    use serde_json::{Map, Value};

    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct Document {
        pub id: String,
        pub data: Map<String, Value>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct DocumentNew {
        pub data: Map<String, Value>,
    }

    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DocumentCreated {
        pub id: String,
    }

    /// Payload of a `snapshot` server-sent event: the complete collection.
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    pub struct SnapshotEvent {
        pub documents: Vec<Document>,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
