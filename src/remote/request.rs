//! Request and response envelopes for the remote cache service

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::cache::{CacheElement, ElementPayload};

/// Operation carried by a request envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Get,
    GetMultiple,
    GetMatching,
    Remove,
    RemoveAll,
    Update,
    AliveCheck,
    Dispose,
    GetGroupKeys,
    /// Any tag this node does not understand
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            RequestType::Get => "GET",
            RequestType::GetMultiple => "GET_MULTIPLE",
            RequestType::GetMatching => "GET_MATCHING",
            RequestType::Remove => "REMOVE",
            RequestType::RemoveAll => "REMOVE_ALL",
            RequestType::Update => "UPDATE",
            RequestType::AliveCheck => "ALIVE_CHECK",
            RequestType::Dispose => "DISPOSE",
            RequestType::GetGroupKeys => "GET_GROUP_KEYS",
            RequestType::Unknown => "UNKNOWN",
        };
        write!(f, "{tag}")
    }
}

/// Operation envelope.
///
/// Which of `key`, `key_set`, `pattern` and `element` are set depends on
/// `request_type`. For GET_GROUP_KEYS `key` names the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCacheRequest {
    pub request_type: RequestType,
    pub cache_name: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_set: BTreeSet<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub element: Option<ElementPayload>,
    /// Listener id of the node the change came from; 0 when unknown
    #[serde(default)]
    pub requester_id: u64,
}

impl RemoteCacheRequest {
    /// Envelope with only the tag and cache name set
    pub fn new(request_type: RequestType, cache_name: impl Into<String>) -> Self {
        Self {
            request_type,
            cache_name: cache_name.into(),
            key: None,
            key_set: BTreeSet::new(),
            pattern: None,
            element: None,
            requester_id: 0,
        }
    }

    pub fn get(cache_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(RequestType::Get, cache_name).with_key(key)
    }

    pub fn get_multiple<I, S>(cache_name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_set: keys.into_iter().map(Into::into).collect(),
            ..Self::new(RequestType::GetMultiple, cache_name)
        }
    }

    pub fn get_matching(cache_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::new(RequestType::GetMatching, cache_name)
        }
    }

    pub fn remove(cache_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(RequestType::Remove, cache_name).with_key(key)
    }

    pub fn remove_all(cache_name: impl Into<String>) -> Self {
        Self::new(RequestType::RemoveAll, cache_name)
    }

    pub fn update(element: impl Into<ElementPayload>) -> Self {
        let element = element.into();
        Self {
            element: Some(element.clone()),
            ..Self::new(RequestType::Update, element.cache_name())
        }
    }

    pub fn get_group_keys(cache_name: impl Into<String>, group: impl Into<String>) -> Self {
        Self::new(RequestType::GetGroupKeys, cache_name).with_key(group)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_requester(mut self, requester_id: u64) -> Self {
        self.requester_id = requester_id;
        self
    }
}

/// Response envelope; exactly one per request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCacheResponse {
    #[serde(default)]
    pub payload: BTreeMap<String, CacheElement>,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub group_keys: BTreeSet<String>,
}

impl RemoteCacheResponse {
    /// Successful, empty response
    pub fn ok() -> Self {
        Self {
            payload: BTreeMap::new(),
            success: true,
            error_message: None,
            group_keys: BTreeSet::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::ok()
        }
    }
}

impl Default for RemoteCacheResponse {
    fn default() -> Self {
        Self::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_wire_tags() {
        let json = serde_json::to_string(&RequestType::GetGroupKeys).unwrap();
        assert_eq!(json, "\"GET_GROUP_KEYS\"");

        let parsed: RequestType = serde_json::from_str("\"ALIVE_CHECK\"").unwrap();
        assert_eq!(parsed, RequestType::AliveCheck);
    }

    #[test]
    fn test_unknown_tag_parses_as_unknown() {
        let parsed: RequestType = serde_json::from_str("\"FLUSH\"").unwrap();
        assert_eq!(parsed, RequestType::Unknown);
    }

    #[test]
    fn test_sparse_request_envelope() {
        let json = r#"{"request_type":"REMOVE","cache_name":"users","key":"A"}"#;
        let request: RemoteCacheRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request, RemoteCacheRequest::remove("users", "A"));
        assert_eq!(request.requester_id, 0);
    }

    #[test]
    fn test_update_takes_cache_name_from_element() {
        let request = RemoteCacheRequest::update(CacheElement::new("users", "A", "v"));
        assert_eq!(request.request_type, RequestType::Update);
        assert_eq!(request.cache_name, "users");
    }

    #[test]
    fn test_failure_response() {
        let response = RemoteCacheResponse::failure("boom");
        assert!(!response.success);
        assert_eq!(response.error_message.as_deref(), Some("boom"));
        assert!(RemoteCacheResponse::default().success);
    }
}
