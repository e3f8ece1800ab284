//! Request Dispatcher
//!
//! Adapts a [`RemoteCacheService`] to a transport: one envelope in, one
//! envelope out. Nothing escapes as an error; every failure becomes a
//! response with `success = false` and a message.

use std::sync::Arc;

use tracing::{error, warn};

use super::request::{RemoteCacheRequest, RemoteCacheResponse, RequestType};
use super::service::RemoteCacheService;
use crate::error::{Error, Result};

/// Turns request envelopes into service calls
pub struct RequestDispatcher {
    service: Arc<dyn RemoteCacheService>,
}

impl RequestDispatcher {
    pub fn new(service: Arc<dyn RemoteCacheService>) -> Self {
        Self { service }
    }

    /// Process one request; always yields a response
    pub async fn process_request(&self, request: Option<RemoteCacheRequest>) -> RemoteCacheResponse {
        let Some(request) = request else {
            let message = "The request is null. Cannot process";
            warn!("{message}");
            return RemoteCacheResponse::failure(message);
        };

        if request.request_type == RequestType::Unknown {
            let message = format!("Unknown event type. Cannot process request for cache {}", request.cache_name);
            warn!(cache_name = %request.cache_name, "{message}");
            return RemoteCacheResponse::failure(message);
        }

        match self.dispatch(&request).await {
            Ok(response) => response,
            Err(e) => {
                let message = format!(
                    "Problem processing {} request for cache {}. Error: {e}",
                    request.request_type, request.cache_name
                );
                error!(
                    request_type = %request.request_type,
                    cache_name = %request.cache_name,
                    error = %e,
                    "Request failed"
                );
                RemoteCacheResponse::failure(message)
            }
        }
    }

    /// Decode a JSON envelope and process it
    pub async fn process_json(&self, body: &[u8]) -> RemoteCacheResponse {
        match serde_json::from_slice::<RemoteCacheRequest>(body) {
            Ok(request) => self.process_request(Some(request)).await,
            Err(e) => {
                warn!(error = %e, "Undecodable request envelope");
                RemoteCacheResponse::failure(format!("Undecodable request: {e}"))
            }
        }
    }

    async fn dispatch(&self, request: &RemoteCacheRequest) -> Result<RemoteCacheResponse> {
        let service = self.service.as_ref();
        let cache_name = request.cache_name.as_str();
        let requester_id = request.requester_id;
        let mut response = RemoteCacheResponse::ok();

        match request.request_type {
            RequestType::Get => {
                if let Some(element) = service.get(cache_name, required_key(request)?, requester_id).await? {
                    response
                        .payload
                        .insert(element.key().to_string(), (*element).clone());
                }
            }
            RequestType::GetMultiple => {
                let found = service
                    .get_multiple(cache_name, &request.key_set, requester_id)
                    .await?;
                response
                    .payload
                    .extend(found.into_iter().map(|(key, element)| (key, (*element).clone())));
            }
            RequestType::GetMatching => {
                let pattern = request
                    .pattern
                    .as_deref()
                    .ok_or_else(|| Error::InvalidRequest("GET_MATCHING requires a pattern".into()))?;
                let found = service.get_matching(cache_name, pattern, requester_id).await?;
                response
                    .payload
                    .extend(found.into_iter().map(|(key, element)| (key, (*element).clone())));
            }
            RequestType::Remove => {
                service
                    .remove(cache_name, required_key(request)?, requester_id)
                    .await?;
            }
            RequestType::RemoveAll => {
                service.remove_all(cache_name, requester_id).await?;
            }
            RequestType::Update => {
                let element = request
                    .element
                    .clone()
                    .ok_or_else(|| Error::InvalidRequest("UPDATE requires an element".into()))?;
                service.update(element, requester_id).await?;
            }
            RequestType::AliveCheck | RequestType::Dispose => {}
            RequestType::GetGroupKeys => {
                response.group_keys = service
                    .get_group_keys(cache_name, required_key(request)?)
                    .await?;
            }
            RequestType::Unknown => {
                return Err(Error::InvalidRequest("unknown request type".into()));
            }
        }

        Ok(response)
    }
}

fn required_key(request: &RemoteCacheRequest) -> Result<&str> {
    request
        .key
        .as_deref()
        .ok_or_else(|| Error::InvalidRequest(format!("{} requires a key", request.request_type)))
}

// =============================================================================
// Tests
// =============================================================================
