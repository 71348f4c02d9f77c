//! Extended search: asynchronous issue, retrieval by message id, and the blocking variant.

use crate::connection::{Connection, ConnectionState, LDAP_VERSION3};
use crate::control::Control;
use crate::entry::{decode_entry, SearchResult};
use crate::error::*;
use crate::ldap_protocol::{self as proto, encode_filter, LdapMessage, ProtocolOp, SearchScope};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters of one search. Built per call and borrowed by the search operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    base: String,
    scope: SearchScope,
    filter: String,
    attributes: Vec<String>,
    server_control: Option<Control>,
    client_control: Option<Control>,
    size_limit: Option<i32>,
    time_limit: Option<i32>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            server_control: None,
            client_control: None,
            size_limit: None,
            time_limit: None,
        }
    }

    /// Attributes to return; empty means all user attributes.
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_server_control(mut self, control: Control) -> Self {
        self.server_control = Some(control);
        self
    }

    pub fn with_client_control(mut self, control: Control) -> Self {
        self.client_control = Some(control);
        self
    }

    /// Overrides the session size limit; 0 means no limit.
    pub fn with_size_limit(mut self, limit: i32) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Overrides the session time limit in seconds; 0 means no limit.
    pub fn with_time_limit(mut self, seconds: i32) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn scope(&self) -> SearchScope {
        self.scope
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn server_control(&self) -> Option<&Control> {
        self.server_control.as_ref()
    }

    pub fn client_control(&self) -> Option<&Control> {
        self.client_control.as_ref()
    }
}

/// Outstanding search: the result under construction plus responses not yet consumed.
#[derive(Debug)]
pub(crate) struct PendingSearch {
    result: SearchResult,
    pub(crate) queued: VecDeque<LdapMessage>,
}

impl Connection {
    /// Issue a search and return its message id without waiting for results.
    pub async fn search_ext(&mut self, request: &SearchRequest) -> Result<i32> {
        self.ensure_open()?;
        if self.state() != ConnectionState::Bound {
            return Err(LdapError::connection(
                LDAP_LOCAL_ERROR,
                format!("search requires a bound session (state {:?})", self.state()),
            ));
        }
        if request.base.is_empty() {
            return Err(LdapError::search(LDAP_PARAM_ERROR, "empty search base"));
        }
        if request.filter.is_empty() {
            return Err(LdapError::search(LDAP_FILTER_ERROR, "empty search filter"));
        }
        let filter = encode_filter(&request.filter)
            .map_err(|e| LdapError::search(LDAP_FILTER_ERROR, format!("{:#}", e)))?;
        if let Some(ctrl) = &request.client_control {
            if ctrl.is_critical() {
                return Err(LdapError::search(
                    LDAP_NOT_SUPPORTED,
                    format!("critical client control {} is not supported", ctrl.oid()),
                ));
            }
            debug!("Ignoring non-critical client control {}", ctrl.oid());
        }
        if let Some(ctrl) = &request.server_control {
            if self.protocol_version() < LDAP_VERSION3 {
                return Err(LdapError::search(
                    LDAP_NOT_SUPPORTED,
                    format!("server control {} requires LDAPv3", ctrl.oid()),
                ));
            }
        }
        let size_limit = request.size_limit.unwrap_or(self.session.size_limit);
        let time_limit = request.time_limit.unwrap_or(self.session.time_limit);
        if size_limit < 0 || time_limit < 0 {
            return Err(LdapError::search(LDAP_PARAM_ERROR, "negative size or time limit"));
        }

        let message_id = self.next_id();
        let message = LdapMessage {
            message_id,
            protocol_op: ProtocolOp::SearchRequest(proto::SearchRequest {
                base_object: request.base.clone(),
                scope: request.scope,
                deref_aliases: self.session.deref,
                size_limit,
                time_limit,
                types_only: false,
                filter,
                attributes: request.attributes.clone(),
            }),
            controls: request.server_control.clone().map(|c| vec![c]),
        };
        self.send(&message).await.map_err(LdapError::into_search)?;
        self.pending.insert(
            message_id,
            PendingSearch {
                result: SearchResult::new(
                    request.filter.clone(),
                    request.base.clone(),
                    request.scope,
                    request.attributes.clone(),
                ),
                queued: VecDeque::new(),
            },
        );
        debug!(
            "Search {} issued: base={:?} scope={:?} filter={}",
            message_id, request.base, request.scope, request.filter
        );
        Ok(message_id)
    }

    /// Issue a search and wait for the complete result set.
    pub async fn search_ext_sync(&mut self, request: &SearchRequest) -> Result<SearchResult> {
        let message_id = self.search_ext(request).await?;
        self.search_result(message_id, None).await
    }

    /// As `search_ext_sync`; when `timeout` elapses the search is abandoned and LDAP_TIMEOUT returned.
    pub async fn search_ext_sync_timeout(
        &mut self,
        request: &SearchRequest,
        timeout: Duration,
    ) -> Result<SearchResult> {
        let message_id = self.search_ext(request).await?;
        self.search_result(message_id, Some(timeout)).await
    }

    /// Wait for the outcome of a search issued with `search_ext`.
    ///
    /// Entries are aggregated in server order. A nonzero final result code
    /// discards them and returns the error alone.
    pub async fn search_result(&mut self, message_id: i32, timeout: Option<Duration>) -> Result<SearchResult> {
        self.ensure_open()?;
        if !self.pending.contains_key(&message_id) {
            return Err(LdapError::search(
                LDAP_PARAM_ERROR,
                format!("no outstanding search with message id {}", message_id),
            ));
        }
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.collect(message_id)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Search {} timed out after {:?}, abandoning", message_id, limit);
                    self.abandon_quietly(message_id).await;
                    return Err(LdapError::search(
                        LDAP_TIMEOUT,
                        format!("no result within {:?}", limit),
                    ));
                }
            },
            None => self.collect(message_id).await,
        };
        match outcome {
            Ok(result) => {
                info!("Search {} returned {} entries", message_id, result.count());
                Ok(result)
            }
            Err(e @ LdapError::Decode { .. }) => {
                self.abandon_quietly(message_id).await;
                Err(e)
            }
            Err(e) => {
                self.pending.remove(&message_id);
                Err(e.into_search())
            }
        }
    }

    /// Cancel an outstanding search. Its results can no longer be retrieved.
    pub async fn abandon(&mut self, message_id: i32) -> Result<()> {
        self.ensure_open()?;
        if self.pending.remove(&message_id).is_none() {
            return Err(LdapError::search(
                LDAP_PARAM_ERROR,
                format!("no outstanding search with message id {}", message_id),
            ));
        }
        self.send_abandon(message_id).await.map_err(LdapError::into_search)
    }

    async fn send_abandon(&mut self, message_id: i32) -> Result<()> {
        let id = self.next_id();
        let message = LdapMessage {
            message_id: id,
            protocol_op: ProtocolOp::AbandonRequest(message_id),
            controls: None,
        };
        self.send(&message).await?;
        debug!("Abandoned search {}", message_id);
        Ok(())
    }

    async fn abandon_quietly(&mut self, message_id: i32) {
        if self.pending.remove(&message_id).is_some() && self.ensure_open().is_ok() {
            if let Err(e) = self.send_abandon(message_id).await {
                debug!("Abandon of search {} failed: {}", message_id, e);
            }
        }
    }

    /// Next response for `message_id`: queued first, then from the wire.
    async fn next_for(&mut self, message_id: i32) -> Result<LdapMessage> {
        if let Some(message) = self
            .pending
            .get_mut(&message_id)
            .and_then(|p| p.queued.pop_front())
        {
            return Ok(message);
        }
        loop {
            let message = self.recv().await?;
            if message.message_id == message_id {
                return Ok(message);
            }
            self.route(message);
        }
    }

    async fn collect(&mut self, message_id: i32) -> Result<SearchResult> {
        loop {
            let message = self.next_for(message_id).await?;
            let pending = self
                .pending
                .get_mut(&message_id)
                .ok_or_else(|| LdapError::search(LDAP_PARAM_ERROR, format!("search {} is gone", message_id)))?;
            match message.protocol_op {
                ProtocolOp::SearchResultEntry(raw) => {
                    let entry = decode_entry(raw)?;
                    pending.result.append(entry);
                }
                ProtocolOp::SearchResultReference(uris) => {
                    debug!("Search {} returned {} references", message_id, uris.len());
                    pending.result.push_referrals(uris);
                }
                ProtocolOp::IntermediateResponse(resp) => {
                    debug!("Search {} intermediate response {:?}", message_id, resp.response_name);
                }
                ProtocolOp::SearchResultDone(done) => {
                    let Some(mut finished) = self.pending.remove(&message_id) else {
                        continue;
                    };
                    if done.result_code != LDAP_SUCCESS {
                        debug!(
                            "Search {} failed with code {} after {} entries",
                            message_id,
                            done.result_code,
                            finished.result.count()
                        );
                        return Err(LdapError::search(done.result_code, done.diagnostic_message));
                    }
                    finished.result.set_controls(message.controls.unwrap_or_default());
                    return Ok(finished.result);
                }
                other => {
                    return Err(LdapError::decode(format!(
                        "unexpected response to search {}: {:?}",
                        message_id, other
                    )));
                }
            }
        }
    }
}
