use crate::peer::connection::PeerSession;
use crate::peer::types::{IceCandidate, IceServer, RemoteIceServer, ServerConfig};
use crate::utils::{add_ice_url_scheme, candidate_address, ice_url_host, is_turn_url, is_unspecified_host};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A candidate is usable when it names a concrete connection address.
pub fn is_valid_candidate(candidate: &IceCandidate) -> bool {
    match candidate_address(&candidate.candidate) {
        Some(addr) => !is_unspecified_host(addr),
        None => false,
    }
}

/// Remote candidates received before the remote description was applied.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: VecDeque<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        debug!(candidate = %candidate.candidate, "remote description not set yet, deferring candidate");
        self.queue.push_back(candidate);
    }

    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Applies candidates to a peer whose remote description is set, skipping
/// invalid ones. Individual failures are logged and do not abort the batch.
pub async fn apply_candidates(peer: &dyn PeerSession, candidates: Vec<IceCandidate>) -> usize {
    let mut applied = 0;
    for candidate in candidates {
        if !is_valid_candidate(&candidate) {
            debug!(candidate = %candidate.candidate, "skipping remote candidate with unspecified address");
            continue;
        }
        match peer.add_remote_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => warn!(error = %e, "failed to apply remote candidate"),
        }
    }
    applied
}

/// Configured servers first, then valid server-supplied ones not already present.
pub fn merge_ice_servers(configured: &[ServerConfig], remote: &[RemoteIceServer]) -> Vec<IceServer> {
    let mut servers: Vec<IceServer> = configured
        .iter()
        .map(|config| IceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect();

    for entry in remote {
        let Some(server) = accept_remote_server(entry) else {
            continue;
        };
        let duplicate = servers.iter().any(|s| s.urls == server.urls);
        if !duplicate {
            servers.push(server);
        }
    }
    servers
}

fn accept_remote_server(entry: &RemoteIceServer) -> Option<IceServer> {
    let urls = entry.urls.to_vec();
    if urls.is_empty() {
        return None;
    }
    if urls
        .iter()
        .any(|u| ice_url_host(u).map(is_unspecified_host).unwrap_or(true))
    {
        warn!(?urls, "discarding ICE server with unspecified address");
        return None;
    }
    let username = entry.username.clone().unwrap_or_default();
    let credential = entry.credential.clone().unwrap_or_default();
    if urls.iter().any(|u| is_turn_url(u)) && (username.is_empty() || credential.is_empty()) {
        warn!(?urls, "discarding TURN server without credentials");
        return None;
    }
    Some(IceServer {
        urls,
        username,
        credential,
    })
}
