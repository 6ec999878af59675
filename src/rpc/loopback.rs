//! In-process transport
//!
//! Hands request envelopes straight to the target host's dispatch pool. Bulk
//! regions are shared, so no payload is copied on the way.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;

use crate::data::HostId;
use crate::rpc::{RpcError, RpcReply, RpcRequest, Transport};
use crate::server::HostDaemon;

pub struct LoopbackTransport {
    hosts: Vec<Arc<HostDaemon>>,

    /// Hosts that currently fail every call at the transport level
    unreachable: RwLock<BTreeSet<HostId>>,
}

impl LoopbackTransport {
    /// `hosts[i]` must be the daemon with host id `i`
    pub fn new(hosts: Vec<Arc<HostDaemon>>) -> Self {
        Self {
            hosts,
            unreachable: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn host(&self, host_id: HostId) -> Option<&Arc<HostDaemon>> {
        self.hosts.get(host_id as usize)
    }

    /// Fail every call to `host_id` until [`reconnect`](Self::reconnect)
    pub fn disconnect(&self, host_id: HostId) {
        tracing::warn!("Loopback: host {} disconnected", host_id);
        self.unreachable.write().insert(host_id);
    }

    pub fn reconnect(&self, host_id: HostId) {
        self.unreachable.write().remove(&host_id);
    }
}

impl Transport for LoopbackTransport {
    fn call(&self, target: HostId, request: RpcRequest) -> BoxFuture<'static, Result<RpcReply, RpcError>> {
        let Some(host) = self.host(target) else {
            return future::ready(Err(RpcError::UnknownHost(target))).boxed();
        };
        if self.unreachable.read().contains(&target) {
            return future::ready(Err(RpcError::TransportError(format!(
                "host {} unreachable",
                target
            ))))
            .boxed();
        }

        tracing::trace!("Loopback: rpc {} for {} -> host {}", request.rpc_id, request.path, target);

        host.handle(request)
            .map(|result| {
                result
                    .map_err(|e| RpcError::TransportError(e.to_string()))
                    .and_then(|reply| reply)
            })
            .boxed()
    }

    fn hosts_size(&self) -> u32 {
        self.hosts.len() as u32
    }
}
