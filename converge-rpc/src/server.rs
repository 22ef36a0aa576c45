//! gRPC server with TCP listener

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use converge_proto::ledger::ledger_service_server::LedgerServiceServer;
use converge_store::LedgerStore;
use tonic::transport::Server;

use crate::service::LedgerServiceImpl;

/// RPC server for the ledger daemon
pub struct RpcServer {
    store: Arc<LedgerStore>,
    addr: SocketAddr,
}

impl RpcServer {
    pub fn new(store: Arc<LedgerStore>, addr: SocketAddr) -> Self {
        Self { store, addr }
    }

    /// Run the RPC server until the process is killed.
    pub async fn run(self) -> Result<(), tonic::transport::Error> {
        let (addr, router) = self.into_router();
        tracing::info!("RPC server listening on {}", addr);
        router.serve(addr).await
    }

    /// Run the RPC server until `shutdown` resolves, then drain.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), tonic::transport::Error> {
        let (addr, router) = self.into_router();
        tracing::info!("RPC server listening on {}", addr);
        router.serve_with_shutdown(addr, shutdown).await
    }

    fn into_router(self) -> (SocketAddr, tonic::transport::server::Router) {
        let service = LedgerServiceImpl::new(self.store);
        let router = Server::builder().add_service(LedgerServiceServer::new(service));
        (self.addr, router)
    }
}
