//! Wires a naming [`Service`] to its `Service` and `Registration`
//! skeletons.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::RpcError;
use crate::rpc::Skeleton;

use super::registration::RegistrationEndpoint;
use super::service::{Service, ServiceEndpoint};

pub struct NamingServer {
    service: Arc<Service>,
    service_skeleton: Skeleton<ServiceEndpoint>,
    registration_skeleton: Skeleton<RegistrationEndpoint>,
}

impl Default for NamingServer {
    fn default() -> Self {
        let service = Arc::new(Service::new());
        NamingServer {
            service: service.clone(),
            service_skeleton: Skeleton::new(ServiceEndpoint(service.clone())),
            registration_skeleton: Skeleton::new(RegistrationEndpoint(service)),
        }
    }
}

impl NamingServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Binds both skeletons. Returns `(service_addr, registration_addr)`.
    pub async fn start(
        &self,
        service_addr: SocketAddr,
        registration_addr: SocketAddr,
    ) -> Result<(SocketAddr, SocketAddr), RpcError> {
        let service_addr = self.service_skeleton.start(service_addr).await?;
        let registration_addr = self.registration_skeleton.start(registration_addr).await?;
        tracing::info!(%service_addr, %registration_addr, "naming server listening");
        Ok((service_addr, registration_addr))
    }

    pub async fn stop(&self) {
        self.service_skeleton.stop().await;
        self.registration_skeleton.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::registration::RegistrationStub;
    use crate::naming::service::ServiceStub;
    use crate::path::Path;
    use crate::storage::command::CommandStub;
    use crate::storage::service::StorageStub;

    #[tokio::test]
    async fn create_directory_then_is_directory_round_trips_over_rpc() {
        let server = NamingServer::new();
        let (service_addr, _) =
            server.start("127.0.0.1:0".parse().unwrap(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let service = ServiceStub::new(service_addr);

        assert!(service.create_directory(&Path::parse("/a")).await.unwrap());
        assert!(service.is_directory(&Path::parse("/a")).await.unwrap());

        server.stop().await;
    }

    #[tokio::test]
    async fn register_over_rpc_then_get_storage() {
        let server = NamingServer::new();
        let (service_addr, registration_addr) =
            server.start("127.0.0.1:0".parse().unwrap(), "127.0.0.1:0".parse().unwrap()).await.unwrap();

        let client: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        let command: SocketAddr = "127.0.0.1:9101".parse().unwrap();
        let duplicates = RegistrationStub::new(registration_addr)
            .register(&StorageStub::new(client), &CommandStub::new(command), vec![Path::parse("/a")])
            .await
            .unwrap();
        assert!(duplicates.is_empty());

        let storage = ServiceStub::new(service_addr).get_storage(&Path::parse("/a")).await.unwrap();
        assert_eq!(storage.addr(), client);

        server.stop().await;
    }
}
