// src/core/handlers/registry.rs

//! Maps protocol tags to handler factories and their declared operation sets.
//!
//! Adding a protocol means registering one descriptor; the router never
//! branches on protocol types itself.

use super::{HandlerContext, ProtocolHandler};
use super::{ftp, grpc, k8s, localfs, opcua, rest, sftp, snmp, soap, sql, ssh, websocket};
use crate::core::model::ProtocolType;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a fresh handler for one connect attempt.
pub type HandlerFactory = Arc<dyn Fn(HandlerContext) -> Box<dyn ProtocolHandler> + Send + Sync>;

/// A registered protocol: its static operation set and its factory.
#[derive(Clone)]
pub struct ProtocolDescriptor {
    pub protocol: ProtocolType,
    pub operations: &'static [&'static str],
    pub factory: HandlerFactory,
}

impl ProtocolDescriptor {
    pub fn supports(&self, operation: &str) -> bool {
        self.operations.contains(&operation)
    }
}

impl std::fmt::Debug for ProtocolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolDescriptor")
            .field("protocol", &self.protocol)
            .field("operations", &self.operations)
            .finish()
    }
}

/// The protocol tag to factory table.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    descriptors: HashMap<ProtocolType, ProtocolDescriptor>,
}

impl HandlerRegistry {
    /// An empty registry. Tests use it to install fakes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every built-in protocol.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ProtocolType::OpcUa, opcua::OPERATIONS, |ctx| {
            Box::new(opcua::OpcUaHandler::new(ctx))
        });
        registry.register(ProtocolType::Ssh, ssh::OPERATIONS, |ctx| {
            Box::new(ssh::SshHandler::new(ctx))
        });
        registry.register(ProtocolType::Sftp, sftp::OPERATIONS, |ctx| {
            Box::new(sftp::SftpHandler::new(ctx))
        });
        registry.register(ProtocolType::Ftp, ftp::OPERATIONS, |ctx| {
            Box::new(ftp::FtpHandler::new(ctx))
        });
        registry.register(ProtocolType::LocalFs, localfs::OPERATIONS, |ctx| {
            Box::new(localfs::LocalFsHandler::new(ctx))
        });
        registry.register(ProtocolType::Sql, sql::OPERATIONS, |ctx| {
            Box::new(sql::SqlHandler::new(ctx))
        });
        registry.register(ProtocolType::WebSocket, websocket::OPERATIONS, |ctx| {
            Box::new(websocket::WebSocketHandler::new(ctx))
        });
        registry.register(ProtocolType::Rest, rest::OPERATIONS, |ctx| {
            Box::new(rest::RestHandler::new(ctx))
        });
        registry.register(ProtocolType::Soap, soap::OPERATIONS, |ctx| {
            Box::new(soap::SoapHandler::new(ctx))
        });
        registry.register(ProtocolType::Grpc, grpc::OPERATIONS, |ctx| {
            Box::new(grpc::GrpcHandler::new(ctx))
        });
        registry.register(ProtocolType::Kubernetes, k8s::OPERATIONS, |ctx| {
            Box::new(k8s::KubernetesHandler::new(ctx))
        });
        registry.register(ProtocolType::Snmp, snmp::GENERIC_OPERATIONS, |ctx| {
            Box::new(snmp::SnmpHandler::new(ctx, snmp::DeviceProfile::Generic))
        });
        registry.register(ProtocolType::NtcipEss, snmp::ESS_OPERATIONS, |ctx| {
            Box::new(snmp::SnmpHandler::new(ctx, snmp::DeviceProfile::Ess))
        });
        registry.register(ProtocolType::NtcipVms, snmp::VMS_OPERATIONS, |ctx| {
            Box::new(snmp::SnmpHandler::new(ctx, snmp::DeviceProfile::Vms))
        });
        registry
    }

    /// Registers (or replaces) the factory for a protocol.
    pub fn register<F>(
        &mut self,
        protocol: ProtocolType,
        operations: &'static [&'static str],
        factory: F,
    ) where
        F: Fn(HandlerContext) -> Box<dyn ProtocolHandler> + Send + Sync + 'static,
    {
        self.descriptors.insert(
            protocol,
            ProtocolDescriptor {
                protocol,
                operations,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn get(&self, protocol: ProtocolType) -> Option<&ProtocolDescriptor> {
        self.descriptors.get(&protocol)
    }

    /// The registered protocols with their operation names.
    pub fn catalog(&self) -> Vec<(ProtocolType, &'static [&'static str])> {
        let mut rows: Vec<_> = self
            .descriptors
            .values()
            .map(|d| (d.protocol, d.operations))
            .collect();
        rows.sort_by_key(|(protocol, _)| protocol.to_string());
        rows
    }
}
