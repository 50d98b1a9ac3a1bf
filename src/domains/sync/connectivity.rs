use async_trait::async_trait;

/// Connectivity signal, polled once at the start of a run
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Online unless the host has switched the library into offline mode.
pub struct OfflineModeProbe;

#[async_trait]
impl ConnectivityProbe for OfflineModeProbe {
    async fn is_online(&self) -> bool {
        !crate::globals::is_offline_mode()
    }
}

/// A fixed answer, for hosts that track reachability themselves.
pub struct FixedConnectivity(pub bool);

#[async_trait]
impl ConnectivityProbe for FixedConnectivity {
    async fn is_online(&self) -> bool {
        self.0
    }
}
