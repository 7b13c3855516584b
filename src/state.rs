//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It is
//! created once at startup and owns the explicit-lifecycle pieces of the
//! real-time subsystem: the connection registry and the membership manager
//! that owns the room actors and the persistence gateway.

use std::sync::Arc;

use crate::config::RealtimeConfig;
use crate::services::membership::MembershipManager;
use crate::services::registry::ConnectionRegistry;
use crate::store::RoomStore;

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<MembershipManager>,
    pub realtime: RealtimeConfig,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, realtime: RealtimeConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(MembershipManager::new(store, registry.clone(), realtime));
        Self { registry, rooms, realtime }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
