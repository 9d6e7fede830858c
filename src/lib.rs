// src/lib.rs

pub mod cluster;
pub mod config;
pub mod executor;
pub mod fingerprint;
pub mod http;
pub mod logging;
pub mod orchestrator;
pub mod paginator;
pub mod permissions;
pub mod score;
pub mod services;
pub mod session;

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use config::Settings;
use fingerprint::FingerprintService;
use orchestrator::ScanOrchestrator;
use permissions::PermissionCache;
use services::{GroupService, MembershipService, ModerationService, PermissionService, ThumbnailService};

/// Wiązka usług hosta — jedna implementacja HTTP w produkcji,
/// mocki per-trait w testach.
#[derive(Clone)]
pub struct Services {
    pub group: Arc<dyn GroupService>,
    pub membership: Arc<dyn MembershipService>,
    pub moderation: Arc<dyn ModerationService>,
    pub thumbnails: Arc<dyn ThumbnailService>,
    pub permissions: Arc<dyn PermissionService>,
}

/// Globalny kontekst aplikacji.
/// Trzymamy konfigurację, usługi hosta i gotowy orkiestrator skanów.
pub struct AppContext {
    pub settings: Settings,
    pub services: Services,
    orchestrator: OnceCell<Arc<ScanOrchestrator>>,
    permissions: OnceCell<Arc<PermissionCache>>,
}

impl AppContext {
    /// Bootstrap całej aplikacji:
    /// - logi
    /// - klient HTTP hosta
    /// - orkiestrator i cache uprawnień w OnceCell
    pub fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) klient hosta
        let client = Arc::new(http::HostClient::new(&settings)?);
        let services = Services {
            group: client.clone(),
            membership: client.clone(),
            moderation: client.clone(),
            thumbnails: client.clone(),
            permissions: client,
        };

        Self::assemble(settings, services)
    }

    /// Wariant do testów: te same druty, podstawione usługi, zero logów.
    pub fn with_services(settings: Settings, services: Services) -> Result<Arc<Self>> {
        Self::assemble(settings, services)
    }

    fn assemble(settings: Settings, services: Services) -> Result<Arc<Self>> {
        let ctx = Arc::new(Self {
            settings,
            services,
            orchestrator: OnceCell::new(),
            permissions: OnceCell::new(),
        });

        let orch = Arc::new(ScanOrchestrator::new(
            ctx.services.group.clone(),
            ctx.services.membership.clone(),
            Arc::new(FingerprintService::new(ctx.services.thumbnails.clone())?),
            ctx.settings.scan.clone(),
        ));
        let _ = ctx.orchestrator.set(orch); // set() można wołać tylko raz

        let perms = Arc::new(PermissionCache::new(ctx.services.permissions.clone()));
        let _ = ctx.permissions.set(perms);

        Ok(ctx)
    }

    /// Wygodny getter: orkiestrator skanów (Arc).
    pub fn orchestrator(&self) -> Arc<ScanOrchestrator> {
        self.orchestrator
            .get()
            .expect("ScanOrchestrator not initialized")
            .clone()
    }

    /// Wygodny getter: uprawnienia z cache TTL (Arc).
    pub fn permissions(&self) -> Arc<PermissionCache> {
        self.permissions
            .get()
            .expect("PermissionCache not initialized")
            .clone()
    }

    /// Środowisko: "production" | "development".
    /// Czytamy z ENV `BGD_ENV`; brak → "development".
    #[inline]
    pub fn env(&self) -> String {
        std::env::var("BGD_ENV").unwrap_or_else(|_| "development".to_string())
    }
}
