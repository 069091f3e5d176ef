use crate::mapping::RequestMapper;
use crate::network::ReqwestNetwork;
use interceptor::{Interceptor, InterceptorConfig, Network};
use nosotros::persistence::{MokaPrefetchLedger, SledPrefetchLedger, SledStorageFactory};
use nosotros::ports::{PrefetchLedger, RemoteDocumentStore, RemoteObjectStore};
use nosotros::remote::{HttpDocumentStore, HttpObjectStore};
use nosotros::{
    AssetLayout, BlobCacheService, CacheItemEvent, CacheRegistry, DailyPickService, MediaCacheSpec,
    MediaLibrary, ReferenceZone, SystemClock,
};
use shared::config::Config;
use shared::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub interceptor: Arc<Interceptor>,
    pub network: Arc<dyn Network>,
    pub mapper: RequestMapper,
    pub photos: Arc<MediaLibrary>,
    pub music: Arc<MediaLibrary>,
    pub daily: Arc<DailyPickService>,
    pub event_channel: broadcast::Sender<CacheItemEvent>,
    storage: Vec<Arc<SledStorageFactory>>,
}

/// Remote collaborators and backends the state is assembled from.
pub struct Backends {
    pub media_registry: CacheRegistry,
    pub interceptor_registry: CacheRegistry,
    pub ledger: Arc<dyn PrefetchLedger>,
    pub network: Arc<dyn Network>,
    pub objects: Arc<dyn RemoteObjectStore>,
    pub documents: Arc<dyn RemoteDocumentStore>,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self> {
        let origin = parse_url("NOSOTROS_ORIGIN", &config.origin)?;
        let upstream = parse_url("NOSOTROS_UPSTREAM", &config.upstream)?;
        let data_dir = Path::new(&config.data_dir);

        // Try to initialize with persistence, fall back to in-memory if it fails
        let mut storage = Vec::new();
        let (media_registry, ledger): (CacheRegistry, Arc<dyn PrefetchLedger>) =
            match SledStorageFactory::new(data_dir.join("media.sled")) {
                Ok(factory) => {
                    let factory = Arc::new(factory);
                    let ledger: Arc<dyn PrefetchLedger> = match SledPrefetchLedger::open(factory.db()) {
                        Ok(ledger) => Arc::new(ledger),
                        Err(e) => {
                            warn!("Prefetch ledger not persistent: {}", e);
                            Arc::new(MokaPrefetchLedger::new())
                        }
                    };
                    storage.push(factory.clone());
                    info!("Media cache initialized with persistence enabled");
                    (CacheRegistry::new(factory), ledger)
                }
                Err(e) => {
                    warn!("Failed to initialize media persistence: {}. Running in-memory mode.", e);
                    (CacheRegistry::in_memory(), Arc::new(MokaPrefetchLedger::new()))
                }
            };
        let interceptor_registry = match SledStorageFactory::new(data_dir.join("interceptor.sled")) {
            Ok(factory) => {
                let factory = Arc::new(factory);
                storage.push(factory.clone());
                CacheRegistry::new(factory)
            }
            Err(e) => {
                warn!("Failed to initialize interceptor persistence: {}. Running in-memory mode.", e);
                CacheRegistry::in_memory()
            }
        };

        let backends = Backends {
            media_registry,
            interceptor_registry,
            ledger,
            network: Arc::new(ReqwestNetwork::new(
                origin,
                upstream,
                config.background_timeout * 6,
            )?),
            objects: Arc::new(HttpObjectStore::new(&config.objects_url, config.background_timeout)?),
            documents: Arc::new(HttpDocumentStore::new(
                &config.documents_url,
                config.background_timeout,
            )?),
        };
        let mut state = Self::from_backends(config, backends).await?;
        state.storage = storage;
        Ok(state)
    }

    pub async fn from_backends(config: &Config, backends: Backends) -> Result<Self> {
        let interceptor_config = InterceptorConfig::from_config(config)?;
        let mapper = RequestMapper::new(interceptor_config.origin.clone());

        // Create broadcast channel for SSE events (1000 event buffer capacity)
        let (event_tx, _event_rx) = broadcast::channel(1000);

        let photos_cache = BlobCacheService::open_or_degraded(
            &backends.media_registry,
            MediaCacheSpec::photos().with_orig_max_entries(config.orig_max_entries),
        )
        .await
        .with_event_broadcaster(event_tx.clone());
        let music_cache = BlobCacheService::open_or_degraded(
            &backends.media_registry,
            MediaCacheSpec::audio().with_orig_max_entries(config.orig_max_entries),
        )
        .await
        .with_event_broadcaster(event_tx.clone());

        let photos = Arc::new(MediaLibrary::new(
            photos_cache,
            AssetLayout::photos(),
            backends.objects.clone(),
            backends.documents.clone(),
            config.background_timeout,
        ));
        let music = Arc::new(MediaLibrary::new(
            music_cache,
            AssetLayout::music(),
            backends.objects.clone(),
            backends.documents.clone(),
            config.background_timeout,
        ));

        let daily = Arc::new(
            DailyPickService::new(
                photos.clone(),
                backends.documents.clone(),
                backends.ledger,
                Arc::new(SystemClock),
                ReferenceZone::parse(&config.reference_time_zone),
            )
            .with_snapshot_size(config.daily_snapshot)
            .with_prefetch_timeout(config.background_timeout),
        );

        let interceptor = Arc::new(Interceptor::new(
            interceptor_config,
            backends.interceptor_registry,
            backends.network.clone(),
        ));

        Ok(Self {
            interceptor,
            network: backends.network,
            mapper,
            photos,
            music,
            daily,
            event_channel: event_tx,
            storage: Vec::new(),
        })
    }

    /// Install and activate the interceptor. On failure the proxy keeps
    /// running and passes everything through.
    pub async fn start_interceptor(&self) -> Result<Vec<String>> {
        self.interceptor.install().await?;
        self.interceptor.activate().await
    }

    pub fn library(&self, kind: &str) -> Option<&Arc<MediaLibrary>> {
        match kind {
            "photos" => Some(&self.photos),
            "music" => Some(&self.music),
            _ => None,
        }
    }

    /// Wait for background work, then flush persistent storage.
    pub async fn shutdown(&self) {
        self.interceptor.shutdown().await;
        for factory in &self.storage {
            if let Err(e) = factory.flush() {
                warn!("Failed to flush storage on shutdown: {}", e);
            }
        }
    }
}

fn parse_url(name: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::InvalidInput(format!("{name}={raw:?}: {e}")))
}
