//! Process wiring: one store, one session table, one mail queue, and the
//! services and background tasks built on them.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::booking::BookingService;
use crate::config::{Config, StoreKind};
use crate::flow::BookingFlow;
use crate::mail::{MailTransport, Mailer, run_mail_worker};
use crate::reaper;
use crate::session::SessionStore;
use crate::store::{BookingStore, DurableStore, MemoryStore, StoreError};

const SESSION_SWEEP_EVERY: Duration = Duration::from_secs(5);
const COMPACT_CHECK_EVERY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("data directory: {0}")]
    Io(#[from] io::Error),

    #[error("seeding rooms: {0}")]
    Seed(#[from] StoreError),
}

pub struct App {
    pub config: Config,
    pub store: Arc<dyn BookingStore>,
    pub sessions: Arc<SessionStore>,
    pub bookings: BookingService,
    pub flow: BookingFlow,
    background: Vec<JoinHandle<()>>,
    mail_worker: JoinHandle<()>,
}

impl App {
    /// Open the store, seed rooms, and start the mail worker, session reaper
    /// and (for the durable store) the WAL compactor.
    pub async fn start(config: Config, transport: Arc<dyn MailTransport>) -> Result<Self, StartupError> {
        let mut background = Vec::new();

        let store: Arc<dyn BookingStore> = match config.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Durable => {
                std::fs::create_dir_all(&config.data_dir)?;
                let durable = Arc::new(DurableStore::open(config.wal_path())?);
                background.push(tokio::spawn(reaper::run_compactor(
                    durable.clone(),
                    config.compact_threshold,
                    COMPACT_CHECK_EVERY,
                )));
                durable
            }
        };

        let seeded = seed_rooms(store.as_ref(), &config.rooms).await?;
        if seeded > 0 {
            info!("seeded {seeded} rooms");
        }

        let sessions = Arc::new(SessionStore::new(config.session_ttl));
        background.push(tokio::spawn(reaper::run_session_reaper(
            sessions.clone(),
            SESSION_SWEEP_EVERY,
        )));

        let (mailer, mail_rx) = Mailer::channel();
        let mail_worker = tokio::spawn(run_mail_worker(mail_rx, transport, config.template_dir.clone()));

        let bookings = BookingService::new(store.clone(), mailer, config.booking_settings());
        let flow = BookingFlow::new(bookings.clone(), sessions.clone());

        info!(
            store = ?config.store,
            timeout_ms = config.store_timeout.as_millis() as u64,
            "bookings core ready"
        );
        Ok(Self {
            config,
            store,
            sessions,
            bookings,
            flow,
            background,
            mail_worker,
        })
    }

    /// Stop background tasks and let queued mail drain for up to `drain`.
    pub async fn shutdown(self, drain: Duration) {
        let App {
            bookings,
            flow,
            background,
            mail_worker,
            ..
        } = self;
        for task in &background {
            task.abort();
        }
        // Dropping the last Mailer closes the queue; the worker exits once empty.
        drop(flow);
        drop(bookings);
        match tokio::time::timeout(drain, mail_worker).await {
            Ok(_) => info!("mail queue drained"),
            Err(_) => tracing::warn!("mail drain timed out after {drain:?}"),
        }
    }
}

/// Insert `names` as rooms when the store has none. Returns how many were added.
pub async fn seed_rooms(store: &dyn BookingStore, names: &[String]) -> Result<usize, StoreError> {
    if !store.list_rooms().await?.is_empty() {
        return Ok(0);
    }
    for name in names {
        store.insert_room(name).await?;
    }
    Ok(names.len())
}
