//! RealmLink demo - a host and one guest at the same table.
//!
//! Runs both runtimes in one process, over the in-process hub or, with
//! `REALMLINK_TRANSPORT=relay`, over the file-backed storage relay. The guest
//! claims the slot at the centre of the map and the converged state is logged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use realmlink_domain::{ClaimStats, DisplayName, EntityKind};
use realmlink_engine::infrastructure::{
    clock::{SystemClock, SystemRandom},
    kv_store::FileKvStore,
    ollama::OllamaStatGenerator,
    ports::{ClockPort, KeyValueStorePort, RandomPort, TransportFactory},
    settings::EngineConfig,
    transport::{InMemorySignaling, RelaySettings, StorageRelayFactory},
};
use realmlink_engine::runtime::{GuestRuntime, HostRuntime, RuntimeDeps, SessionEvent};
use realmlink_engine::use_cases::{EditOutcome, GuestIntent, HostEdit, SessionContext};
use realmlink_shared::SessionCode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realmlink_engine=debug,realmlink_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
    let data_dir = std::env::var("REALMLINK_DATA_DIR").unwrap_or_else(|_| ".realmlink".into());
    let saves: Arc<dyn KeyValueStorePort> = Arc::new(
        FileKvStore::open(&data_dir)
            .await
            .with_context(|| format!("opening data directory {}", data_dir))?,
    );

    let code = match std::env::var("REALMLINK_SESSION_CODE") {
        Ok(raw) => SessionCode::parse(&raw).context("REALMLINK_SESSION_CODE")?,
        Err(_) => {
            let random = SystemRandom::new();
            SessionCode::generate(|len| random.gen_index(len))
        }
    };
    tracing::info!(code = %code, "Starting RealmLink demo");

    let transport = std::env::var("REALMLINK_TRANSPORT").unwrap_or_else(|_| "memory".into());
    let (host_transports, guest_transports): (Arc<dyn TransportFactory>, Arc<dyn TransportFactory>) =
        match transport.as_str() {
            "relay" => {
                let settings = RelaySettings::from(&config);
                (
                    Arc::new(StorageRelayFactory::new(Arc::clone(&saves), settings)),
                    Arc::new(StorageRelayFactory::new(Arc::clone(&saves), settings)),
                )
            }
            _ => {
                let hub = InMemorySignaling::new();
                (Arc::new(hub.factory()), Arc::new(hub.factory()))
            }
        };
    tracing::info!(transport = %transport, "Transport selected");

    let mut host_deps = RuntimeDeps::new(config.clone(), host_transports, Arc::clone(&clock))
        .with_store(Arc::clone(&saves));
    if std::env::var("REALMLINK_OLLAMA_URL").is_ok() {
        host_deps = host_deps.with_stat_generator(Arc::new(OllamaStatGenerator::new(&config.ollama)));
    }
    let host = HostRuntime::start(code.clone(), host_deps).await;
    let mut host_events = host.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = host_events.recv().await {
            if let SessionEvent::Notice { class, message } = event {
                tracing::warn!(?class, %message, "Host notice");
            }
        }
    });

    let room = host.state().active_room_id();
    let centre = host
        .state()
        .room(room)
        .map(|r| r.grid().center())
        .context("active room missing")?;
    let slot = match host
        .edit(HostEdit::AddToken {
            room,
            kind: EntityKind::PlayerSlot,
            position: Some(centre),
        })
        .await?
    {
        EditOutcome::EntityAdded(id) => id,
        other => anyhow::bail!("unexpected outcome {:?}", other),
    };
    if let Ok(prompt) = std::env::var("REALMLINK_SUMMON") {
        match host.summon_monster(prompt, None).await {
            Ok(id) => tracing::info!(entity = %id, "Monster summoned"),
            Err(e) => tracing::warn!(error = %e, "Summoning failed"),
        }
    }

    let guest_deps = RuntimeDeps::new(config, guest_transports, clock);
    let kara = GuestRuntime::start(
        SessionContext::guest(code.clone(), DisplayName::new("Kara")?),
        guest_deps,
    )?;

    let patience = Duration::from_secs(60);
    let mut replica = kara.watch_state();
    let target = host.state().revision();
    tokio::time::timeout(
        patience,
        replica.wait_for(|s| s.as_ref().is_some_and(|s| s.revision() >= target)),
    )
    .await
    .context("guest never received the table")??;

    kara.act(GuestIntent::Claim {
        slot,
        stats: ClaimStats::new(24, 16)?,
    })
    .await?;

    let mut host_state = host.watch_state();
    tokio::time::timeout(
        patience,
        host_state.wait_for(|s| s.find_entity(slot).is_some_and(|e| e.is_claimed())),
    )
    .await
    .context("claim never landed")??;
    let settled = host.state().revision();
    tokio::time::timeout(
        patience,
        replica.wait_for(|s| s.as_ref().is_some_and(|s| s.revision() >= settled)),
    )
    .await
    .context("guest never converged")??;

    let converged = kara.state().context("guest lost its replica")?;
    if let Some(view) = converged.guest_view_of_active_room() {
        tracing::info!(
            room = view.name,
            revision = %converged.revision(),
            table = %serde_json::to_string(&view)?,
            "Guest view"
        );
    }
    let base = Url::parse("https://realmlink.example/play")?;
    tracing::info!(link = %code.session_link(&base), "Invite link");
    tracing::info!(portal = %host.export_portal(&base)?, "Portal link");

    kara.shutdown().await?;
    host.shutdown().await?;
    tracing::info!("Demo finished");
    Ok(())
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
