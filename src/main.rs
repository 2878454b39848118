use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sinyal_core::config::Config;
use sinyal_core::hotspot::{HotspotBanner, detect_hotspot};
use sinyal_core::location::{
    FALLBACK_ACCURACY_METERS, FixedLocationSource, acquire_fix,
};
use sinyal_core::map::MapViewModel;
use sinyal_core::realtime::VisibleSetWatcher;
use sinyal_core::signal::{Countdown, CountdownState, SignalManager, format_remaining};
use sinyal_core::signal::types::LocationFix;
use sinyal_core::store::{MemoryVisibilityStore, PgVisibilityStore, VisibilityStore};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        conn.execute("SET application_name = 'sinyal_console';")
                            .await?;
                        Ok(())
                    })
                })
                .connect(&url)
                .await
                .expect("Failed to connect to Postgres");

            sqlx::migrate!()
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            let store = PgVisibilityStore::new(pool)
                .await
                .expect("Failed to start the change listener");
            run(Arc::new(store), config).await;
        }
        None => {
            info!("DATABASE_URL not set, running in mock mode");
            let store = MemoryVisibilityStore::with_mock_users();
            run(Arc::new(store), config).await;
        }
    }
}

/// Drive one signal session end to end: acquire a fix, start the signal,
/// then follow the live view and the countdown until expiry or Ctrl-C.
async fn run<S: VisibilityStore + 'static>(store: Arc<S>, config: Config) {
    if let Err(err) = store.ensure_profile(&config.user_id, &config.nickname).await {
        error!(error = %err, "profile setup failed");
        return;
    }

    let manager = SignalManager::new(Arc::clone(&store), config.user_id.clone());
    let watcher = VisibleSetWatcher::spawn(Arc::clone(&store));

    let fallback_fix = LocationFix::with_accuracy(
        config.default_lat,
        config.default_lon,
        FALLBACK_ACCURACY_METERS,
    );
    let source = FixedLocationSource::new(fallback_fix);
    let fallback = config.use_fallback_location.then_some(fallback_fix);

    let fix = match acquire_fix(&source, config.location_timeout(), fallback).await {
        Ok(fix) => fix,
        Err(err) => {
            error!("{err}");
            return;
        }
    };

    let expires_at = match manager.start(&fix, config.signal_duration_minutes).await {
        Ok(expires_at) => expires_at,
        Err(err) => {
            error!("{err}");
            return;
        }
    };
    info!(
        nickname = %config.nickname,
        duration_minutes = config.signal_duration_minutes,
        "visible until {expires_at}"
    );

    let mut countdown = Countdown::new();
    countdown.arm(expires_at);

    let mut view = MapViewModel::new(
        config.user_id.clone(),
        (config.default_lat, config.default_lon),
    );
    view.set_self_position(Some(fix));

    // Periodic pings keep the published position fresh while active. The
    // store ignores them once the signal is stopped or expired.
    let ping_task = {
        let manager = manager.clone();
        let period = config.location_update_interval();
        let deadline = config.location_timeout();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match acquire_fix(&source, deadline, fallback).await {
                    Ok(fix) => {
                        manager.update_location(&fix).await;
                    }
                    Err(err) => warn!(error = %err, "skipping location update"),
                }
            }
        })
    };

    let mut snapshot_rx = watcher.subscribe();
    let mut live = true;
    let mut banner = HotspotBanner::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = snapshot_rx.changed(), if live => {
                if changed.is_err() {
                    warn!("live view ended, map frozen");
                    live = false;
                    continue;
                }
                let users = snapshot_rx.borrow_and_update().clone();
                view.apply_snapshot(&users);
                info!(visible = view.visible_count(), "visible set updated");

                let hotspot = detect_hotspot(&users);
                if let Some(info) = banner.observe(hotspot) {
                    info!(user_count = info.user_count, "Burada hareket var!");
                    // The console has no dismiss button; one announcement
                    // per episode.
                    banner.dismiss();
                }
            }
            _ = ticker.tick() => {
                match countdown.tick(Utc::now()) {
                    CountdownState::Running { remaining } => {
                        debug!("Kalan süre: {}", format_remaining(remaining));
                    }
                    CountdownState::Expired => {
                        info!("Süre doldu");
                        // Local expiry flips the view right away; the store
                        // read only confirms, and heals a stale-active row
                        // on the way. Pings after the heal are ignored by
                        // the store, so the loop can keep running.
                        view.set_self_position(None);
                        let status = manager.check_status().await;
                        countdown.sync(&status);
                        if let Some(expires_at) = status.expires_at() {
                            info!("signal is still active server-side, visible until {expires_at}");
                            view.set_self_position(Some(fix));
                        } else {
                            info!("signal ended");
                        }
                    }
                    CountdownState::Inactive => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    ping_task.abort();
    if let Err(err) = manager.stop().await {
        error!("{err}");
    }
    watcher.stop().await;
}
