//! Registration and heartbeats.
//!
//! On startup the mediator registers itself with core, retrying until core
//! accepts. Once registered it reports uptime every heartbeat period; the
//! first beat requests the full dynamic configuration, and any configuration
//! carried on a heartbeat response is merged into the live snapshot.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;

pub struct HeartbeatService;

impl HeartbeatService {
    /// Start the registration/heartbeat loop. The returned handle is aborted
    /// on server shutdown.
    pub fn spawn(ctx: Arc<EngineContext>) -> JoinHandle<()> {
        tokio::spawn(run(ctx))
    }
}

async fn run(ctx: Arc<EngineContext>) {
    if ctx.config().registration_config().is_none() {
        debug!("no registration configured; staying unregistered");
        return;
    }

    let started = Instant::now();
    register_with_retry(&ctx).await;

    if !ctx.config().heartbeats_enabled() {
        return;
    }

    let mut ticker = interval(ctx.config().heartbeat_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut force_config = true;
    let mut last_beat_ok = true;

    loop {
        ticker.tick().await;
        let uptime = started.elapsed().as_secs();
        let result = ctx.core_api().send_heartbeat(uptime, force_config).await;

        if result.success {
            if !last_beat_ok {
                info!("heartbeat to core recovered");
            }
            last_beat_ok = true;
            force_config = false;
            if let Some(update) = result.config {
                let keys: Vec<&str> = update.keys().map(String::as_str).collect();
                info!(settings = ?keys, "received updated config from core");
                ctx.config().dynamic_config().merge(&update);
            }
        } else {
            // log the first failure loudly, then quiet down until recovery
            if last_beat_ok {
                warn!(detail = %result.raw_body, "heartbeat to core failed");
            } else {
                debug!(detail = %result.raw_body, "heartbeat to core still failing");
            }
            last_beat_ok = false;
        }
    }
}

/// Register with core, retrying on the heartbeat period until it accepts.
/// Requests cannot flow through core until this succeeds, so the loop never
/// gives up on its own.
async fn register_with_retry(ctx: &Arc<EngineContext>) {
    let retry_delay = ctx.config().heartbeat_period();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let result = ctx.core_api().register().await;
        if result.success {
            info!(attempts, "mediator registered with core");
            return;
        }
        if attempts == 1 {
            error!(
                status = ?result.status,
                detail = %result.body,
                "failed to register mediator with core; will keep retrying"
            );
        } else {
            debug!(attempts, status = ?result.status, "mediator registration still failing");
        }
        sleep(retry_delay).await;
    }
}
