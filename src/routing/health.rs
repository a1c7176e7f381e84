//! The Health Reconciler (§4.F): a single long-lived background task that
//! periodically probes quarantined providers and re-admits the ones that
//! answer again.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::routing::router::RouterCore;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const BACKGROUND_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the reconciler loop until `shutdown` fires.
///
/// One tick per `period`: snapshot providers that are enabled, unhealthy,
/// and non-static; probe each with `list_models` under a 5 s deadline;
/// on success, re-admit and schedule a bounded background index refresh.
/// Probe failures are silent beyond a debug log (§4.F). Shutdown is
/// observed via a [`CancellationToken`], making repeated `.cancel()` calls
/// from the caller harmless ("once" semantics live in the token itself).
pub async fn run(router: Arc<RouterCore>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    // The first tick fires immediately; skip it so the reconciler's first
    // real probe happens after one full period, matching a periodic task
    // rather than an eager one.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("health reconciler shutting down");
                return;
            }
            _ = ticker.tick() => {
                reconcile_tick(&router).await;
            }
        }
    }
}

async fn reconcile_tick(router: &Arc<RouterCore>) {
    let candidates: Vec<String> = router
        .registry()
        .iter()
        .filter(|p| p.enabled && !p.is_healthy() && !p.is_static())
        .map(|p| p.name.clone())
        .collect();

    for name in candidates {
        let Some(provider) = router.registry().get(&name) else { continue };
        let probe = timeout(PROBE_TIMEOUT, provider.client().list_models()).await;
        match probe {
            Ok(Ok(_)) => {
                router.registry().re_admit(&name);
                let router = Arc::clone(router);
                tokio::spawn(async move {
                    let _ = timeout(BACKGROUND_REFRESH_TIMEOUT, router.index().refresh(router.registry())).await;
                });
            }
            Ok(Err(err)) => debug!("health probe for {name} failed: {err}"),
            Err(_) => debug!("health probe for {name} timed out"),
        }
    }
}
