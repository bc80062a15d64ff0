//! One configuration session: bring-up, serving, teardown and the final restart.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{oneshot, watch};

use crate::captive_portal::{html, DnsResponder, RenderBuffer, Router, TemplateSource};
use crate::config::{NetworkIdentity, PortalConfig, FATAL_RESTART_DELAY};
use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Cancelled,
    InvalidAction,
    /// Input on the serial console.
    ConsoleAbort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Done(ExitReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    pub reason: ExitReason,
    /// The render buffer had no other owner left and was freed here.
    pub page_released: bool,
}

/// Device services a session needs.
///
/// Dropping an [`Platform::HttpServer`] stops the listener and releases its
/// handlers.
pub trait Platform {
    type AccessPoint;
    type HttpServer;

    fn start_access_point(&mut self, network: &NetworkIdentity) -> anyhow::Result<Self::AccessPoint>;

    fn stop_access_point(&mut self, ap: Self::AccessPoint) -> anyhow::Result<()>;

    fn start_http_server(&mut self, router: Arc<Router>) -> anyhow::Result<Self::HttpServer>;

    fn free_heap(&self) -> usize;

    fn delay(&self, duration: Duration);

    fn restart(&self) -> !;
}

/// Runs a session to completion and restarts the device.
///
/// Every way out of here, including fatal errors, ends in exactly one
/// [`Platform::restart`].
pub fn enter<P, T, F>(
    mut platform: P,
    store: Box<dyn SettingsStore + Send>,
    templates: &T,
    abort: F,
    config: &PortalConfig,
) -> !
where
    P: Platform,
    T: TemplateSource,
    F: Future<Output = ()>,
{
    log::info!("Free Heap Before SoftAP: {}", platform.free_heap());

    let outcome = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")
        .and_then(|rt| {
            let outcome = rt.block_on(run(&mut platform, store, templates, abort, config));
            // a blocked console read must not hold back the restart
            rt.shutdown_background();
            outcome
        });

    match outcome {
        Ok(teardown) => {
            log::info!("Configuration session finished: {:?}", teardown);
            log::info!("Free Heap After SoftAP Cleanup: {}", platform.free_heap());
        }
        Err(e) => {
            log::error!("Configuration session failed: {:?} ... rebooting ...", e);
            platform.delay(FATAL_RESTART_DELAY);
        }
    }

    platform.restart()
}

/// Brings the portal up, serves until the session is done, and tears it down again.
pub async fn run<P, T, F>(
    platform: &mut P,
    store: Box<dyn SettingsStore + Send>,
    templates: &T,
    abort: F,
    config: &PortalConfig,
) -> anyhow::Result<Teardown>
where
    P: Platform,
    T: TemplateSource,
    F: Future<Output = ()>,
{
    // Allocated up front so that memory is only claimed when setup is requested
    let mut page = RenderBuffer::try_with_capacity(config.buffer_capacity)?;

    // 1. render the page once, before anyone can ask for it
    let settings = store.load_all().unwrap_or_else(|e| {
        log::error!("Failed to load settings: {:?}", e);
        Default::default()
    });
    html::assemble(&mut page, templates, &config.template, &settings)?;

    // 2. AP, DNS, HTTP; each failure undoes the steps before it
    log::info!("Starting local AP for configuration");
    log::info!("Connect to: {} to configure", config.network.ssid);
    let ap = platform.start_access_point(&config.network)?;

    let dns = DnsResponder::bind(
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.dns_port)),
        config.network.ip,
    )
    .await;
    let mut dns = match dns {
        Ok(dns) => dns,
        Err(e) => {
            stop_access_point(platform, ap);
            return Err(e).context("Failed to start DNS server");
        }
    };

    let (state_tx, mut state_rx) = watch::channel(SessionState::Running);
    let router = Arc::new(Router::new(
        page,
        store,
        state_tx,
        config.network.portal_url(),
        config.max_submission_bytes,
    ));

    let http = match platform.start_http_server(router.clone()) {
        Ok(http) => http,
        Err(e) => {
            drop(dns);
            stop_access_point(platform, ap);
            return Err(e).context("Failed to start HTTP server");
        }
    };
    log::info!("Web server started!");
    log::info!("Press any key to close server ...");

    // 3. serve
    let reason = serve_until_done(&mut dns, &mut state_rx, abort).await;
    log::info!("Closing configuration portal: {:?}", reason);

    // 4. tear down in reverse
    drop(http);
    drop(dns);
    stop_access_point(platform, ap);

    let page_released = match Arc::try_unwrap(router) {
        Ok(router) => {
            drop(router);
            true
        }
        Err(router) => {
            log::warn!(
                "Config page still referenced {} times at teardown",
                Arc::strong_count(&router) - 1
            );
            false
        }
    };

    Ok(Teardown {
        reason,
        page_released,
    })
}

/// Answers DNS queries until a terminal action lands in `state` or `abort` completes.
pub async fn serve_until_done<F>(
    dns: &mut DnsResponder,
    state: &mut watch::Receiver<SessionState>,
    abort: F,
) -> ExitReason
where
    F: Future<Output = ()>,
{
    tokio::pin!(abort);
    loop {
        tokio::select! {
            biased;
            done = state.wait_for(|s| *s != SessionState::Running) => {
                return match done.as_deref() {
                    Ok(SessionState::Done(reason)) => *reason,
                    // the router is gone, nobody can finish the session any more
                    _ => ExitReason::ConsoleAbort,
                };
            }
            _ = &mut abort => return ExitReason::ConsoleAbort,
            served = dns.serve_next() => {
                if let Err(e) = served {
                    log::warn!("DNS error: {:?}", e);
                }
            }
        }
    }
}

/// Completes on the first byte typed on the console.
///
/// The console is read on its own thread, which is left blocked if the
/// session ends another way.
pub async fn console_keypress() {
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("console".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if wait_for_keypress(&mut std::io::stdin()) {
                let _ = tx.send(());
            }
        });
    if let Err(e) = spawned {
        log::warn!("Failed to start console reader: {:?}", e);
    }
    if rx.await.is_err() {
        log::warn!("Console unavailable, only the web form can close the portal");
        std::future::pending::<()>().await;
    }
}

/// Blocks until one byte arrives, false if the console fails.
fn wait_for_keypress<R: std::io::Read>(console: &mut R) -> bool {
    let mut byte = [0u8; 1];
    loop {
        match console.read(&mut byte) {
            Ok(1..) => return true,
            // the console reports end of input while idle
            Ok(0) => std::thread::sleep(Duration::from_millis(100)),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::warn!("Console read failed: {:?}", e);
                return false;
            }
        }
    }
}

fn stop_access_point<P: Platform>(platform: &mut P, ap: P::AccessPoint) {
    if let Err(e) = platform.stop_access_point(ap) {
        log::warn!("Failed to stop access point: {:?}", e);
    }
}
