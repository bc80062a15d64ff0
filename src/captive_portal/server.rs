//! SoftAP and HTTP server bring-up on ESP-IDF

use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    http::{
        server::{Configuration, EspHttpConnection, EspHttpServer, Request},
        Headers, Method,
    },
    io::{Read, Write},
    ipv4::{self, Mask, Subnet},
    netif::{EspNetif, NetifConfiguration, NetifStack},
    sys::{esp, esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register},
    wifi::{
        AccessPointConfiguration, AuthMethod, BlockingWifi, Configuration as WifiConfig, EspWifi,
        WifiDriver,
    },
};

use super::handlers::{Reply, Router, SERVED_METHODS};
use crate::config::NetworkIdentity;
use crate::session::Platform;

pub struct EspPlatform {
    modem: Option<Modem>,
    sysloop: EspSystemEventLoop,
}

impl EspPlatform {
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Self {
        Self {
            modem: Some(modem),
            sysloop,
        }
    }
}

impl Platform for EspPlatform {
    type AccessPoint = BlockingWifi<EspWifi<'static>>;
    type HttpServer = EspHttpServer<'static>;

    fn start_access_point(
        &mut self,
        network: &NetworkIdentity,
    ) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
        let modem = self
            .modem
            .take()
            .ok_or_else(|| anyhow::anyhow!("WiFi modem already in use"))?;

        // 1. AP netif on the fixed address, handing out itself as DNS
        let ip = ipv4::Ipv4Addr::from(network.ip.octets());
        let ap_netif_config = NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Router(ipv4::RouterConfiguration {
                subnet: Subnet {
                    gateway: ipv4::Ipv4Addr::from(network.gateway.octets()),
                    mask: Mask(network.netmask_bits),
                },
                dhcp_enabled: true,
                dns: Some(ip),
                secondary_dns: None,
            })),
            ..NetifConfiguration::wifi_default_router()
        };
        let ap_netif = EspNetif::new_with_conf(&ap_netif_config)?;

        // 2. WiFi driver
        let driver = WifiDriver::new(modem, self.sysloop.clone(), None)?;
        // unused in AP mode, but wrap_all wants both interfaces
        let sta_netif = EspNetif::new(NetifStack::Sta)?;

        // 3. wrap both interfaces
        let mut wifi = BlockingWifi::wrap(
            EspWifi::wrap_all(driver, sta_netif, ap_netif)?,
            self.sysloop.clone(),
        )?;

        // 4. SSID and auth, then start
        let ap_config = AccessPointConfiguration {
            ssid: network
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("SSID {:?} is too long", network.ssid))?,
            password: network
                .password
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("AP password is too long"))?,
            auth_method: if network.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ssid_hidden: false,
            channel: 1,
            max_connections: 4,
            ..Default::default()
        };

        wifi.set_configuration(&WifiConfig::AccessPoint(ap_config))?;
        wifi.start()?;

        log::info!("SoftAP IP Address: {}", wifi.wifi().ap_netif().get_ip_info()?.ip);
        Ok(wifi)
    }

    fn stop_access_point(&mut self, mut ap: BlockingWifi<EspWifi<'static>>) -> anyhow::Result<()> {
        ap.stop()?;
        Ok(())
    }

    fn start_http_server(&mut self, router: Arc<Router>) -> anyhow::Result<EspHttpServer<'static>> {
        let config = Configuration {
            stack_size: 8192,
            max_uri_handlers: SERVED_METHODS.len(),
            uri_match_wildcard: true,
            ..Default::default()
        };

        let mut server = EspHttpServer::new(&config)?;
        register_routes(&mut server, router)?;
        Ok(server)
    }

    fn free_heap(&self) -> usize {
        unsafe { esp_idf_svc::sys::esp_get_free_heap_size() as usize }
    }

    fn delay(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn restart(&self) -> ! {
        unsafe { esp_idf_svc::sys::esp_restart() }
    }
}

/// Everything goes through one wildcard handler per method so that unmatched
/// requests reach the router's redirect instead of httpd's own 405.
fn register_routes(server: &mut EspHttpServer<'static>, router: Arc<Router>) -> anyhow::Result<()> {
    for verb in SERVED_METHODS.iter() {
        let method = esp_method(verb)
            .ok_or_else(|| anyhow::anyhow!("httpd has no method {}", verb))?;
        let router = router.clone();
        let verb = verb.clone();
        server.fn_handler::<anyhow::Error, _>("/*", method, move |req| {
            handle(req, &verb, &router)
        })?;
    }
    Ok(())
}

fn esp_method(verb: &http::Method) -> Option<Method> {
    [
        (http::Method::GET, Method::Get),
        (http::Method::POST, Method::Post),
        (http::Method::HEAD, Method::Head),
        (http::Method::PUT, Method::Put),
        (http::Method::DELETE, Method::Delete),
        (http::Method::OPTIONS, Method::Options),
        (http::Method::PATCH, Method::Patch),
        (http::Method::TRACE, Method::Trace),
        (http::Method::CONNECT, Method::Connect),
    ]
    .into_iter()
    .find(|(m, _)| m == verb)
    .map(|(_, method)| method)
}

fn handle(
    mut req: Request<&mut EspHttpConnection<'_>>,
    method: &http::Method,
    router: &Router,
) -> anyhow::Result<()> {
    let uri = req.uri().to_string();

    let mut body = Vec::new();
    if *method == http::Method::POST {
        let len = req.content_len().unwrap_or(0) as usize;
        if len > router.max_body() {
            return send(req, router.reject_oversized(len));
        }
        body.resize(len, 0);
        let mut filled = 0;
        while filled < len {
            let n = req.read(&mut body[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        body.truncate(filled);
    }

    let reply = router.route(method, &uri, &body);
    log::debug!("{} {} -> {}", method, uri, reply.status);
    send(req, reply)
}

fn send(req: Request<&mut EspHttpConnection<'_>>, reply: Reply<'_>) -> anyhow::Result<()> {
    let mut headers = vec![("Content-Type", reply.content_type)];
    if let Some(location) = reply.location {
        headers.push(("Location", location));
    }
    let mut resp = req.into_response(
        reply.status.as_u16(),
        reply.status.canonical_reason(),
        &headers,
    )?;
    resp.write_all(reply.body)?;
    Ok(())
}

/// Registers the SPIFFS partition holding the page template under `base_path`.
pub fn mount_spiffs(base_path: &str) -> anyhow::Result<()> {
    let base_path = CString::new(base_path)?;
    let conf = esp_vfs_spiffs_conf_t {
        base_path: base_path.as_ptr(),
        partition_label: std::ptr::null(),
        max_files: 2,
        format_if_mount_failed: false,
    };
    esp!(unsafe { esp_vfs_spiffs_register(&conf) })?;
    Ok(())
}
