#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use softap_config::{
        captive_portal::{mount_spiffs, Directory, EspPlatform},
        config::{PortalConfig, TEMPLATE_MOUNT_POINT},
        session,
        settings::{NvsStore, SettingsStore},
    };

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    let peripherals = esp_idf_svc::hal::prelude::Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    // tokio's reactor needs eventfd
    let _fs = esp_idf_svc::io::vfs::MountedEventfs::mount(5)?;
    let partition = esp_idf_svc::nvs::EspDefaultNvsPartition::take()?;
    let nvs = esp_idf_svc::nvs::EspDefaultNvs::new(partition, "setting", true)?;

    let mut store = NvsStore::new(nvs);
    let settings = store.load_all()?;
    for (key, value) in settings.iter() {
        if key == "pass" {
            log::info!("{}: [{} chars]", key, value.len());
        } else {
            log::info!("{}: {:?}", key, value);
        }
    }

    let mut button = esp_idf_svc::hal::gpio::PinDriver::input(peripherals.pins.gpio0)?;
    button.set_pull(esp_idf_svc::hal::gpio::Pull::Up)?;

    let setup_requested = store.take_setup_request();
    let button_pressed = button.is_low();
    if settings.is_complete() && !setup_requested && !button_pressed {
        log::info!("Configuration present, continuing normal boot");
        return Ok(());
    }
    log::info!(
        "Entering configuration: complete={} requested={} button={}",
        settings.is_complete(),
        setup_requested,
        button_pressed
    );
    drop(button);

    let config = PortalConfig::default();
    if let Err(e) = mount_spiffs(TEMPLATE_MOUNT_POINT) {
        // the session reports the missing template and restarts
        log::error!("Failed to mount {}: {:?}", TEMPLATE_MOUNT_POINT, e);
    }
    let templates = Directory::new(TEMPLATE_MOUNT_POINT);

    session::enter(
        EspPlatform::new(peripherals.modem, sysloop),
        Box::new(store),
        &templates,
        session::console_keypress(),
        &config,
    )
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("softap-config is firmware for ESP-IDF targets; run `cargo test` for the host-side tests");
}
