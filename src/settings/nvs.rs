use esp_idf_svc::nvs::EspDefaultNvs;

use super::{Settings, SettingsStore, FIELDS, MAX_STORED_LEN};

/// Settings kept in the default NVS partition, one string entry per schema key.
pub struct NvsStore {
    nvs: EspDefaultNvs,
}

impl NvsStore {
    pub fn new(nvs: EspDefaultNvs) -> Self {
        Self { nvs }
    }

    /// Reads and clears the "enter setup on next boot" flag.
    pub fn take_setup_request(&mut self) -> bool {
        let state = self.nvs.get_u8("state").ok().flatten().unwrap_or(0);
        if state != 0 {
            if let Err(e) = self.nvs.set_u8("state", 0) {
                log::error!("Failed to clear state: {:?}", e);
            }
        }
        state == 1
    }
}

impl SettingsStore for NvsStore {
    fn load_all(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::default();
        let mut str_buf = [0; MAX_STORED_LEN + 1];
        for f in FIELDS {
            match self.nvs.get_str(f.key, &mut str_buf) {
                Ok(Some(value)) => {
                    settings.set(f.key, value);
                }
                Ok(None) => {}
                Err(e) => log::error!("Failed to get {}: {:?}", f.key, e),
            }
        }
        Ok(settings)
    }

    fn save(&mut self, settings: &Settings) -> anyhow::Result<()> {
        for (key, value) in settings.iter() {
            if value.len() > MAX_STORED_LEN {
                anyhow::bail!("{} is too long to be read back", key);
            }
            self.nvs
                .set_str(key, value)
                .map_err(|e| anyhow::anyhow!("Failed to save {}: {:?}", key, e))?;
        }
        Ok(())
    }
}
