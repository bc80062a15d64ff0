//! Configuration page assembly: template shell + settings form + closing tags.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::Context;

use super::buffer::RenderBuffer;
use crate::settings::{Settings, FIELDS};

pub const PAGE_SUFFIX: &str = "\t</body>\n</html>\n";

/// Read-only source of page templates.
pub trait TemplateSource {
    type Asset: Read;

    fn open(&self, name: &str) -> io::Result<Self::Asset>;
}

/// Templates stored as files below a mount point.
#[derive(Debug, Clone)]
pub struct Directory {
    root: PathBuf,
}

impl Directory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateSource for Directory {
    type Asset = File;

    fn open(&self, name: &str) -> io::Result<File> {
        File::open(self.root.join(name))
    }
}

/// Fills `page` with the template, the form for `settings` and the closing tags.
///
/// Fails only when the template cannot be read; anything that does not fit is cut off.
pub fn assemble<T: TemplateSource>(
    page: &mut RenderBuffer,
    templates: &T,
    template: &str,
    settings: &Settings,
) -> anyhow::Result<()> {
    page.clear();

    log::info!("Loading filename {} ...", template);
    let mut asset = templates
        .open(template)
        .with_context(|| format!("Unable to open template {}", template))?;
    page.fill_from(&mut asset)
        .with_context(|| format!("Unable to read template {}", template))?;

    render_form(page, settings);
    page.extend_truncating(PAGE_SUFFIX.as_bytes());

    if page.is_truncated() {
        log::warn!(
            "Config page truncated to {} of {} bytes",
            page.len(),
            page.capacity()
        );
    }
    log::info!(
        "Config page length = {} of {} used",
        page.len(),
        page.capacity()
    );
    Ok(())
}

/// Writes the settings form, one input per schema field, prefilled with the current values.
///
/// The buttons call `sendAction()`, which the template script provides.
pub fn render_form(out: &mut RenderBuffer, settings: &Settings) {
    writeln!(out, "\t<form id=\"config\" onsubmit=\"return false\">");
    for f in FIELDS {
        let value = settings.get(f.key).unwrap_or_default();
        writeln!(
            out,
            "\t\t<label for=\"{key}\">{label}</label>\n\t\t<input type=\"{kind}\" id=\"{key}\" name=\"{key}\" maxlength=\"{max}\" value=\"{value}\"><br>",
            key = f.key,
            label = Escaped(f.label),
            kind = f.kind.input_type(),
            max = f.max_len,
            value = Escaped(value),
        );
    }
    writeln!(
        out,
        "\t\t<button type=\"button\" onclick=\"sendAction('save')\">Save</button>"
    );
    writeln!(
        out,
        "\t\t<button type=\"button\" onclick=\"sendAction('cancel')\">Exit</button>"
    );
    writeln!(out, "\t</form>");
}

/// HTML-escapes text for element content and quoted attributes.
pub struct Escaped<'a>(pub &'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0;
        while let Some(pos) = rest.find(['&', '<', '>', '"', '\'']) {
            f.write_str(&rest[..pos])?;
            let entity = match rest.as_bytes()[pos] {
                b'&' => "&amp;",
                b'<' => "&lt;",
                b'>' => "&gt;",
                b'"' => "&quot;",
                _ => "&#39;",
            };
            f.write_str(entity)?;
            rest = &rest[pos + 1..];
        }
        f.write_str(rest)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory template filesystem.
    #[derive(Default)]
    pub struct Templates(pub HashMap<&'static str, Vec<u8>>);

    impl Templates {
        pub fn with(name: &'static str, content: &[u8]) -> Self {
            let mut files = HashMap::new();
            files.insert(name, content.to_vec());
            Self(files)
        }
    }

    impl TemplateSource for Templates {
        type Asset = io::Cursor<Vec<u8>>;

        fn open(&self, name: &str) -> io::Result<Self::Asset> {
            self.0
                .get(name)
                .cloned()
                .map(io::Cursor::new)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
        }
    }

    const SHELL: &[u8] = b"<html><head><script>/*shell*/</script></head><body>\n";

    fn sample_settings() -> Settings {
        let mut settings = Settings::default();
        settings.set("ssid", "home-net");
        settings.set("brightness", "128");
        settings
    }

    #[test]
    fn page_has_template_form_and_suffix() {
        let mut page = RenderBuffer::try_with_capacity(4096).unwrap();
        let templates = Templates::with("config.html", SHELL);
        assemble(&mut page, &templates, "config.html", &sample_settings()).unwrap();

        let text = std::str::from_utf8(page.as_bytes()).unwrap();
        assert!(text.starts_with("<html><head><script>/*shell*/"));
        assert!(text.contains("id=\"ssid\" name=\"ssid\" maxlength=\"32\" value=\"home-net\""));
        assert!(text.contains("value=\"128\""));
        assert!(text.contains("sendAction('cancel')"));
        assert!(text.ends_with(PAGE_SUFFIX));
        assert!(!page.is_truncated());
    }

    #[test]
    fn missing_template_fails() {
        let mut page = RenderBuffer::try_with_capacity(256).unwrap();
        let templates = Templates::default();
        let err = assemble(&mut page, &templates, "config.html", &Settings::default());
        assert!(err.is_err());
    }

    #[test]
    fn oversized_template_stays_bounded() {
        let mut page = RenderBuffer::try_with_capacity(128).unwrap();
        let templates = Templates::with("config.html", &[b'a'; 500]);
        assemble(&mut page, &templates, "config.html", &sample_settings()).unwrap();

        assert_eq!(page.len(), 127);
        assert!(page.is_truncated());
        let mut expected = vec![b'a'; 127];
        expected.push(0);
        assert_eq!(page.as_bytes_with_nul(), expected.as_slice());
    }

    #[test]
    fn form_overflow_never_exceeds_capacity() {
        let mut settings = sample_settings();
        settings.set("mqtt_broker", "b".repeat(400));
        for capacity in [60, 100, 333, 600, 1000] {
            let mut page = RenderBuffer::try_with_capacity(capacity).unwrap();
            let templates = Templates::with("config.html", SHELL);
            assemble(&mut page, &templates, "config.html", &settings).unwrap();

            assert!(page.len() <= capacity - 1);
            assert!(page.is_truncated());
            assert_eq!(page.as_bytes_with_nul().last(), Some(&0));
        }
    }

    #[test]
    fn setting_values_are_escaped() {
        let mut settings = Settings::default();
        settings.set("hostname", "\"><script>x</script>");
        let mut page = RenderBuffer::try_with_capacity(4096).unwrap();
        render_form(&mut page, &settings);
        let out = std::str::from_utf8(page.as_bytes()).unwrap();
        assert!(out.contains("value=\"&quot;&gt;&lt;script&gt;x&lt;/script&gt;\""));
        assert!(!out.contains("<script>"));
    }

    #[test]
    fn directory_reads_files_below_root() {
        let root = std::env::temp_dir().join(format!("softap-config-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("config.html"), SHELL).unwrap();

        let mut page = RenderBuffer::try_with_capacity(4096).unwrap();
        assemble(&mut page, &Directory::new(&root), "config.html", &Settings::default()).unwrap();
        assert!(page.as_bytes().starts_with(SHELL));

        let _ = std::fs::remove_dir_all(&root);
    }
}
