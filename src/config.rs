use crate::storage::{AzureBlobStore, LocalDirStore, ObjectStore};
use crate::tracker::ImportMode;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "kobo-dhis2-sync.toml";
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub version: u32,
    pub source: SourceConfig,
    pub index: IndexConfig,
    pub dhis2: Dhis2Config,
    pub mapping: MappingConfig,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Azure {
        account_url: String,
        container: String,
        sas_token: String,
    },
    Local {
        root: PathBuf,
    },
}

impl StoreConfig {
    pub fn open(&self, timeout: Duration) -> Result<Box<dyn ObjectStore>> {
        match self {
            Self::Azure {
                account_url,
                container,
                sas_token,
            } => {
                let store = AzureBlobStore::new(account_url, container, sas_token, timeout)
                    .with_context(|| format!("configure azure container `{container}`"))?;
                Ok(Box::new(store))
            }
            Self::Local { root } => Ok(Box::new(LocalDirStore::new(root.clone()))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub store: StoreConfig,
    pub blob: String,
    pub delimiter: u8,
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub store: StoreConfig,
    pub blob: String,
}

#[derive(Clone)]
pub struct Dhis2Config {
    pub server: String,
    pub user: String,
    pub password: String,
    pub program: Option<String>,
    pub import_mode: ImportMode,
}

impl std::fmt::Debug for Dhis2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dhis2Config")
            .field("server", &self.server)
            .field("user", &self.user)
            .field("program", &self.program)
            .field("import_mode", &self.import_mode)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub data_elements: PathBuf,
    pub org_units: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub request_timeout: Duration,
    pub artifacts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    version: Option<u32>,
    source: Option<RawSourceConfig>,
    index: Option<RawIndexConfig>,
    dhis2: Option<RawDhis2Config>,
    mapping: Option<RawMappingConfig>,
    sync: Option<RawSyncSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawStoreFields {
    backend: Option<String>,
    account_url: Option<String>,
    container: Option<String>,
    sas_token: Option<String>,
    root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSourceConfig {
    #[serde(flatten)]
    store: RawStoreFields,
    blob: Option<String>,
    delimiter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawIndexConfig {
    #[serde(flatten)]
    store: RawStoreFields,
    blob: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDhis2Config {
    server: Option<String>,
    user: Option<String>,
    password: Option<String>,
    program: Option<String>,
    import_mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMappingConfig {
    data_elements: Option<String>,
    org_units: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSyncSettings {
    poll_interval_secs: Option<u64>,
    max_wait_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    artifacts_dir: Option<String>,
}

pub fn load_config(path: &Path) -> Result<SyncConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let parsed: RawConfig =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    validate_config(parsed, path, base_dir)
}

fn validate_config(raw: RawConfig, path: &Path, base_dir: &Path) -> Result<SyncConfig> {
    let version = raw
        .version
        .ok_or_else(|| anyhow::anyhow!("{} missing required `version`", path.display()))?;
    if version != SUPPORTED_VERSION {
        bail!(
            "{} has unsupported version {version}; expected version = {SUPPORTED_VERSION}",
            path.display()
        );
    }

    let source = raw
        .source
        .ok_or_else(|| anyhow::anyhow!("{} missing `[source]` section", path.display()))?;
    let source = SourceConfig {
        store: validate_store(source.store, "source", path, base_dir)?,
        blob: required(source.blob, "source", "blob", path)?,
        delimiter: validate_delimiter(source.delimiter, path)?,
    };

    let index = raw
        .index
        .ok_or_else(|| anyhow::anyhow!("{} missing `[index]` section", path.display()))?;
    let index = IndexConfig {
        store: validate_store(index.store, "index", path, base_dir)?,
        blob: required(index.blob, "index", "blob", path)?,
    };

    let dhis2 = raw
        .dhis2
        .ok_or_else(|| anyhow::anyhow!("{} missing `[dhis2]` section", path.display()))?;
    let dhis2 = validate_dhis2(dhis2, path)?;

    let mapping = raw
        .mapping
        .ok_or_else(|| anyhow::anyhow!("{} missing `[mapping]` section", path.display()))?;
    let mapping = MappingConfig {
        data_elements: base_dir.join(required(mapping.data_elements, "mapping", "data_elements", path)?),
        org_units: base_dir.join(required(mapping.org_units, "mapping", "org_units", path)?),
    };

    let sync = validate_sync(raw.sync.unwrap_or_default(), path, base_dir)?;

    Ok(SyncConfig {
        version,
        source,
        index,
        dhis2,
        mapping,
        sync,
    })
}

fn validate_store(
    raw: RawStoreFields,
    section: &str,
    path: &Path,
    base_dir: &Path,
) -> Result<StoreConfig> {
    match sanitize_optional(raw.backend).as_deref() {
        None | Some("azure") => Ok(StoreConfig::Azure {
            account_url: required(raw.account_url, section, "account_url", path)?,
            container: required(raw.container, section, "container", path)?,
            sas_token: required(raw.sas_token, section, "sas_token", path)?,
        }),
        Some("local") => Ok(StoreConfig::Local {
            root: base_dir.join(required(raw.root, section, "root", path)?),
        }),
        Some(other) => bail!(
            "{} has unsupported `[{section}].backend = \"{other}\"`; expected `azure` or `local`",
            path.display()
        ),
    }
}

fn validate_dhis2(raw: RawDhis2Config, path: &Path) -> Result<Dhis2Config> {
    let mut server = required(raw.server, "dhis2", "server", path)?;
    if !server.starts_with("http://") && !server.starts_with("https://") {
        bail!(
            "{} has non-http `[dhis2].server = \"{server}\"`",
            path.display()
        );
    }
    if !server.ends_with('/') {
        server.push('/');
    }

    let import_mode = match sanitize_optional(raw.import_mode) {
        None => ImportMode::Commit,
        Some(mode) => ImportMode::parse(&mode).ok_or_else(|| {
            anyhow::anyhow!(
                "{} has unsupported `[dhis2].import_mode = \"{mode}\"`; expected `COMMIT` or `VALIDATE`",
                path.display()
            )
        })?,
    };

    Ok(Dhis2Config {
        server,
        user: required(raw.user, "dhis2", "user", path)?,
        password: raw
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} missing `[dhis2].password`", path.display()))?,
        program: sanitize_optional(raw.program),
        import_mode,
    })
}

fn validate_sync(raw: RawSyncSettings, path: &Path, base_dir: &Path) -> Result<SyncSettings> {
    let poll_interval_secs = raw.poll_interval_secs.unwrap_or(5);
    let max_wait_secs = raw.max_wait_secs.unwrap_or(600);
    let request_timeout_secs = raw.request_timeout_secs.unwrap_or(60);
    if poll_interval_secs == 0 {
        bail!("{} has zero `[sync].poll_interval_secs`", path.display());
    }
    if max_wait_secs < poll_interval_secs {
        bail!(
            "{} has `[sync].max_wait_secs` ({max_wait_secs}) below `poll_interval_secs` ({poll_interval_secs})",
            path.display()
        );
    }
    if request_timeout_secs == 0 {
        bail!("{} has zero `[sync].request_timeout_secs`", path.display());
    }
    Ok(SyncSettings {
        poll_interval: Duration::from_secs(poll_interval_secs),
        max_wait: Duration::from_secs(max_wait_secs),
        request_timeout: Duration::from_secs(request_timeout_secs),
        artifacts_dir: sanitize_optional(raw.artifacts_dir).map(|dir| base_dir.join(dir)),
    })
}

fn validate_delimiter(raw: Option<String>, path: &Path) -> Result<u8> {
    let Some(raw) = raw else {
        return Ok(b'~');
    };
    match raw.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => bail!(
            "{} has invalid `[source].delimiter = {raw:?}`; expected a single ASCII character",
            path.display()
        ),
    }
}

fn required(value: Option<String>, section: &str, field: &str, path: &Path) -> Result<String> {
    sanitize_optional(value)
        .ok_or_else(|| anyhow::anyhow!("{} missing `[{section}].{field}`", path.display()))
}

fn sanitize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
