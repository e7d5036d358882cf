use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use config as cfg;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::VolumeStatus;

const DEFAULT_CINDER_CONF: &str = "/etc/cinder/cinder.conf";
const DEFAULT_MOUNT_FILTER: &str = "cinder";
const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_DOMAIN: &str = "Default";
const DEFAULT_VALID_STATUSES: [VolumeStatus; 3] = [
    VolumeStatus::Available,
    VolumeStatus::InUse,
    VolumeStatus::Error,
];

#[derive(Debug, Clone)]
pub struct Config {
    pub migrate: Migrate,
    pub src: Cloud,
    pub dst: Cloud,
}

#[derive(Debug, Clone)]
pub struct Migrate {
    pub ssh_connection_attempts: u32,
    pub retry_delay: Duration,
    pub mount_filter: Regex,
    pub mount_filter_src: String,
    pub resync_existing: bool,
    pub valid_statuses: Vec<VolumeStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Src,
    Dst,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Src => f.write_str("src"),
            Position::Dst => f.write_str("dst"),
        }
    }
}

/// Everything needed to reach one cloud's storage service.
#[derive(Debug, Clone)]
pub struct Cloud {
    pub position: Position,
    /// Host running the volume service; NFS shares are mounted here.
    pub endpoint_host: String,
    pub ssh: Ssh,
    pub cinder_conf: String,
    pub dump: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub auth: Option<Auth>,
}

#[derive(Debug, Clone)]
pub struct Ssh {
    pub user: String,
    pub gateway: Option<String>,
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Auth {
    pub auth_url: String,
    pub username: String,
    pub password: Option<String>,
    pub project: String,
    /// Keystone v3 domains of the user and of the project.
    pub user_domain: String,
    pub project_domain: String,
}

impl Cloud {
    pub fn auth(&self) -> Result<&Auth> {
        self.auth
            .as_ref()
            .ok_or_else(|| anyhow!("[{}.auth] is not configured", self.position))
    }

    pub fn dump_path(&self) -> Result<&Path> {
        self.dump
            .as_deref()
            .ok_or_else(|| anyhow!("[{}] dump is not configured", self.position))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let raw: RawConfig = cfg::Config::builder()
            .add_source(cfg::File::from(path))
            .build()
            .with_context(|| format!("load {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("deserialize {}", path.display()))?;

        let n = config_helpers::Normalizer { base_dir };

        let migrate = Self::build_migrate(&n, raw.migrate)?;
        let src = Self::build_cloud(&n, Position::Src, raw.src)?;
        let dst = Self::build_cloud(&n, Position::Dst, raw.dst)?;

        if src.dump.is_none() {
            bail!("[src] dump must point to the source database dump");
        }
        if dst.dump.is_none() {
            bail!("[dst] dump must point to the destination database dump");
        }
        if dst.output.is_none() {
            bail!("[dst] output must be set");
        }
        if dst.auth.is_none() {
            bail!("[dst.auth] is required to list destination volume services");
        }

        Ok(Self { migrate, src, dst })
    }

    fn build_migrate(n: &config_helpers::Normalizer<'_>, raw: RawMigrate) -> Result<Migrate> {
        let attempts = raw.ssh_connection_attempts.unwrap_or(DEFAULT_ATTEMPTS);
        if attempts == 0 {
            bail!("[migrate] ssh_connection_attempts must be at least 1");
        }

        let mount_filter_src =
            n.trim_opt(raw.mount_filter).unwrap_or_else(|| DEFAULT_MOUNT_FILTER.to_string());
        let mount_filter = Regex::new(&mount_filter_src)
            .with_context(|| format!("bad migrate.mount_filter: {mount_filter_src}"))?;

        let valid_statuses = match raw.valid_statuses {
            Some(list) => {
                let mut out = Vec::new();
                for s in n.dedup(list) {
                    let st = VolumeStatus::parse(&s)
                        .ok_or_else(|| anyhow!("[migrate] unknown volume status '{s}'"))?;
                    out.push(st);
                }
                if out.is_empty() {
                    bail!("[migrate] valid_statuses must not be empty");
                }
                out
            }
            None => DEFAULT_VALID_STATUSES.to_vec(),
        };

        Ok(Migrate {
            ssh_connection_attempts: attempts,
            retry_delay: Duration::from_secs(
                raw.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            ),
            mount_filter,
            mount_filter_src,
            resync_existing: raw.resync_existing.unwrap_or(false),
            valid_statuses,
        })
    }

    fn build_cloud(
        n: &config_helpers::Normalizer<'_>,
        position: Position,
        raw: RawCloud,
    ) -> Result<Cloud> {
        let endpoint_host = n
            .trim_opt(raw.endpoint_host)
            .ok_or_else(|| anyhow!("[{position}] endpoint_host must not be empty"))?;
        let user = n
            .trim_opt(raw.ssh_user)
            .ok_or_else(|| anyhow!("[{position}] ssh_user must not be empty"))?;

        let auth = match raw.auth {
            Some(a) => {
                let auth_url = n
                    .trim_opt(a.auth_url)
                    .ok_or_else(|| anyhow!("[{position}.auth] auth_url must not be empty"))?;
                let username = n
                    .trim_opt(a.username)
                    .ok_or_else(|| anyhow!("[{position}.auth] username must not be empty"))?;
                let project = n
                    .trim_opt(a.project)
                    .ok_or_else(|| anyhow!("[{position}.auth] project must not be empty"))?;
                let password = match n.trim_opt(a.password_file).map(|s| n.resolve(&s)) {
                    Some(p) => Some(n.read_secret(&p).with_context(|| {
                        format!("read {position} cloud password from {}", p.display())
                    })?),
                    None => None,
                };
                Some(Auth {
                    auth_url,
                    username,
                    password,
                    project,
                    user_domain: n
                        .trim_opt(a.user_domain)
                        .unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
                    project_domain: n
                        .trim_opt(a.project_domain)
                        .unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
                })
            }
            None => None,
        };

        Ok(Cloud {
            position,
            endpoint_host,
            ssh: Ssh {
                user,
                gateway: n.trim_opt(raw.ssh_gateway),
                key: n.trim_opt(raw.ssh_key).map(|s| n.resolve(&s)),
            },
            cinder_conf: n
                .trim_opt(raw.cinder_conf)
                .unwrap_or_else(|| DEFAULT_CINDER_CONF.to_string()),
            dump: n.trim_opt(raw.dump).map(|s| n.resolve(&s)),
            output: n.trim_opt(raw.output).map(|s| n.resolve(&s)),
            auth,
        })
    }

    pub fn to_redacted_toml(&self) -> Result<String> {
        #[derive(Serialize)]
        struct MigrateOut<'a> {
            ssh_connection_attempts: u32,
            retry_delay_secs: u64,
            mount_filter: &'a str,
            resync_existing: bool,
            valid_statuses: Vec<&'a str>,
        }
        #[derive(Serialize)]
        struct AuthOut<'a> {
            auth_url: &'a str,
            username: &'a str,
            password: &'static str,
            project: &'a str,
            user_domain: &'a str,
            project_domain: &'a str,
        }
        #[derive(Serialize)]
        struct CloudOut<'a> {
            endpoint_host: &'a str,
            ssh_user: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            ssh_gateway: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            ssh_key: Option<String>,
            cinder_conf: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            dump: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            output: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            auth: Option<AuthOut<'a>>,
        }
        #[derive(Serialize)]
        struct Out<'a> {
            migrate: MigrateOut<'a>,
            src: CloudOut<'a>,
            dst: CloudOut<'a>,
        }

        fn cloud_out(c: &Cloud) -> CloudOut<'_> {
            CloudOut {
                endpoint_host: &c.endpoint_host,
                ssh_user: &c.ssh.user,
                ssh_gateway: c.ssh.gateway.as_deref(),
                ssh_key: c.ssh.key.as_ref().map(|p| p.display().to_string()),
                cinder_conf: &c.cinder_conf,
                dump: c.dump.as_ref().map(|p| p.display().to_string()),
                output: c.output.as_ref().map(|p| p.display().to_string()),
                auth: c.auth.as_ref().map(|a| AuthOut {
                    auth_url: &a.auth_url,
                    username: &a.username,
                    password: if a.password.is_some() {
                        "<redacted>"
                    } else {
                        "<none>"
                    },
                    project: &a.project,
                    user_domain: &a.user_domain,
                    project_domain: &a.project_domain,
                }),
            }
        }

        let out = Out {
            migrate: MigrateOut {
                ssh_connection_attempts: self.migrate.ssh_connection_attempts,
                retry_delay_secs: self.migrate.retry_delay.as_secs(),
                mount_filter: &self.migrate.mount_filter_src,
                resync_existing: self.migrate.resync_existing,
                valid_statuses: self
                    .migrate
                    .valid_statuses
                    .iter()
                    .map(|s| s.as_str())
                    .collect(),
            },
            src: cloud_out(&self.src),
            dst: cloud_out(&self.dst),
        };
        Ok(toml::to_string_pretty(&out)?)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    migrate: RawMigrate,
    src: RawCloud,
    dst: RawCloud,
}

#[derive(Debug, Deserialize, Default)]
struct RawMigrate {
    ssh_connection_attempts: Option<u32>,
    retry_delay_secs: Option<u64>,
    mount_filter: Option<String>,
    resync_existing: Option<bool>,
    valid_statuses: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawCloud {
    endpoint_host: Option<String>,
    ssh_user: Option<String>,
    ssh_gateway: Option<String>,
    ssh_key: Option<String>,
    cinder_conf: Option<String>,
    dump: Option<String>,
    output: Option<String>,
    #[serde(default)]
    auth: Option<RawAuth>,
}

#[derive(Debug, Deserialize)]
struct RawAuth {
    auth_url: Option<String>,
    username: Option<String>,
    password_file: Option<String>,
    project: Option<String>,
    user_domain: Option<String>,
    project_domain: Option<String>,
}

mod config_helpers {
    use std::{
        collections::HashSet,
        fs,
        path::{Path, PathBuf},
    };

    use anyhow::Result;

    pub(super) struct Normalizer<'a> {
        pub base_dir: &'a Path,
    }

    impl<'a> Normalizer<'a> {
        #[inline]
        pub fn trim_opt(&self, s: Option<String>) -> Option<String> {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        }

        #[inline]
        pub fn resolve(&self, p: &str) -> PathBuf {
            let pb = PathBuf::from(p.trim());
            if pb.is_absolute() {
                pb
            } else {
                self.base_dir.join(pb)
            }
        }

        pub fn read_secret(&self, p: &Path) -> Result<String> {
            let mut s = String::from_utf8(fs::read(p)?)?;
            while s.ends_with('\n') || s.ends_with('\r') {
                s.pop();
            }
            Ok(s)
        }

        pub fn dedup(&self, items: Vec<String>) -> Vec<String> {
            let mut seen = HashSet::new();
            items
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && seen.insert(v.clone()))
                .collect()
        }
    }
}
