use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    config::Cloud,
    utils::process::{CmdSpec, EnvValue, Runner},
};

pub const REQ_BINS: &[&str] = &["openstack"];

pub const VOLUME_BINARY: &str = "cinder-volume";

#[derive(Debug, Deserialize)]
struct RawService {
    #[serde(rename = "Binary")]
    binary: String,
    #[serde(rename = "Host")]
    host: String,
    #[serde(rename = "Status", default)]
    status: Option<String>,
    #[serde(rename = "State", default)]
    state: Option<String>,
}

impl RawService {
    fn is_active(&self) -> bool {
        let enabled = self.status.as_deref().is_none_or(|s| s == "enabled");
        let up = self.state.as_deref().is_none_or(|s| s == "up");
        enabled && up
    }
}

pub trait ServicePort: Send + Sync {
    /// Hosts of enabled, running services of `binary`, in listing order.
    fn active_hosts(&self, cloud: &Cloud, binary: &str) -> Result<Vec<String>>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct OpenstackCli {
    runner: Arc<DynRunner>,
}

impl OpenstackCli {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }

    fn openstack(&self, cloud: &Cloud) -> Result<CmdSpec> {
        let auth = cloud.auth()?;
        let mut cmd = CmdSpec::new("openstack")
            .env("OS_AUTH_URL", EnvValue::Plain(auth.auth_url.clone()))
            .env("OS_USERNAME", EnvValue::Plain(auth.username.clone()))
            .env("OS_PROJECT_NAME", EnvValue::Plain(auth.project.clone()))
            .env("OS_USER_DOMAIN_NAME", EnvValue::Plain(auth.user_domain.clone()))
            .env(
                "OS_PROJECT_DOMAIN_NAME",
                EnvValue::Plain(auth.project_domain.clone()),
            );
        if let Some(ref pw) = auth.password {
            cmd = cmd.env("OS_PASSWORD", EnvValue::Secret(pw.clone()));
        }
        Ok(cmd)
    }
}

fn parse_hosts(raw: &str, binary: &str) -> Result<Vec<String>> {
    let services: Vec<RawService> =
        serde_json::from_str(raw).context("parse volume service list json")?;
    let mut hosts: Vec<String> = Vec::new();
    for s in services {
        if s.binary == binary && s.is_active() && !hosts.contains(&s.host) {
            hosts.push(s.host);
        }
    }
    Ok(hosts)
}

impl ServicePort for OpenstackCli {
    fn active_hosts(&self, cloud: &Cloud, binary: &str) -> Result<Vec<String>> {
        let cmd = self
            .openstack(cloud)?
            .args(["volume", "service", "list", "--service", binary, "-f", "json"]);
        let out = self
            .runner
            .run_capture(&cmd)
            .with_context(|| format!("list {binary} services on {} cloud", cloud.position))?;
        parse_hosts(&out, binary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{Auth, Position, Ssh};

    struct RecordingRunner {
        out: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl Runner for RecordingRunner {
        fn run_capture(&self, cmd: &CmdSpec) -> Result<String> {
            self.seen.lock().unwrap().push(cmd.render());
            Ok(self.out.to_string())
        }
    }

    fn cloud() -> Cloud {
        Cloud {
            position: Position::Dst,
            endpoint_host: "dst_cinder".into(),
            ssh: Ssh {
                user: "root".into(),
                gateway: None,
                key: None,
            },
            cinder_conf: "/etc/cinder/cinder.conf".into(),
            dump: None,
            output: None,
            auth: Some(Auth {
                auth_url: "http://keystone:5000/v3".into(),
                username: "admin".into(),
                password: Some("sekret".into()),
                project: "admin".into(),
                user_domain: "Default".into(),
                project_domain: "ops".into(),
            }),
        }
    }

    #[test]
    fn service_listing_carries_v3_domains() {
        let runner = Arc::new(RecordingRunner {
            out: r#"[{"Binary": "cinder-volume", "Host": "dst_cinder@nfs1", "Status": "enabled", "State": "up"}]"#,
            seen: Mutex::new(Vec::new()),
        });
        let cli = OpenstackCli::new(runner.clone());
        let hosts = cli.active_hosts(&cloud(), VOLUME_BINARY).unwrap();
        assert_eq!(hosts, vec!["dst_cinder@nfs1"]);

        let seen = runner.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            "OS_AUTH_URL=http://keystone:5000/v3 OS_USERNAME=admin OS_PROJECT_NAME=admin \
             OS_USER_DOMAIN_NAME=Default OS_PROJECT_DOMAIN_NAME=ops OS_PASSWORD=<redacted> \
             openstack volume service list --service cinder-volume -f json"
        );
    }

    #[test]
    fn keeps_only_active_hosts_in_order() {
        let raw = r#"[
            {"Binary": "cinder-volume", "Host": "dst_cinder", "Zone": "nova", "Status": "enabled", "State": "up"},
            {"Binary": "cinder-scheduler", "Host": "dst_cinder", "Zone": "nova", "Status": "enabled", "State": "up"},
            {"Binary": "cinder-volume", "Host": "dst_cinder@nfs1", "Zone": "nova", "Status": "enabled", "State": "up"},
            {"Binary": "cinder-volume", "Host": "dst_cinder@nfs2", "Zone": "nova", "Status": "disabled", "State": "up"},
            {"Binary": "cinder-volume", "Host": "dst_cinder@nfs3", "Zone": "nova", "Status": "enabled", "State": "down"}
        ]"#;
        let hosts = parse_hosts(raw, VOLUME_BINARY).unwrap();
        assert_eq!(hosts, vec!["dst_cinder", "dst_cinder@nfs1"]);
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(parse_hosts("not json", VOLUME_BINARY).is_err());
    }
}
