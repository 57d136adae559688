//! Containerlab helpers

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

static LAB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A deployed lab, destroyed on drop
pub struct Lab {
    name: String,
    topology: PathBuf,
}

impl Lab {
    /// Deploy `topology` under a name unique to this test process. Each lab
    /// gets its own management network so tests can run side by side.
    pub fn deploy(topology: impl AsRef<Path>) -> Result<Self, String> {
        let topology = topology.as_ref();
        let dir = topology.parent().ok_or("topology has no parent directory")?;
        let content = std::fs::read_to_string(topology).map_err(|e| format!("read error: {e}"))?;

        let base = content
            .lines()
            .find_map(|l| l.strip_prefix("name:"))
            .map(str::trim)
            .ok_or("topology has no name")?;

        let seq = LAB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let suffix = format!("{}-{}", std::process::id(), seq);
        let name = format!("{base}-{suffix}");

        let lab_file = dir.join(format!(".lab-{suffix}.yml"));
        let with_mgmt = format!(
            "{}\nmgmt:\n  network: clab-{suffix}\n  ipv4-subnet: 172.101.{}.0/24\n",
            content.trim_end(),
            seq % 200
        );
        std::fs::write(&lab_file, with_mgmt).map_err(|e| format!("write error: {e}"))?;

        let lab = Self {
            name,
            topology: lab_file,
        };
        let output = lab.clab("deploy", &["--reconfigure"])?;
        if !output.status.success() {
            return Err(format!(
                "containerlab deploy failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(lab)
    }

    fn clab(&self, action: &str, extra: &[&str]) -> Result<Output, String> {
        let topology = self.topology.to_str().ok_or("topology path is not UTF-8")?;
        Command::new("sudo")
            .args(["containerlab", action, "-t", topology, "--name", &self.name])
            .args(extra)
            .output()
            .map_err(|e| format!("failed to run containerlab: {e}"))
    }

    pub fn exec(&self, node: &str, cmd: &str) -> Output {
        Command::new("docker")
            .args(["exec", &format!("clab-{}-{}", self.name, node), "sh", "-c", cmd])
            .output()
            .expect("docker exec failed")
    }

    pub fn ping(&self, from: &str, target: &str, count: u32) -> bool {
        self.exec(from, &format!("ping -c {count} -W 2 {target}"))
            .status
            .success()
    }

    /// Output of a single ping, successful or not
    pub fn ping_output(&self, from: &str, target: &str, ttl: Option<u8>) -> String {
        let ttl = ttl.map(|t| format!("-t {t} ")).unwrap_or_default();
        let output = self.exec(from, &format!("ping -c 1 -W 2 {ttl}{target}"));
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Ping until it succeeds or `limit` passes
    pub fn wait_for_ping(&self, from: &str, target: &str, limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if self.ping(from, target, 1) {
                return true;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
        false
    }

    /// Start the router daemon on `node` and report whether it stayed up
    pub fn start_router(&self, node: &str) -> bool {
        self.exec(
            node,
            "nohup /usr/local/bin/ripster run -c /etc/ripster/router.toml > /tmp/ripster.log 2>&1 &",
        );
        std::thread::sleep(Duration::from_secs(2));
        self.exec(node, "pgrep -f 'ripster run'").status.success()
    }

    pub fn stop_router(&self, node: &str) {
        self.exec(node, "pkill -f 'ripster run' || true");
    }

    pub fn router_log(&self, node: &str) -> String {
        String::from_utf8_lossy(&self.exec(node, "cat /tmp/ripster.log").stdout).into_owned()
    }
}

impl Drop for Lab {
    fn drop(&mut self) {
        let _ = self.clab("destroy", &["--cleanup"]);
        let _ = std::fs::remove_file(&self.topology);
    }
}
