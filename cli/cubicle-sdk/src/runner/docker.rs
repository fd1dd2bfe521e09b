use std::collections::BTreeSet;
use std::io;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use cubicle_core::HostPath;
use cubicle_core::fs_util::{rmtree, summarize_dir, try_exists, try_iterdir};

use super::{EnvFilesSummary, EnvironmentExists, Runner, RunnerCommand, shell_join};
use crate::error::{Error, Result};
use crate::names::EnvironmentName;
use crate::paths::Paths;

const BASE_IMAGE: &str = "cubicle-base";
const BASE_IMAGE_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 12);

/// The container-sandbox runner, built on Docker. Unlike [`Bubblewrap`],
/// each environment backs a long-lived detached container (`docker run
/// --detach ... sleep 90d`) that's reused across `enter`/`exec` calls and
/// only torn down by `purge`/`reset`.
///
/// [`Bubblewrap`]: super::bubblewrap::Bubblewrap
pub struct Docker {
    home_dirs: HostPath,
    work_dirs: HostPath,
    dockerfile_template: HostPath,
    seccomp_json: HostPath,
    host_home: HostPath,
    user: String,
}

impl Docker {
    pub fn new(paths: &Paths, host_home: HostPath, user: String) -> Self {
        Self {
            home_dirs: paths.home_dirs.clone(),
            work_dirs: paths.work_dirs.clone(),
            dockerfile_template: paths.dockerfile_template(),
            seccomp_json: paths.script_dir.join("seccomp.json"),
            host_home,
            user,
        }
    }

    fn is_running(&self, name: &EnvironmentName) -> Result<bool> {
        let status = Command::new("docker")
            .args(["inspect", "--type", "container", name.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }

    fn base_image_tagged_at(&self) -> SystemTime {
        let output = match Command::new("docker")
            .args([
                "inspect",
                "--type",
                "image",
                "--format",
                "{{ $.Metadata.LastTagTime.Unix }}",
                BASE_IMAGE,
            ])
            .output()
        {
            Ok(output) if output.status.success() => output,
            _ => return SystemTime::UNIX_EPOCH,
        };
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<u64>()
            .ok()
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Rebuilds `cubicle-base` if it's missing, stale (older than the
    /// template on disk), or simply over twelve hours old.
    fn build_base(&self) -> Result<()> {
        let tagged_at = self.base_image_tagged_at();
        let template_mtime = std::fs::metadata(self.dockerfile_template.as_path())
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::now());
        let fresh = tagged_at
            .elapsed()
            .map(|age| age < BASE_IMAGE_MAX_AGE)
            .unwrap_or(false)
            && template_mtime < tagged_at;
        if fresh {
            return Ok(());
        }

        let timezone = std::fs::read_to_string("/etc/timezone").unwrap_or_default();
        let template = std::fs::read_to_string(self.dockerfile_template.as_path())?;
        let dockerfile = template
            .replace("@@TIMEZONE@@", timezone.trim())
            .replace("@@USER@@", &self.user);

        let mut child = Command::new("docker")
            .args(["build", "--tag", BASE_IMAGE, "-"])
            .stdin(Stdio::piped())
            .spawn()?;
        {
            use io::Write;
            child
                .stdin
                .take()
                .expect("piped stdin")
                .write_all(dockerfile.as_bytes())?;
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(Error::ChildFailed("docker build", status));
        }
        Ok(())
    }

    fn spawn(&self, name: &EnvironmentName, host_home: &HostPath, host_work: &HostPath) -> Result<()> {
        let mut command = Command::new("docker");
        command.args(["run", "--detach"]);
        command.arg("--env").arg(format!("SANDBOX={name}"));
        command.arg("--hostname").arg(format!("{name}.{}", nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default()));
        command.arg("--init");
        command.arg("--name").arg(name.as_str());
        command.arg("--rm");
        if try_exists(self.seccomp_json.as_path())? {
            command
                .arg("--security-opt")
                .arg(format!("seccomp={}", self.seccomp_json));
        }
        // The default /dev/shm (64 MiB) is too small for Chromium/Electron guests.
        command.arg("--shm-size").arg("1000000000");
        command.arg("--user").arg(&self.user);
        command.arg("--volume").arg("/tmp/.X11-unix:/tmp/.X11-unix:ro");
        command
            .arg("--volume")
            .arg(format!("{host_home}:{}", self.host_home));
        command
            .arg("--volume")
            .arg(format!("{host_work}:{}", self.host_home.join(name.as_str())));
        command.arg("--workdir").arg(self.host_home.join(name.as_str()).as_path());
        command.arg(BASE_IMAGE);
        command.args(["sleep", "90d"]);

        let status = command.stdout(Stdio::null()).status()?;
        if !status.success() {
            return Err(Error::ChildFailed("docker run", status));
        }
        Ok(())
    }
}

impl Runner for Docker {
    fn create(&self, name: &EnvironmentName) -> Result<()> {
        std::fs::create_dir_all(self.home_dirs.join(name).as_path())?;
        std::fs::create_dir_all(self.work_dirs.join(name).as_path())?;
        Ok(())
    }

    fn exists(&self, name: &EnvironmentName) -> Result<EnvironmentExists> {
        let has_home = try_exists(self.home_dirs.join(name).as_path())?;
        let has_work = try_exists(self.work_dirs.join(name).as_path())?;
        Ok(if has_home && has_work {
            EnvironmentExists::FullyExists
        } else if has_home || has_work {
            EnvironmentExists::PartiallyExists
        } else {
            EnvironmentExists::NoEnvironment
        })
    }

    fn stop(&self, name: &EnvironmentName) -> Result<()> {
        if self.is_running(name)? {
            let status = Command::new("docker")
                .args(["kill", name.as_str()])
                .stdout(Stdio::null())
                .status()?;
            if !status.success() {
                return Err(Error::ChildFailed("docker kill", status));
            }
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<EnvironmentName>> {
        let mut envs = BTreeSet::new();
        for path in try_iterdir(self.home_dirs.as_path())? {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                envs.insert(EnvironmentName::from_str(name)?);
            }
        }
        for path in try_iterdir(self.work_dirs.as_path())? {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                envs.insert(EnvironmentName::from_str(name)?);
            }
        }
        Ok(envs.into_iter().collect())
    }

    fn files_summary(&self, name: &EnvironmentName) -> Result<EnvFilesSummary> {
        let home_dir = self.home_dirs.join(name);
        let home_exists = try_exists(home_dir.as_path())?;
        let home_summary = if home_exists {
            summarize_dir(home_dir.as_path())?
        } else {
            cubicle_core::DirSummary::new_with_errors()
        };

        let work_dir = self.work_dirs.join(name);
        let work_exists = try_exists(work_dir.as_path())?;
        let work_summary = if work_exists {
            summarize_dir(work_dir.as_path())?
        } else {
            cubicle_core::DirSummary::new_with_errors()
        };

        Ok(EnvFilesSummary {
            home_dir_path: home_exists.then_some(home_dir),
            home_dir: home_summary,
            work_dir_path: work_exists.then_some(work_dir),
            work_dir: work_summary,
        })
    }

    fn reset(&self, name: &EnvironmentName) -> Result<()> {
        self.stop(name)?;
        let host_home = self.home_dirs.join(name);
        rmtree(host_home.as_path())?;
        std::fs::create_dir_all(host_home.as_path())?;
        std::fs::create_dir_all(self.work_dirs.join(name).as_path())?;
        Ok(())
    }

    fn purge(&self, name: &EnvironmentName) -> Result<()> {
        self.stop(name)?;
        rmtree(self.home_dirs.join(name).as_path())?;
        rmtree(self.work_dirs.join(name).as_path())
    }

    fn run(&self, name: &EnvironmentName, command: &RunnerCommand) -> Result<()> {
        let host_home = self.home_dirs.join(name);
        let host_work = self.work_dirs.join(name);

        if !self.is_running(name)? {
            self.build_base()?;
            self.spawn(name, &host_home, &host_work)?;
        }

        if let RunnerCommand::Init { seeds, .. } = command {
            if !seeds.is_empty() {
                tracing::info!("copying/extracting seed tarball");
                let mut total_size = 0u64;
                for seed in seeds {
                    total_size += std::fs::metadata(seed.as_path())?.len();
                }
                let mut cat = Command::new("cat")
                    .args(seeds.iter().map(HostPath::as_path))
                    .stdout(Stdio::piped())
                    .spawn()?;
                let stdout = cat.stdout.take().expect("piped stdout");
                let status = Command::new("docker")
                    .args(["exec", "--interactive", name.as_str(), "sh", "-c"])
                    .arg(format!(
                        "pv --interval 0.1 --force --size {total_size} | tar --ignore-zero --directory ~ --extract"
                    ))
                    .stdin(stdout)
                    .status()?;
                let _ = cat.wait();
                if !status.success() {
                    return Err(Error::ChildFailed("docker exec (seed extract)", status));
                }
            }
        }

        if let RunnerCommand::Init { script, .. } = command {
            let status = Command::new("docker")
                .args(["cp", "--archive"])
                .arg(script.as_path())
                .arg(format!("{name}:/cubicle-init.sh"))
                .status()?;
            if !status.success() {
                return Err(Error::ChildFailed("docker cp", status));
            }
        }

        let mut exec = Command::new("docker");
        exec.args(["exec", "--env", "DISPLAY"]);
        exec.arg("--env").arg(format!(
            "PATH={}/bin:/bin:/sbin:/usr/bin:/usr/sbin",
            self.host_home
        ));
        exec.args(["--env", "SHELL", "--env", "TERM", "--env", "USER"]);
        exec.args(["--interactive", "--tty"]);
        exec.arg(name.as_str());
        exec.arg(std::env::var("SHELL").unwrap_or_else(|_| String::from("/bin/sh")));
        exec.arg("-l");
        match command {
            RunnerCommand::Interactive => {}
            RunnerCommand::Init { .. } => {
                exec.arg("-c").arg("/cubicle-init.sh");
            }
            RunnerCommand::Exec(args) => {
                exec.arg("-c").arg(shell_join(args));
            }
        }
        let status = exec.status()?;
        if !status.success() {
            return Err(Error::ChildFailed("docker exec", status));
        }
        Ok(())
    }
}
