use std::collections::BTreeSet;
use std::io;
use std::process::{Command, Stdio};
use std::str::FromStr;

use cubicle_core::HostPath;
use cubicle_core::fs_util::{rmtree, summarize_dir, try_exists, try_iterdir};

use super::{EnvFilesSummary, EnvironmentExists, Runner, RunnerCommand, shell_join};
use crate::error::{Error, Result};
use crate::names::EnvironmentName;
use crate::paths::Paths;

/// The namespace-sandbox runner, built on `bubblewrap` (`bwrap`). Creates a
/// fresh, short-lived Linux namespace per invocation rather than a
/// long-running daemon.
pub struct Bubblewrap {
    home_dirs: HostPath,
    work_dirs: HostPath,
    seccomp_filter: HostPath,
    host_home: HostPath,
    hostname: Option<String>,
    shell: String,
}

impl Bubblewrap {
    pub fn new(paths: &Paths, host_home: HostPath, shell: String) -> Self {
        Self {
            home_dirs: paths.home_dirs.clone(),
            work_dirs: paths.work_dirs.clone(),
            seccomp_filter: paths.seccomp_filter(),
            host_home,
            hostname: nix::unistd::gethostname()
                .ok()
                .and_then(|h| h.into_string().ok()),
            shell,
        }
    }
}

fn get_fd_for_child<F>(file: &F) -> Result<String>
where
    F: rustix::fd::AsFd + std::os::fd::AsRawFd,
{
    // bwrap expects an inherited fd number with CLOEXEC cleared.
    let mut flags = rustix::fs::fcntl_getfd(file).map_err(io::Error::from)?;
    flags.remove(rustix::fs::FdFlags::CLOEXEC);
    rustix::fs::fcntl_setfd(file, flags).map_err(io::Error::from)?;
    Ok(file.as_raw_fd().to_string())
}

fn ro_bind_try(path: &str) -> [&str; 3] {
    ["--ro-bind-try", path, path]
}

impl Runner for Bubblewrap {
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

    fn stop(&self, _name: &EnvironmentName) -> Result<()> {
        // bwrap sandboxes die with their parent shell; nothing to track here.
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
        let host_home = self.home_dirs.join(name);
        rmtree(host_home.as_path())?;
        std::fs::create_dir_all(host_home.as_path())?;
        std::fs::create_dir_all(self.work_dirs.join(name).as_path())?;
        Ok(())
    }

    fn purge(&self, name: &EnvironmentName) -> Result<()> {
        rmtree(self.home_dirs.join(name).as_path())?;
        rmtree(self.work_dirs.join(name).as_path())
    }

    fn run(&self, name: &EnvironmentName, command: &RunnerCommand) -> Result<()> {
        let host_home = self.home_dirs.join(name);
        let host_work = self.work_dirs.join(name);

        let mut seed_child = None;
        if let RunnerCommand::Init { seeds, .. } = command {
            if !seeds.is_empty() {
                tracing::info!("packing seed tarball");
                let mut child = Command::new("pv")
                    .args(["-i", "0.1"])
                    .args(seeds.iter().map(HostPath::as_path))
                    .stdout(Stdio::piped())
                    .spawn()?;
                let stdout = child.stdout.take().expect("piped stdout");
                seed_child = Some((child, stdout));
            }
        }

        let seccomp = std::fs::File::open(self.seccomp_filter.as_path()).ok();

        let mut bwrap = Command::new("bwrap");
        bwrap.env_clear();
        bwrap.env("PATH", format!("{}/bin:/bin:/sbin", self.host_home));
        bwrap.env("HOME", self.host_home.as_path());
        bwrap.env("SANDBOX", name.as_str());
        bwrap.env("TMPDIR", self.host_home.join("tmp").as_path());
        for key in ["DISPLAY", "SHELL", "TERM"] {
            if let Ok(value) = std::env::var(key) {
                bwrap.env(key, value);
            }
        }

        bwrap.arg("--die-with-parent");
        bwrap.arg("--unshare-cgroup");
        bwrap.arg("--unshare-ipc");
        bwrap.arg("--unshare-pid");
        bwrap.arg("--unshare-uts");
        bwrap.arg("--hostname");
        match &self.hostname {
            Some(hostname) => {
                bwrap.arg(format!("{name}.{hostname}"));
            }
            None => {
                bwrap.arg(name.as_str());
            }
        }
        bwrap.args(["--symlink", "/usr/bin", "/bin"]);
        bwrap.args(["--dev", "/dev"]);

        if let RunnerCommand::Init { script, .. } = command {
            bwrap
                .arg("--ro-bind-try")
                .arg(script.as_path())
                .arg("/dev/shm/init.sh");
        }
        if let Some((_, stdout)) = &seed_child {
            bwrap
                .arg("--file")
                .arg(get_fd_for_child(stdout)?)
                .arg("/dev/shm/seed.tar");
        }
        bwrap.args(ro_bind_try("/etc"));
        bwrap.arg("--bind").arg(host_home.as_path()).arg(self.host_home.as_path());
        bwrap
            .arg("--dir")
            .arg(self.host_home.join(".dev-init").as_path());
        bwrap.arg("--dir").arg(self.host_home.join("bin").as_path());
        bwrap.arg("--dir").arg(self.host_home.join("opt").as_path());
        bwrap.arg("--dir").arg(self.host_home.join("tmp").as_path());
        bwrap
            .arg("--bind")
            .arg(host_work.as_path())
            .arg(self.host_home.join(name.as_str()).as_path());
        bwrap.args(["--symlink", "/usr/lib", "/lib"]);
        bwrap.args(["--symlink", "/usr/lib64", "/lib64"]);
        bwrap.args(ro_bind_try("/opt"));
        bwrap.args(["--proc", "/proc"]);
        bwrap.args(["--symlink", "/usr/sbin", "/sbin"]);
        bwrap.args(["--tmpfs", "/tmp"]);
        bwrap.args(ro_bind_try("/usr"));
        bwrap.args(ro_bind_try("/var/lib/apt/lists"));
        bwrap.args(ro_bind_try("/var/lib/dpkg"));
        if let Some(seccomp) = &seccomp {
            bwrap.arg("--seccomp").arg(get_fd_for_child(seccomp)?);
        }
        bwrap
            .arg("--chdir")
            .arg(self.host_home.join(name.as_str()).as_path());
        bwrap.arg("--");
        bwrap.arg(&self.shell);
        bwrap.arg("-l");
        match command {
            RunnerCommand::Interactive => {}
            RunnerCommand::Init { .. } => {
                bwrap.arg("-c").arg("/dev/shm/init.sh");
            }
            RunnerCommand::Exec(args) => {
                bwrap.arg("-c").arg(shell_join(args));
            }
        }

        let status = bwrap.status()?;

        if let Some((mut child, stdout)) = seed_child {
            drop(stdout); // lets `pv`/`tar` observe SIGPIPE once bwrap exits
            let _ = child.wait();
        }

        if !status.success() {
            return Err(Error::ChildFailed("bwrap", status));
        }
        Ok(())
    }
}
