use std::time::SystemTime;

use anyhow::Result;
use bpaf::Bpaf;
use cubicle_core::{Bytes, rel_time};
use cubicle_sdk::{Engine, EnvironmentListing};
use serde::Serialize;

use crate::commands::Format;

#[derive(Bpaf, Clone, Debug)]
pub struct Args {
    /// Set output format
    #[bpaf(long("format"), argument("FORMAT"), fallback(Format::Default))]
    format: Format,
}

#[derive(Serialize)]
struct DirJson {
    size: u64,
    mtime_seconds: u64,
}

#[derive(Serialize)]
struct EnvJson {
    home_dir: Option<DirJson>,
    work_dir: Option<DirJson>,
}

pub fn run(args: Args, engine: &Engine) -> Result<()> {
    let mut envs = engine.list_environments()?;
    envs.sort_by(|a, b| a.name.cmp(&b.name));

    if args.format == Format::Names {
        for env in &envs {
            println!("{}", env.name);
        }
        return Ok(());
    }

    if args.format == Format::Json {
        let json: std::collections::BTreeMap<String, EnvJson> = envs
            .iter()
            .map(|env| (env.name.to_string(), to_json(env)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    print_table(&envs);
    Ok(())
}

fn to_json(env: &EnvironmentListing) -> EnvJson {
    EnvJson {
        home_dir: env.home_dir.map(dir_json),
        work_dir: env.work_dir.map(dir_json),
    }
}

fn dir_json(summary: cubicle_core::DirSummary) -> DirJson {
    DirJson {
        size: summary.total_size,
        mtime_seconds: summary
            .last_modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    }
}

fn print_table(envs: &[EnvironmentListing]) {
    let now = SystemTime::now();
    let nw = envs.iter().map(|e| e.name.as_str().len()).max().unwrap_or(0).max(10);

    println!("{:<nw$} | {:^24} | {:^24}", "", "home directory", "work directory", nw = nw);
    println!(
        "{:<nw$} | {:>10} {:>13} | {:>10} {:>13}",
        "name",
        "size",
        "modified",
        "size",
        "modified",
        nw = nw
    );
    println!("{:-<nw$} + {:-<10} {:-<13} + {:-<10} {:-<13}", "", "", "", "", "", nw = nw);

    for env in envs {
        let (home_size, home_mtime) = cell(env.home_dir.as_ref(), now);
        let (work_size, work_mtime) = cell(env.work_dir.as_ref(), now);
        println!(
            "{:<nw$} | {:>10} {:>13} | {:>10} {:>13}",
            env.name,
            home_size,
            home_mtime,
            work_size,
            work_mtime,
            nw = nw
        );
    }
}

fn cell(summary: Option<&cubicle_core::DirSummary>, now: SystemTime) -> (String, String) {
    match summary {
        Some(summary) => {
            let mut size = Bytes(summary.total_size).to_string();
            if summary.errors {
                size.push('+');
            }
            let age = now.duration_since(summary.last_modified).ok();
            (size, rel_time(age))
        }
        None => (String::from("N/A"), String::from("N/A")),
    }
}
