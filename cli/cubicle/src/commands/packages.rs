use std::time::SystemTime;

use anyhow::Result;
use bpaf::Bpaf;
use cubicle_core::{Bytes, rel_time};
use cubicle_sdk::{Engine, PackageListing};
use serde::Serialize;

use crate::commands::Format;

#[derive(Bpaf, Clone, Debug)]
pub struct Args {
    /// Set output format
    #[bpaf(long("format"), argument("FORMAT"), fallback(Format::Default))]
    format: Format,
}

#[derive(Serialize)]
struct PackageJson {
    origin: String,
    dir: String,
    depends: Vec<String>,
    build_depends: Vec<String>,
    edited_seconds: u64,
    built_seconds: u64,
    size: Option<u64>,
}

pub fn run(args: Args, engine: &Engine) -> Result<()> {
    let mut packages = engine.list_packages()?;
    packages.sort_by(|a, b| a.name.cmp(&b.name));

    if args.format == Format::Names {
        for package in &packages {
            println!("{}", package.name);
        }
        return Ok(());
    }

    if args.format == Format::Json {
        let json: std::collections::BTreeMap<String, PackageJson> =
            packages.iter().map(|p| (p.name.to_string(), to_json(p))).collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    print_table(&packages);
    Ok(())
}

fn to_json(package: &PackageListing) -> PackageJson {
    PackageJson {
        origin: package.origin.clone(),
        dir: package.dir.as_path().display().to_string(),
        depends: package.depends.iter().map(|d| d.to_string()).collect(),
        build_depends: package.build_depends.iter().map(|d| d.to_string()).collect(),
        edited_seconds: to_secs(package.edited),
        built_seconds: to_secs(package.built),
        size: package.size,
    }
}

fn to_secs(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn print_table(packages: &[PackageListing]) {
    let now = SystemTime::now();
    let nw = packages.iter().map(|p| p.name.as_str().len()).max().unwrap_or(0).max(10);

    println!(
        "{:<nw$}  {:<8}  {:>10}  {:>13}  {:>13}",
        "name",
        "origin",
        "size",
        "built",
        "edited",
        nw = nw
    );
    println!("{:-<nw$}  {:-<8}  {:-<10}  {:-<13}  {:-<13}", "", "", "", "", "", nw = nw);

    for package in packages {
        let size = match package.size {
            Some(bytes) => Bytes(bytes).to_string(),
            None => String::from("N/A"),
        };
        let built = rel_time(now.duration_since(package.built).ok());
        let edited = rel_time(now.duration_since(package.edited).ok());
        println!(
            "{:<nw$}  {:<8}  {:>10}  {:>13}  {:>13}",
            package.name, package.origin, size, built, edited,
            nw = nw
        );
    }
}
