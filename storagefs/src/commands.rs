//! Operator commands over the adapter.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::DateTime;
use tracing::info;

use storagefs_vfs::{PseudoStat, StorageFs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ls { path: String, long: bool },
    Stat { path: String },
    Cat { path: String },
    Put { local: PathBuf, path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    Rm { path: String },
    Mv { src: String, dst: String },
    Migrate { delete: bool },
}

#[derive(Debug, PartialEq, Eq)]
pub struct Invocation {
    pub config: Option<PathBuf>,
    pub command: Command,
}

pub const USAGE: &str = "\
usage: storagefs [--config PATH] <command> [args]

commands:
  ls [-l] [PATH]       list a directory
  stat PATH            show the stat record of a path
  cat PATH             write a file to stdout
  put LOCAL PATH       upload a local file
  mkdir PATH           create a directory
  rmdir PATH           remove a directory
  rm PATH              remove a file
  mv SRC DST           rename a file
  migrate [--delete]   upload local media files missing from storage";

/// Parse arguments (without the program name).
pub fn parse_args(args: &[String]) -> anyhow::Result<Invocation> {
    let mut config = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            _ => rest.push(arg.as_str()),
        }
    }

    let Some((name, operands)) = rest.split_first() else {
        bail!("missing command");
    };
    let command = match (*name, operands) {
        ("ls", ["-l"]) => Command::Ls { path: "/".to_string(), long: true },
        ("ls", ["-l", path]) => Command::Ls { path: path.to_string(), long: true },
        ("ls", []) => Command::Ls { path: "/".to_string(), long: false },
        ("ls", [path]) => Command::Ls { path: path.to_string(), long: false },
        ("stat", [path]) => Command::Stat { path: path.to_string() },
        ("cat", [path]) => Command::Cat { path: path.to_string() },
        ("put", [local, path]) => Command::Put {
            local: PathBuf::from(local),
            path: path.to_string(),
        },
        ("mkdir", [path]) => Command::Mkdir { path: path.to_string() },
        ("rmdir", [path]) => Command::Rmdir { path: path.to_string() },
        ("rm", [path]) => Command::Rm { path: path.to_string() },
        ("mv", [src, dst]) => Command::Mv {
            src: src.to_string(),
            dst: dst.to_string(),
        },
        ("migrate", []) => Command::Migrate { delete: false },
        ("migrate", ["--delete"]) => Command::Migrate { delete: true },
        (name, _) => bail!("unknown command or wrong arguments: {}", name),
    };
    Ok(Invocation { config, command })
}

/// Run a filesystem command, writing any output to `out`.
pub async fn run<W: Write>(fs: &StorageFs, command: Command, out: &mut W) -> anyhow::Result<()> {
    match command {
        Command::Ls { path, long } => {
            if long {
                for (name, st) in fs.list_directory_info(&path).await? {
                    writeln!(out, "{}", format_long(fs, &name, &st))?;
                }
            } else {
                for name in fs.listdir(&path).await? {
                    writeln!(out, "{}", name)?;
                }
            }
        }
        Command::Stat { path } => {
            let st = fs.stat(&path).await?;
            writeln!(out, "  Path: {}", fs.realpath(&path))?;
            writeln!(out, "  Type: {}", if st.is_dir() { "directory" } else { "regular file" })?;
            writeln!(out, "  Size: {}", st.size)?;
            writeln!(out, "  Mode: {:o} ({})", st.mode, st.permissions())?;
            writeln!(out, " Owner: {}/{}", fs.owner_name(st.uid), fs.group_name(st.gid))?;
            writeln!(out, "Modify: {}", format_mtime(st.mtime))?;
        }
        Command::Cat { path } => {
            let mut file = fs.open(&path, "rb").await?;
            std::io::copy(&mut file, out)?;
            file.close().await?;
        }
        Command::Put { local, path } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let target = upload_target(fs, &local, &path).await;
            let mut file = fs.open(&target, "wb").await?;
            file.write_all(&data)?;
            file.close().await?;
            info!(path = %fs.realpath(&target), bytes = data.len(), "Uploaded");
        }
        Command::Mkdir { path } => fs.mkdir(&path).await?,
        Command::Rmdir { path } => fs.rmdir(&path).await?,
        Command::Rm { path } => fs.remove(&path).await?,
        Command::Mv { src, dst } => fs.rename(&src, &dst).await?,
        Command::Migrate { .. } => bail!("migrate does not run through the adapter"),
    }
    Ok(())
}

/// Uploading onto a directory keeps the local file name.
async fn upload_target(fs: &StorageFs, local: &Path, path: &str) -> String {
    let into_dir = path.ends_with('/') || fs.is_dir(path).await;
    match local.file_name() {
        Some(name) if into_dir => format!(
            "{}/{}",
            fs.realpath(path).trim_end_matches('/'),
            name.to_string_lossy()
        ),
        _ => path.to_string(),
    }
}

fn format_long(fs: &StorageFs, name: &str, st: &PseudoStat) -> String {
    format!(
        "{} {:>3} {:<8} {:<8} {:>12} {} {}",
        st.permissions(),
        st.nlink,
        fs.owner_name(st.uid),
        fs.group_name(st.gid),
        st.size,
        format_mtime(st.mtime),
        name
    )
}

fn format_mtime(mtime: i64) -> String {
    DateTime::from_timestamp(mtime, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use storagefs_backends::MemoryStorage;
    use storagefs_common::config::FsOptions;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn memory_fs() -> StorageFs {
        StorageFs::new(Arc::new(MemoryStorage::new()), FsOptions::new("/srv/media"))
    }

    #[test]
    fn test_parse_commands() {
        let inv = parse_args(&args(&["--config", "/etc/storagefs.toml", "ls", "-l", "/exports"])).unwrap();
        assert_eq!(inv.config, Some(PathBuf::from("/etc/storagefs.toml")));
        assert_eq!(inv.command, Command::Ls { path: "/exports".to_string(), long: true });

        let inv = parse_args(&args(&["ls"])).unwrap();
        assert_eq!(inv.config, None);
        assert_eq!(inv.command, Command::Ls { path: "/".to_string(), long: false });

        let inv = parse_args(&args(&["mv", "a.txt", "b.txt"])).unwrap();
        assert_eq!(inv.command, Command::Mv { src: "a.txt".to_string(), dst: "b.txt".to_string() });

        let inv = parse_args(&args(&["migrate", "--delete"])).unwrap();
        assert_eq!(inv.command, Command::Migrate { delete: true });
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["stat"])).is_err());
        assert!(parse_args(&args(&["chmod", "777", "/a"])).is_err());
    }

    #[tokio::test]
    async fn test_put_ls_cat_rm() {
        let fs = memory_fs();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.csv");
        std::fs::write(&local, "a,b\n1,2\n").unwrap();

        let mut out = Vec::new();
        run(&fs, Command::Mkdir { path: "/exports".to_string() }, &mut out).await.unwrap();
        run(&fs, Command::Put { local: local.clone(), path: "/exports/".to_string() }, &mut out)
            .await
            .unwrap();
        assert!(out.is_empty());

        run(&fs, Command::Ls { path: "/exports".to_string(), long: false }, &mut out)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out.clone()).unwrap(), "report.csv\n");

        out.clear();
        run(&fs, Command::Ls { path: "/exports".to_string(), long: true }, &mut out)
            .await
            .unwrap();
        let line = String::from_utf8(out.clone()).unwrap();
        assert!(line.starts_with("-rwxrwx---"));
        assert!(line.contains(" owner "));
        assert!(line.trim_end().ends_with("report.csv"));

        out.clear();
        run(&fs, Command::Cat { path: "/exports/report.csv".to_string() }, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"a,b\n1,2\n");

        run(&fs, Command::Rm { path: "/exports/report.csv".to_string() }, &mut out)
            .await
            .unwrap();
        let err = run(&fs, Command::Stat { path: "/exports/report.csv".to_string() }, &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No such file or directory"));
    }

    #[tokio::test]
    async fn test_stat_output() {
        let fs = memory_fs();
        let mut out = Vec::new();
        run(&fs, Command::Mkdir { path: "/exports".to_string() }, &mut out).await.unwrap();
        run(&fs, Command::Stat { path: "/exports".to_string() }, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Type: directory"));
        assert!(text.contains("Mode: 40770 (drwxrwx---)"));
        assert!(text.contains("Owner: owner/group"));
    }

    #[test]
    fn test_format_mtime() {
        assert_eq!(format_mtime(0), "1970-01-01 00:00");
        assert_eq!(format_mtime(1706781600), "2024-02-01 10:00");
    }
}
