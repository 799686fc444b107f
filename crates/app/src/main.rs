//! tetherfs CLI
//!
//! Composes a backend stack from command-line arguments and either
//! exposes a local media file to one remote peer (`serve`) or runs
//! filesystem operations against a mounted backend. Every operation
//! goes through the mount front-end, so failures surface as the same
//! errno a kernel mount would report.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::archive::{ArchiveFs, ArchiveOptions, FileIndex, MemoryIndex, MetadataIndex, Pipeline};
use common::cache::{CacheFs, WriteCacheConfig};
use common::config::{
    ArchiveSpec, BackendSpec, Config, DriveSource, MetadataSpec, DEFAULT_COMMUNITY,
    DEFAULT_RENDEZVOUS,
};
use common::drive::{serve, Drive, FileDrive, RemoteDrive};
use common::frontend::{current_gid, current_uid, MountFrontend, MountResult};
use common::session::{ConnectionManager, Role, SessionHandle};
use common::vfs::{DiskFs, Filesystem, MemoryFs, SetAttr};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expose a local media file as a drive to one remote peer
    Serve {
        /// Path to the tape media file
        #[arg(long)]
        media: PathBuf,

        /// Rendezvous address to negotiate the session on
        #[arg(long, default_value = DEFAULT_RENDEZVOUS)]
        rendezvous: String,

        /// Community identifier peers must present
        #[arg(long, default_value = DEFAULT_COMMUNITY)]
        community: String,
    },

    /// List a directory
    Ls {
        #[command(flatten)]
        backend: BackendArgs,
        path: PathBuf,
    },

    /// Show an entry's attributes
    Stat {
        #[command(flatten)]
        backend: BackendArgs,
        path: PathBuf,
    },

    /// Print a file to stdout
    Cat {
        #[command(flatten)]
        backend: BackendArgs,
        path: PathBuf,
    },

    /// Copy a local file into the mount
    Put {
        #[command(flatten)]
        backend: BackendArgs,
        source: PathBuf,
        dest: PathBuf,
    },

    /// Copy a file out of the mount
    Get {
        #[command(flatten)]
        backend: BackendArgs,
        source: PathBuf,
        dest: PathBuf,
    },

    /// Create a directory
    Mkdir {
        #[command(flatten)]
        backend: BackendArgs,
        path: PathBuf,
    },

    /// Remove a file or empty directory
    Rm {
        #[command(flatten)]
        backend: BackendArgs,
        path: PathBuf,
    },

    /// Move an entry
    Mv {
        #[command(flatten)]
        backend: BackendArgs,
        from: PathBuf,
        to: PathBuf,
    },

    /// Change an entry's permission bits
    Chmod {
        #[command(flatten)]
        backend: BackendArgs,
        /// Octal mode, e.g. 644
        mode: String,
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// Backend serving the mount
    #[arg(long, value_enum, default_value_t = Backend::Archive)]
    backend: Backend,

    /// Directory backing the disk backend
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Local media file backing the archive backend
    #[arg(long)]
    media: Option<PathBuf>,

    /// Reach the archive drive through a remote peer instead of a
    /// local media file
    #[arg(long)]
    remote: bool,

    /// Rendezvous address for the remote drive session
    #[arg(long, default_value = DEFAULT_RENDEZVOUS)]
    rendezvous: String,

    /// Community identifier for the remote drive session
    #[arg(long, default_value = DEFAULT_COMMUNITY)]
    community: String,

    /// Session role when reaching a remote drive
    #[arg(long, value_enum, default_value_t = RoleArg::Client)]
    role: RoleArg,

    /// Record size in 512-byte blocks
    #[arg(long, default_value_t = common::archive::DEFAULT_RECORD_BLOCKS)]
    record_blocks: u64,

    /// Persist the metadata index at this path instead of the default
    /// location next to the media file
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Keep the metadata index in memory only; entries are forgotten
    /// when the process exits
    #[arg(long, conflicts_with = "metadata")]
    ephemeral_metadata: bool,

    /// Stage dirty files under this directory instead of in memory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Owner uid reported for entries (defaults to the current user)
    #[arg(long)]
    uid: Option<u32>,

    /// Owner gid reported for entries (defaults to the current group)
    #[arg(long)]
    gid: Option<u32>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    Memory,
    Disk,
    Archive,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    Client,
    Server,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Client => Role::Client,
            RoleArg::Server => Role::Server,
        }
    }
}

/// Where the metadata index lives when `--metadata` is not given. A
/// local archive keeps it next to the media file; a remote archive
/// keeps one per community under the home directory. Either way
/// entries survive across invocations.
fn default_index_path(drive: &DriveSource) -> Result<PathBuf> {
    match drive {
        DriveSource::Path(media) => {
            let mut path = media.clone().into_os_string();
            path.push(".index");
            Ok(PathBuf::from(path))
        }
        DriveSource::Remote { community, .. } => {
            let home = dirs::home_dir().context("could not determine the home directory")?;
            Ok(home.join(".tetherfs").join(format!("{community}.index")))
        }
    }
}

impl BackendArgs {
    fn into_config(self) -> Result<Config> {
        let backend = match self.backend {
            Backend::Memory => BackendSpec::Memory,
            Backend::Disk => BackendSpec::Disk {
                storage: self
                    .storage
                    .ok_or_else(|| anyhow!("--storage is required for the disk backend"))?,
            },
            Backend::Archive => {
                let drive = if self.remote {
                    DriveSource::Remote {
                        rendezvous: self.rendezvous,
                        community: self.community,
                        role: self.role.into(),
                    }
                } else {
                    DriveSource::Path(
                        self.media
                            .ok_or_else(|| anyhow!("--media is required for a local archive"))?,
                    )
                };
                let metadata = if self.ephemeral_metadata {
                    MetadataSpec::Memory
                } else {
                    MetadataSpec::File {
                        path: match self.metadata {
                            Some(path) => path,
                            None => default_index_path(&drive)?,
                        },
                    }
                };
                BackendSpec::Archive(ArchiveSpec {
                    drive,
                    record_blocks: self.record_blocks,
                    write_cache: match self.cache_dir {
                        Some(dir) => WriteCacheConfig::File { dir },
                        None => WriteCacheConfig::Memory,
                    },
                    metadata,
                })
            }
        };
        Ok(Config {
            mountpoint: PathBuf::from("/"),
            uid: self.uid,
            gid: self.gid,
            backend,
        })
    }
}

/// A composed mount: the front-end plus the session keeping a remote
/// drive alive, when there is one.
struct Stack {
    frontend: Arc<MountFrontend>,
    session: Option<SessionHandle>,
}

impl Stack {
    async fn build(config: Config) -> Result<Self> {
        let uid = config.uid.unwrap_or_else(current_uid);
        let gid = config.gid.unwrap_or_else(current_gid);

        let mut session = None;
        let fs: Arc<dyn Filesystem> = match config.backend {
            BackendSpec::Memory => Arc::new(MemoryFs::new(uid, gid)),
            BackendSpec::Disk { storage } => Arc::new(DiskFs::new(storage)?),
            BackendSpec::Archive(spec) => {
                let drive: Box<dyn Drive> = match spec.drive {
                    DriveSource::Path(media) => Box::new(FileDrive::new(media)),
                    DriveSource::Remote {
                        rendezvous,
                        community,
                        role,
                    } => {
                        let manager = ConnectionManager::new(rendezvous, community, role);
                        let (ready, _events) = manager.connect();
                        let mut peer = ready
                            .ready()
                            .await
                            .context("could not pair with a drive peer")?;
                        session = Some(peer.handle());
                        Box::new(RemoteDrive::new(&mut peer)?)
                    }
                };

                let index: Arc<dyn MetadataIndex> = match spec.metadata {
                    MetadataSpec::Memory => Arc::new(MemoryIndex::new()),
                    MetadataSpec::File { path } => {
                        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
                        {
                            std::fs::create_dir_all(parent).with_context(|| {
                                format!("could not create {}", parent.display())
                            })?;
                        }
                        Arc::new(FileIndex::open(path)?)
                    }
                };

                let options = ArchiveOptions {
                    record_blocks: spec.record_blocks,
                    uid,
                    gid,
                };
                let archive = tokio::task::spawn_blocking(move || {
                    let archive =
                        ArchiveFs::new(drive, index, Pipeline::identity(), options)?;
                    archive.initialize(std::path::Path::new("/"), 0o755)?;
                    Ok::<_, anyhow::Error>(archive)
                })
                .await??;
                Arc::new(CacheFs::new(Arc::new(archive), spec.write_cache))
            }
        };

        let frontend = Arc::new(MountFrontend::new(config.mountpoint, uid, gid, fs));
        Ok(Self { frontend, session })
    }

    /// Run one blocking front-end operation off the async runtime.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MountFrontend) -> MountResult<T> + Send + 'static,
    {
        let frontend = self.frontend.clone();
        tokio::task::spawn_blocking(move || {
            op(&frontend).map_err(|errno| anyhow!(std::io::Error::from_raw_os_error(errno)))
        })
        .await?
    }

    fn shutdown(&self) {
        if let Some(session) = &self.session {
            session.close();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level: tracing::Level = cli.log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();

    match cli.command {
        Command::Serve {
            media,
            rendezvous,
            community,
        } => serve_drive(media, rendezvous, community).await,
        other => run_op(other).await,
    }
}

/// Pair with one peer and serve the media file until the peer closes
/// the session or ctrl-c arrives.
async fn serve_drive(media: PathBuf, rendezvous: String, community: String) -> Result<()> {
    let manager = ConnectionManager::new(rendezvous, community, Role::Server);
    let (ready, mut events) = manager.connect();

    let session = tokio::select! {
        session = ready.ready() => session.context("could not pair with a peer")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted before any peer paired");
            return Ok(());
        }
    };

    // Drain negotiation noise (rejected strangers) into the log.
    tokio::spawn(async move {
        while let Some(err) = events.recv().await {
            tracing::warn!("negotiation event: {}", err);
        }
    });

    let handle = session.handle();
    tokio::select! {
        result = serve::serve(session, &media) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            handle.close();
        }
    }
    Ok(())
}

async fn run_op(command: Command) -> Result<()> {
    match command {
        Command::Ls { backend, path } => {
            let stack = Stack::build(backend.into_config()?).await?;
            let entries = stack.run(move |front| front.readdir(&path)).await?;
            for entry in entries {
                println!("{}", entry.name);
            }
            stack.shutdown();
        }
        Command::Stat { backend, path } => {
            let stack = Stack::build(backend.into_config()?).await?;
            let shown = path.clone();
            let attr = stack.run(move |front| front.getattr(&path)).await?;
            println!(
                "{} {:?} mode {:o} size {} uid {} gid {} mtime {}",
                shown.display(),
                attr.kind,
                attr.mode,
                attr.size,
                attr.uid,
                attr.gid,
                attr.mtime
            );
            stack.shutdown();
        }
        Command::Cat { backend, path } => {
            let stack = Stack::build(backend.into_config()?).await?;
            let data = stack
                .run(move |front| {
                    let attr = front.getattr(&path)?;
                    front.read(&path, 0, attr.size as u32)
                })
                .await?;
            std::io::stdout().write_all(&data)?;
            stack.shutdown();
        }
        Command::Put {
            backend,
            source,
            dest,
        } => {
            let stack = Stack::build(backend.into_config()?).await?;
            let data = std::fs::read(&source)
                .with_context(|| format!("could not read {}", source.display()))?;
            stack
                .run(move |front| {
                    if front.getattr(&dest).is_err() {
                        front.create(&dest, 0o644)?;
                    }
                    front.truncate(&dest, 0)?;
                    front.write(&dest, 0, &data)?;
                    front.flush(&dest)
                })
                .await?;
            stack.shutdown();
        }
        Command::Get {
            backend,
            source,
            dest,
        } => {
            let stack = Stack::build(backend.into_config()?).await?;
            let data = stack
                .run(move |front| {
                    let attr = front.getattr(&source)?;
                    front.read(&source, 0, attr.size as u32)
                })
                .await?;
            std::fs::write(&dest, data)
                .with_context(|| format!("could not write {}", dest.display()))?;
            stack.shutdown();
        }
        Command::Mkdir { backend, path } => {
            let stack = Stack::build(backend.into_config()?).await?;
            stack
                .run(move |front| front.mkdir(&path, 0o755).map(|_| ()))
                .await?;
            stack.shutdown();
        }
        Command::Rm { backend, path } => {
            let stack = Stack::build(backend.into_config()?).await?;
            stack.run(move |front| front.unlink(&path)).await?;
            stack.shutdown();
        }
        Command::Mv { backend, from, to } => {
            let stack = Stack::build(backend.into_config()?).await?;
            stack.run(move |front| front.rename(&from, &to)).await?;
            stack.shutdown();
        }
        Command::Chmod {
            backend,
            mode,
            path,
        } => {
            let mode = u32::from_str_radix(&mode, 8)
                .map_err(|_| anyhow!("mode must be octal, e.g. 644"))?;
            let stack = Stack::build(backend.into_config()?).await?;
            stack
                .run(move |front| {
                    front
                        .setattr(
                            &path,
                            SetAttr {
                                mode: Some(mode),
                                ..Default::default()
                            },
                        )
                        .map(|_| ())
                })
                .await?;
            stack.shutdown();
        }
        Command::Serve { .. } => bail!("serve is handled separately"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_local_archive_requires_media() {
        let cli = Cli::try_parse_from(["tetherfs", "ls", "/"]).unwrap();
        let Command::Ls { backend, .. } = cli.command else {
            panic!("expected ls");
        };
        assert!(backend.into_config().is_err());
    }

    #[test]
    fn test_local_archive_index_defaults_next_to_media() {
        let cli =
            Cli::try_parse_from(["tetherfs", "ls", "--media", "/tapes/vault.tar", "/"]).unwrap();
        let Command::Ls { backend, .. } = cli.command else {
            panic!("expected ls");
        };
        let config = backend.into_config().unwrap();
        let BackendSpec::Archive(spec) = config.backend else {
            panic!("expected archive backend");
        };
        let MetadataSpec::File { path } = spec.metadata else {
            panic!("expected a persistent index by default");
        };
        assert_eq!(path, PathBuf::from("/tapes/vault.tar.index"));
    }

    #[test]
    fn test_ephemeral_metadata_opts_out_of_persistence() {
        let cli = Cli::try_parse_from([
            "tetherfs",
            "ls",
            "--media",
            "/tapes/vault.tar",
            "--ephemeral-metadata",
            "/",
        ])
        .unwrap();
        let Command::Ls { backend, .. } = cli.command else {
            panic!("expected ls");
        };
        let config = backend.into_config().unwrap();
        let BackendSpec::Archive(spec) = config.backend else {
            panic!("expected archive backend");
        };
        assert!(matches!(spec.metadata, MetadataSpec::Memory));
    }

    #[test]
    fn test_remote_archive_defaults() {
        let cli = Cli::try_parse_from(["tetherfs", "ls", "--remote", "/"]).unwrap();
        let Command::Ls { backend, .. } = cli.command else {
            panic!("expected ls");
        };
        let config = backend.into_config().unwrap();
        let BackendSpec::Archive(spec) = config.backend else {
            panic!("expected archive backend");
        };
        let DriveSource::Remote {
            rendezvous,
            community,
            role,
        } = spec.drive
        else {
            panic!("expected remote drive");
        };
        assert_eq!(rendezvous, DEFAULT_RENDEZVOUS);
        assert_eq!(community, DEFAULT_COMMUNITY);
        assert_eq!(role, Role::Client);
    }
}
