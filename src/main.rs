//! Mount a remote cloud drive as a local filesystem, without syncing.

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fuser::MountOption;
use tracing::{error, info};

use drivefs::config::{self, MountConfig};
use drivefs::drive::{LiveDrive, RemoteDrive};
use drivefs::fs::DriveFs;
use drivefs::fs::fuser::FuserAdapter;
use drivefs::trc;

/// Name reported to the kernel as the filesystem type.
const FS_NAME: &str = "drivefs";

/// Volume label shown for the mount; only macFUSE understands the option.
#[cfg(target_os = "macos")]
const VOLUME_NAME: &str = "Drive";

#[derive(Parser)]
#[command(version, about = "Mount a remote cloud drive as a local filesystem.")]
struct Args {
    /// Where to mount the drive.
    mountpoint: PathBuf,

    /// Mount read-write. The default is a read-only mount, which also
    /// requests the narrower OAuth scope.
    #[arg(short = 'w', long)]
    writeable: bool,

    /// Seconds between change-feed polls.
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Also show files shared with you that you don't own.
    #[arg(long)]
    include_shared: bool,
}

/// Authenticate and connect the live drive.
async fn connect(config: &MountConfig) -> Result<Arc<dyn RemoteDrive>, String> {
    let secret_path =
        config::client_secret_path().ok_or("unable to determine home directory")?;
    let token_path = config::token_cache_path().ok_or("unable to determine home directory")?;

    let auth =
        drive_api::Authenticator::from_files(&secret_path, &token_path, config.oauth_scope())
            .await
            .map_err(|e| format!("authentication failed: {e}"))?;
    let api = drive_api::DriveApi::new(auth);
    let drive = LiveDrive::connect(api)
        .await
        .map_err(|e| format!("unable to connect to the drive: {e}"))?;
    Ok(Arc::new(drive))
}

#[expect(
    clippy::exit,
    reason = "top-level entry point that intentionally terminates the process"
)]
fn main() {
    let args = Args::parse();

    if let Err(e) = trc::init() {
        eprintln!("Failed to initialize logging: {e}");
        exit(1);
    }

    let config = MountConfig {
        writeable: args.writeable,
        owned_only: !args.include_shared,
        poll_interval: Duration::from_secs(args.poll_interval),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start the async runtime: {e}");
            exit(1);
        }
    };

    let drive = match runtime.block_on(connect(&config)) {
        Ok(drive) => drive,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    let fs = DriveFs::new(drive, config.clone());
    let system = fs.system().clone();

    // Fail fast when the root is unreachable rather than serving an empty
    // mount.
    if let Err(e) = runtime.block_on(system.root()) {
        error!("unable to fetch the drive root: {e}");
        exit(1);
    }

    {
        let system = system.clone();
        runtime.spawn(async move { system.run_change_loop().await });
    }

    let owner = (
        nix::unistd::Uid::current().as_raw(),
        nix::unistd::Gid::current().as_raw(),
    );
    let adapter = FuserAdapter::new(fs, runtime.handle().clone(), owner);

    let mut options = vec![
        MountOption::FSName(FS_NAME.to_owned()),
        MountOption::AutoUnmount,
        MountOption::NoExec,
        MountOption::DefaultPermissions,
    ];
    #[cfg(target_os = "macos")]
    options.push(MountOption::CUSTOM(format!("volname={VOLUME_NAME}")));
    if config.read_only() {
        options.push(MountOption::RO);
    }

    info!(mountpoint = %args.mountpoint.display(), writeable = config.writeable, "mounting");
    let served = fuser::mount2(adapter, &args.mountpoint, &options);
    system.shutdown();

    if let Err(e) = served {
        error!("mount failed: {e}");
        exit(1);
    }
}
