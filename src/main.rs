//! tgtransfer - Upload and download files through Telegram
//!
//! Usage:
//!   tgtransfer init --api-id <id> --api-hash <hash>  - Write the config file
//!   tgtransfer login                                 - Authenticate with Telegram
//!   tgtransfer upload <files>...                     - Upload files to a chat
//!   tgtransfer download                              - Download files from a chat

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tgtransfer::{
    config::{default_config_file, expand_tilde, Config},
    download::{download_files, DownloadOptions, SplitFileMode},
    files::{collect_upload_files, CollectOptions, DirectoryMode, LargeFileMode, Thumbnail},
    retry::FileOutcome,
    telegram::{Peer, TelegramClient},
    upload::{UploadOptions, Uploader},
    Error,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tgtransfer")]
#[command(version)]
#[command(about = "Upload and download files through Telegram")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new configuration file
    Init {
        /// Telegram API ID (from my.telegram.org)
        #[arg(long)]
        api_id: i32,

        /// Telegram API hash
        #[arg(long)]
        api_hash: String,

        /// Phone number for authentication
        #[arg(long)]
        phone: Option<String>,

        /// Log in as a bot instead of a user
        #[arg(long)]
        bot_token: Option<String>,

        /// The account has Telegram Premium
        #[arg(long)]
        premium: bool,
    },

    /// Authenticate with Telegram
    Login {
        /// Phone number, overriding the configured one
        #[arg(long)]
        phone: Option<String>,
    },

    /// Upload files
    Upload {
        /// Files or directories to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Destination chat: "me", an id or a username
        #[arg(long, default_value = "me")]
        to: String,

        /// Caption template, e.g. "{file.stem} ({file.size.for_humans})"
        #[arg(long)]
        caption: Option<String>,

        /// Send media as plain documents
        #[arg(long)]
        force_file: bool,

        /// Send the files as albums of up to 10
        #[arg(short, long)]
        album: bool,

        /// Forward every uploaded message to this chat as well
        #[arg(long)]
        forward: Vec<String>,

        /// What to do with directories
        #[arg(long, value_enum, default_value_t = DirectoryMode::Fail)]
        directories: DirectoryMode,

        /// What to do with files over the account limit
        #[arg(long, value_enum, default_value_t = LargeFileMode::Fail)]
        large_files: LargeFileMode,

        /// Do not attach a thumbnail to videos
        #[arg(long, conflicts_with = "thumbnail_file")]
        no_thumbnail: bool,

        /// Use this image as the thumbnail of every file
        #[arg(long)]
        thumbnail_file: Option<PathBuf>,

        /// Delete local files once they are fully uploaded
        #[arg(long)]
        delete_on_success: bool,

        /// Print the message id of every uploaded file
        #[arg(long)]
        print_file_id: bool,

        /// Upload files sorted by name
        #[arg(long)]
        sort: bool,
    },

    /// Download the files at the end of a chat
    Download {
        /// Source chat: "me", an id or a username
        #[arg(long, default_value = "me")]
        from: String,

        /// Keep split parts as they are or join them
        #[arg(long, value_enum, default_value_t = SplitFileMode::Keep)]
        split_files: SplitFileMode,

        /// Delete each message once its file is downloaded
        #[arg(long)]
        delete_on_success: bool,

        /// Output directory, overriding the configured one
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let config_path = cli
        .config
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(default_config_file);

    match run_command(cli.command, &config_path) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when some file of the batch failed
fn run_command(command: Commands, config_path: &Path) -> anyhow::Result<bool> {
    match command {
        Commands::Init {
            api_id,
            api_hash,
            phone,
            bot_token,
            premium,
        } => cmd_init(config_path, api_id, api_hash, phone, bot_token, premium).map(|_| true),

        Commands::Login { phone } => cmd_login(config_path, phone).map(|_| true),

        Commands::Upload {
            files,
            to,
            caption,
            force_file,
            album,
            forward,
            directories,
            large_files,
            no_thumbnail,
            thumbnail_file,
            delete_on_success,
            print_file_id,
            sort,
        } => {
            let thumbnail = match (no_thumbnail, thumbnail_file) {
                (true, _) => Thumbnail::Disabled,
                (false, Some(path)) => Thumbnail::Custom(path),
                (false, None) => Thumbnail::Auto,
            };
            let request = UploadRequest {
                files,
                to: Peer::parse(&to),
                caption,
                force_file,
                album,
                forward: forward.iter().map(|f| Peer::parse(f)).collect(),
                directories,
                large_files,
                thumbnail,
                delete_on_success,
                print_file_id,
                sort,
            };
            cmd_upload(config_path, request)
        }

        Commands::Download {
            from,
            split_files,
            delete_on_success,
            output,
        } => cmd_download(
            config_path,
            Peer::parse(&from),
            split_files,
            delete_on_success,
            output,
        ),
    }
}

fn cmd_init(
    config_path: &Path,
    api_id: i32,
    api_hash: String,
    phone: Option<String>,
    bot_token: Option<String>,
    premium: bool,
) -> anyhow::Result<()> {
    let mut config = Config::default();
    config.telegram.api_id = api_id;
    config.telegram.api_hash = api_hash;
    config.telegram.phone = phone;
    config.telegram.bot_token = bot_token;
    config.telegram.premium = premium;
    config.validate()?;

    config.save(config_path)?;

    info!("Configuration saved to {:?}", config_path);
    info!("Session file: {:?}", config.telegram.session_file);
    info!("Next step: run 'tgtransfer login' to authenticate");

    Ok(())
}

fn cmd_login(config_path: &Path, phone: Option<String>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;

    runtime.block_on(async {
        let client = TelegramClient::new(config.telegram.clone());
        client.connect().await?;

        if client.is_authorized().await? {
            info!("Already authenticated!");
            client.disconnect().await;
            return Ok::<_, anyhow::Error>(());
        }

        if let Some(bot_token) = &config.telegram.bot_token {
            client.bot_sign_in(bot_token).await?;
            info!("Signed in as a bot");
            client.disconnect().await;
            return Ok(());
        }

        let phone = match phone.or_else(|| config.telegram.phone.clone()) {
            Some(phone) => phone,
            None => prompt("Enter your phone number: ")?,
        };

        let token = client.request_login_code(&phone).await?;
        info!("Login code sent to {}", phone);
        let code = prompt("Enter the code you received: ")?;

        if let Some(password_token) = client.sign_in(&token, &code).await? {
            let password = rpassword::prompt_password("Two-step verification password: ")
                .context("Failed to read the password")?;
            client.check_password(password_token, &password).await?;
        }
        info!("Successfully authenticated!");

        client.disconnect().await;
        Ok::<_, anyhow::Error>(())
    })
}

struct UploadRequest {
    files: Vec<PathBuf>,
    to: Peer,
    caption: Option<String>,
    force_file: bool,
    album: bool,
    forward: Vec<Peer>,
    directories: DirectoryMode,
    large_files: LargeFileMode,
    thumbnail: Thumbnail,
    delete_on_success: bool,
    print_file_id: bool,
    sort: bool,
}

fn cmd_upload(config_path: &Path, request: UploadRequest) -> anyhow::Result<bool> {
    let config = Config::load(config_path)?;
    let account = config.account_kind();

    let collect = CollectOptions {
        directories: request.directories,
        large_files: request.large_files,
        max_file_size: account.max_file_size(),
        sort: request.sort,
    };
    let files = collect_upload_files(&request.files, &collect)?;

    let options = UploadOptions {
        caption: request.caption,
        force_document: request.force_file,
        thumbnail: request.thumbnail,
        album: request.album,
        forward: request.forward,
        delete_on_success: request.delete_on_success,
        print_file_id: request.print_file_id,
        caption_limit: account.max_caption_length(),
        retry: config.retry_policy(),
        show_progress: config.transfer.show_progress,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    runtime.block_on(async {
        let client = connect_authorized(&config).await?;
        let cancel = cancel_on_ctrl_c();

        let result = Uploader::new(&client, &options)
            .send_files(&request.to, files, &cancel)
            .await;
        client.disconnect().await;

        Ok::<_, anyhow::Error>(report(&result?))
    })
}

fn cmd_download(
    config_path: &Path,
    from: Peer,
    split_files: SplitFileMode,
    delete_on_success: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let config = Config::load(config_path)?;

    let options = DownloadOptions {
        directory: output
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(|| config.transfer.download_dir.clone()),
        split_files,
        delete_on_success,
        retry: config.retry_policy(),
        show_progress: config.transfer.show_progress,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    runtime.block_on(async {
        let client = connect_authorized(&config).await?;
        let cancel = cancel_on_ctrl_c();

        let result = download_from(&client, &from, &options, &cancel).await;
        client.disconnect().await;

        Ok::<_, anyhow::Error>(report(&result?))
    })
}

async fn download_from(
    client: &TelegramClient,
    from: &Peer,
    options: &DownloadOptions,
    cancel: &AtomicBool,
) -> tgtransfer::Result<Vec<FileOutcome<PathBuf>>> {
    let messages = client.find_files(from).await?;
    if messages.is_empty() {
        info!("No files to download in {}", from);
    }
    download_files(client, from, messages, options, cancel).await
}

async fn connect_authorized(config: &Config) -> tgtransfer::Result<TelegramClient> {
    let client = TelegramClient::new(config.telegram.clone());
    client.connect().await?;
    if !client.is_authorized().await? {
        client.disconnect().await;
        return Err(Error::TelegramAuthRequired);
    }
    Ok(client)
}

/// Flag raised by the first Ctrl-C; the batch stops before its next file
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current file");
            flag.store(true, Ordering::Relaxed);
        }
    });
    cancel
}

/// Log failed files; true when every file went through
fn report<T>(outcomes: &[FileOutcome<T>]) -> bool {
    let mut all_ok = true;
    for outcome in outcomes {
        if let FileOutcome::Failed { name, reason } = outcome {
            error!("Failed to transfer \"{}\": {}", name, reason);
            all_ok = false;
        }
    }
    all_ok
}

fn prompt(message: &str) -> anyhow::Result<String> {
    print!("{}", message);
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_album_flag() {
        let cli = Cli::parse_from(["tgtransfer", "upload", "-a", "photo.jpg"]);
        match cli.command {
            Commands::Upload { album, .. } => assert!(album),
            _ => panic!("expected the upload command"),
        }
    }

    #[test]
    fn test_download_keeps_split_files_by_default() {
        let cli = Cli::parse_from(["tgtransfer", "download"]);
        match cli.command {
            Commands::Download { split_files, .. } => assert_eq!(split_files, SplitFileMode::Keep),
            _ => panic!("expected the download command"),
        }
    }
}
