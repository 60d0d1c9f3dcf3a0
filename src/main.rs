use anyhow::{anyhow, Result};
use backtrace::Backtrace;
use clap::{Arg, ArgMatches, Command as ClapApp};
use log::info;
use reqwest::Url;
use std::{fs, io::Write, panic, path::PathBuf, sync::Arc};
use ytm_album_art::{
  auth::{AuthLifecycle, AuthPhase},
  background::Background,
  callback::{parse_callback, CallbackOutcome},
  config::AppConfig,
  controller::PageController,
  core::page::PageKind,
  dom::snapshot::document_from_html,
  infra::{
    host::DesktopHost,
    redirect_uri::capture_redirect,
    rpc::{RpcArtworkLookup, RpcClient},
    spotify::{SpotifyAccounts, SpotifySearch},
    storage::FileStore,
  },
  popup::{self, ConnectionStatus},
};

fn setup_logging(level: log::LevelFilter) -> Result<PathBuf> {
  let pid = std::process::id();
  let log_dir = std::env::temp_dir().join("ytm_album_art_logs");
  let log_path = log_dir.join(format!("ytm_album_art_log{}", pid));

  if !log_dir.exists() {
    fs::create_dir_all(&log_dir).map_err(|e| {
      anyhow!(
        "Failed to create log directory {}: {}",
        log_dir.display(),
        e
      )
    })?;
  }
  fern::Dispatch::new()
    .format(|out, message, record| {
      out.finish(format_args!(
        "{}[{}][{}] {}",
        chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
        record.target(),
        record.level(),
        message
      ))
    })
    .level(level)
    .chain(fern::log_file(&log_path)?)
    .apply()
    .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

  Ok(log_path)
}

fn install_panic_hook(panic_log_path: PathBuf) {
  let default_hook = panic::take_hook();
  panic::set_hook(Box::new(move |info| {
    if let Some(parent) = panic_log_path.parent() {
      let _ = fs::create_dir_all(parent);
    }
    if let Ok(mut f) = fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&panic_log_path)
    {
      let _ = writeln!(f, "\n==== ytm-album-art panic ====");
      let _ = writeln!(f, "{}", info);
      let _ = writeln!(f, "{:?}", Backtrace::new());
      eprintln!("A crash log was written to: {}", panic_log_path.display());
    }
    default_hook(info);
  }));
}

fn cli() -> ClapApp {
  ClapApp::new(env!("CARGO_PKG_NAME"))
    .version(env!("CARGO_PKG_VERSION"))
    .author(env!("CARGO_PKG_AUTHORS"))
    .about(env!("CARGO_PKG_DESCRIPTION"))
    .after_help("Settings are read from $HOME/.config/ytm-album-art/config.yml")
    .subcommand_required(true)
    .arg(
      Arg::new("verbose")
        .short('v')
        .long("verbose")
        .global(true)
        .action(clap::ArgAction::SetTrue)
        .help("Log at debug level"),
    )
    .subcommand(ClapApp::new("connect").about("Authorize with Spotify and store the tokens"))
    .subcommand(
      ClapApp::new("status")
        .about("Show whether a Spotify connection is stored")
        .arg(
          Arg::new("validate")
            .long("validate")
            .action(clap::ArgAction::SetTrue)
            .help("Confirm the stored token with Spotify, refreshing it if needed"),
        ),
    )
    .subcommand(ClapApp::new("disconnect").about("Forget every stored token"))
    .subcommand(
      ClapApp::new("inspect")
        .about("Run the overlay engine once against a saved watch page")
        .arg(
          Arg::new("html")
            .required(true)
            .value_name("FILE")
            .help("Saved page HTML"),
        )
        .arg(
          Arg::new("url")
            .long("url")
            .required(true)
            .value_name("URL")
            .help("Address the page was saved from"),
        ),
    )
}

fn redirect_target(redirect_uri: &str) -> Result<(u16, String)> {
  let url =
    Url::parse(redirect_uri).map_err(|e| anyhow!("Invalid redirect_uri {}: {}", redirect_uri, e))?;
  let port = url
    .port_or_known_default()
    .ok_or_else(|| anyhow!("redirect_uri {} has no port", redirect_uri))?;
  Ok((port, url.path().to_string()))
}

async fn connect(config: &AppConfig, store: Arc<FileStore>) -> Result<String> {
  let mut auth = AuthLifecycle::new(
    store,
    SpotifyAccounts::new(reqwest::Client::new()),
    config.auth_settings(),
  );
  let authorize_url = auth
    .begin_authorization()
    .ok_or_else(|| anyhow!("Could not start authorization"))?;

  println!("Opening Spotify authorization in your browser:\n{}", authorize_url);
  if let Err(e) = open::that(&authorize_url) {
    println!("Could not open a browser ({}), open the link above manually.", e);
  }

  let (port, path) = redirect_target(&config.redirect_uri)?;
  let redirect = tokio::task::spawn_blocking(move || capture_redirect(port, &path)).await??;

  match parse_callback(&redirect) {
    CallbackOutcome::Code(code) => match auth.complete_authorization(&code).await {
      AuthPhase::Authenticated => Ok(ConnectionStatus::Connected.to_string()),
      phase => Err(anyhow!("Authorization failed ({:?})", phase)),
    },
    CallbackOutcome::Denied(reason) => Err(anyhow!("Authorization denied: {}", reason)),
    CallbackOutcome::Restart => Err(anyhow!(
      "The redirect carried neither a code nor an error, run connect again"
    )),
  }
}

async fn status(config: &AppConfig, store: Arc<FileStore>, validate: bool) -> Result<String> {
  if validate && ConnectionStatus::from_store(&*store) == ConnectionStatus::Connected {
    let mut auth = AuthLifecycle::new(
      Arc::clone(&store),
      SpotifyAccounts::new(reqwest::Client::new()),
      config.auth_settings(),
    );
    let phase = auth.ensure_valid().await;
    info!("token validation finished in {:?}", phase);
  }
  Ok(ConnectionStatus::from_store(&*store).to_string())
}

async fn inspect(config: &AppConfig, store: Arc<FileStore>, m: &ArgMatches) -> Result<String> {
  let html_path = m
    .get_one::<String>("html")
    .ok_or_else(|| anyhow!("missing page file"))?;
  let url = m
    .get_one::<String>("url")
    .ok_or_else(|| anyhow!("missing page url"))?;
  let html = fs::read_to_string(html_path)?;
  let document = document_from_html(&html, url);
  let kind = PageKind::from_url(url);
  if !kind.is_supported() {
    return Err(anyhow!("{} is not a YouTube or YouTube Music page", url));
  }

  let client = reqwest::Client::new();
  let (rpc, requests) = RpcClient::channel(16, config.rpc_timeout());
  let background = Background::new(
    Arc::clone(&store),
    DesktopHost::new(false),
    SpotifySearch::new(client.clone(), Arc::clone(&store)),
    &config.client_id,
  );
  let auth = AuthLifecycle::new(
    Arc::clone(&store),
    SpotifyAccounts::new(client.clone()),
    config.auth_settings(),
  );
  let mut controller = PageController::new(
    document,
    config.timings(kind),
    auth,
    RpcArtworkLookup::new(rpc.clone()),
    rpc,
  )
  .with_palette_client(client);

  let page = async move {
    let report = controller.inspect().await;
    // Dropping the controller closes the request channel and ends `serve`.
    drop(controller);
    report
  };
  let (report, ()) = tokio::join!(page, background.serve(requests));

  Ok(format!(
    "page: {:?}\nmusic content: {}\ntrack: {}\noverlay: {:?}\nnodes: {:?}",
    report.kind, report.eligible, report.identity, report.state, report.overlay
  ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  let matches = cli().get_matches();

  let mut config = AppConfig::new();
  config.load_config()?;
  let level = if matches.get_flag("verbose") {
    log::LevelFilter::Debug
  } else {
    config.log_level
  };
  let log_path = setup_logging(level)?;
  info!("ytm-album-art {} starting up", env!("CARGO_PKG_VERSION"));
  info!("logging to {}", log_path.display());

  let paths = config.get_or_build_paths()?.clone();
  install_panic_hook(paths.panic_log_path.clone());
  let store = Arc::new(FileStore::open(&paths.storage_file_path)?);

  let output = match matches.subcommand() {
    Some(("connect", _)) => connect(&config, store).await?,
    Some(("status", m)) => status(&config, store, m.get_flag("validate")).await?,
    Some(("disconnect", _)) => {
      let mut auth = AuthLifecycle::new(
        store,
        SpotifyAccounts::new(reqwest::Client::new()),
        config.auth_settings(),
      );
      popup::disconnect(&mut auth).to_string()
    }
    Some(("inspect", m)) => inspect(&config, store, m).await?,
    Some((cmd, _)) => return Err(anyhow!("Unknown command '{}'", cmd)),
    None => return Err(anyhow!("No command given")),
  };
  println!("{}", output);
  Ok(())
}
