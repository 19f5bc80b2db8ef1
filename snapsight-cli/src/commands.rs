// ABOUTME: Command handlers that wire configuration, preferences and output to the SDK
// ABOUTME: Each subcommand maps to one async function; input resolution helpers are public for tests

use anyhow::{anyhow, bail, Context, Result};
use secrecy::SecretString;
use snapsight_sdk::{
    storage, ApiClient, CapabilityProber, ContentRoot, DirectoryRoot, ImageSource, Mode,
    ModeMemory, PageRoot, ProbeResult, RegisterParams, Session, SessionEvent, SnapError,
    WsConnector,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cli::Commands;
use crate::cli_output::CliOutput;
use crate::completions;
use crate::config::Config;
use crate::constants::timeouts::SEND_WAIT;
use crate::output::OutputFormat;
use crate::preferences::PreferencesManager;

/// Everything a command needs besides its own arguments
pub struct App {
    pub config: Config,
    pub output: Box<dyn OutputFormat>,
    pub cli: CliOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Environment,
    Keychain,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Environment => write!(f, "SNAPSIGHT_TOKEN"),
            TokenSource::Keychain => write!(f, "system keychain"),
        }
    }
}

/// The environment token wins over a stored one
pub fn resolve_token<F>(config: &Config, stored: F) -> Option<(SecretString, TokenSource)>
where
    F: FnOnce() -> Result<String, SnapError>,
{
    if let Some(token) = &config.token {
        return Some((
            SecretString::new(token.clone().into_boxed_str()),
            TokenSource::Environment,
        ));
    }
    match stored() {
        Ok(token) => Some((SecretString::new(token.into_boxed_str()), TokenSource::Keychain)),
        Err(e) => {
            log::debug!("No stored token: {}", e);
            None
        }
    }
}

/// A 401 on a request made with the keychain token means the token is stale
pub fn should_forget_token(err: &anyhow::Error, source: Option<TokenSource>) -> bool {
    source == Some(TokenSource::Keychain)
        && err
            .chain()
            .any(|cause| matches!(cause.downcast_ref::<SnapError>(), Some(SnapError::Auth)))
}

/// `http(s)://` roots are pages; anything else must be an existing directory
pub fn content_root(raw: &str) -> Result<Box<dyn ContentRoot>> {
    if let Ok(url) = Url::parse(raw) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(Box::new(PageRoot::new(url)?));
        }
    }
    let path = Path::new(raw);
    if !path.is_dir() {
        bail!("{} is neither an http(s) URL nor a directory", raw);
    }
    Ok(Box::new(DirectoryRoot::new(path)))
}

/// `http(s)://` arguments are remote images; anything else must be an existing file
pub fn image_source(raw: &str) -> Result<ImageSource> {
    if let Ok(url) = Url::parse(raw) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(ImageSource::Remote(url));
        }
    }
    let path = PathBuf::from(raw);
    if !path.is_file() {
        bail!("Image file not found: {}", raw);
    }
    let path = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", raw))?;
    Ok(ImageSource::Local(path))
}

fn prompt(label: &str) -> Result<String> {
    dialoguer::Input::<String>::new()
        .with_prompt(label)
        .interact_text()
        .with_context(|| format!("Could not read {}", label.to_lowercase()))
}

/// First active result in probe order
pub fn selected_mode(results: &[ProbeResult]) -> Option<Mode> {
    results.iter().find(|r| r.active).map(|r| r.mode)
}

impl App {
    pub async fn run(&self, command: Commands) -> Result<()> {
        let authenticated = matches!(
            command,
            Commands::Upload { .. } | Commands::Toggle { .. } | Commands::Me
        );
        let result = self.dispatch(command).await;
        if let Err(err) = &result {
            if authenticated {
                self.forget_rejected_token(err);
            }
        }
        result
    }

    async fn dispatch(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Probe { modes } => self.probe(modes).await,
            Commands::Watch { root, interval } => self.watch(&root, interval).await,
            Commands::Send { images, wait } => self.send(&images, wait.unwrap_or(SEND_WAIT)).await,
            Commands::Upload { mode, file } => self.upload(mode, &file).await,
            Commands::Toggle { mode } => self.toggle(mode).await,
            Commands::Login { username, force } => self.login(username, force).await,
            Commands::Register {
                email,
                full_name,
                phone,
                device_id,
            } => self.register(email, full_name, phone, device_id).await,
            Commands::Logout => self.logout(),
            Commands::Me => self.me().await,
            Commands::Status => self.status().await,
            Commands::Reset => self.reset(),
            Commands::Completions { shell } => {
                let mut cmd = <crate::cli::Cli as clap::CommandFactory>::command();
                completions::generate_completions(shell, &mut cmd, &mut std::io::stdout());
                Ok(())
            }
        }
    }

    fn api_client(&self, require_token: bool) -> Result<ApiClient> {
        let token = resolve_token(&self.config, storage::load).map(|(token, _)| token);
        if require_token && token.is_none() {
            return Err(SnapError::Auth).context("Not logged in");
        }
        ApiClient::from_config(self.config.api_client_config(token))
            .context("Invalid REST client configuration")
    }

    fn forget_rejected_token(&self, err: &anyhow::Error) {
        let source = resolve_token(&self.config, storage::load).map(|(_, source)| source);
        if !should_forget_token(err, source) {
            return;
        }
        match storage::clear() {
            Ok(()) => self
                .cli
                .info("Removed the rejected token from the keychain; run `snapsight login`"),
            Err(e) => log::warn!("Could not remove the rejected token: {}", e),
        }
    }

    fn print(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        // A closed pipe ends output quietly
        let _ = writeln!(stdout, "{}", line);
    }

    async fn probe(&self, modes: Vec<Mode>) -> Result<()> {
        let session_config = self.config.session_config();
        let modes = if modes.is_empty() {
            session_config.modes.clone()
        } else {
            modes
        };
        let base = Url::parse(
            session_config
                .ws_base
                .as_deref()
                .unwrap_or(snapsight_sdk::constants::urls::WS_BASE),
        )
        .context("Invalid channel base URL")?;

        let remembered = ModeMemory::load(&PreferencesManager::new()?);
        let candidates = CapabilityProber::candidates(&modes, remembered);
        let prober = CapabilityProber::new(Arc::new(WsConnector::new()), base)
            .with_timeout(session_config.probe_timeout);

        let spinner = self.cli.spinner("Probing modes");
        let results = prober.probe_all(&candidates).await;
        spinner.finish_and_clear();

        self.print(&self.output.format_probe(&results, selected_mode(&results))?);
        Ok(())
    }

    async fn start_session(&self) -> Result<Session> {
        let mut session = Session::with_websocket(
            self.config.session_config(),
            Box::new(PreferencesManager::new()?),
        )
        .context("Could not create session")?;

        let spinner = self.cli.spinner("Looking for the active mode");
        let started = session.start().await;
        spinner.finish_and_clear();
        let mode = started.context("Could not start a session")?;
        log::info!("Using mode {}", mode);
        Ok(session)
    }

    fn show(&self, event: &SessionEvent) {
        if let Some(line) = self.output.format_event(event) {
            self.print(&line);
        }
    }

    async fn finish(&self, session: &mut Session) -> Result<()> {
        let stopped = session.stop().await;
        while let Some(event) = session.next_event().await {
            self.show(&event);
        }
        stopped.context("Channel did not close cleanly")
    }

    async fn watch(&self, raw_root: &str, interval: Option<Duration>) -> Result<()> {
        let root = content_root(raw_root)?;
        let mut session = self.start_session().await?;
        session.observe(root, interval.unwrap_or_else(|| self.config.poll_interval()));
        self.cli.info(&format!("Watching {} (Ctrl-C to stop)", raw_root));

        loop {
            tokio::select! {
                event = session.next_event() => match event {
                    Some(event) => self.show(&event),
                    None => return Ok(()),
                },
                _ = tokio::signal::ctrl_c() => {
                    return self.finish(&mut session).await;
                }
            }
        }
    }

    async fn send(&self, raw_images: &[String], wait: Duration) -> Result<()> {
        let sources = raw_images
            .iter()
            .map(|raw| image_source(raw))
            .collect::<Result<Vec<_>>>()?;

        let mut session = self.start_session().await?;
        let mut expected = 0usize;
        for source in sources {
            if session.submit(source).await {
                expected += 1;
            }
        }

        let mut settled = 0usize;
        let deadline = tokio::time::Instant::now() + wait;
        while settled < expected {
            let event = tokio::select! {
                event = session.next_event() => event,
                _ = tokio::time::sleep_until(deadline) => {
                    self.cli.warning(&format!(
                        "Timed out with {} of {} result(s) outstanding",
                        expected - settled,
                        expected
                    ));
                    break;
                }
            };
            let Some(event) = event else {
                break;
            };
            if matches!(
                event,
                SessionEvent::Result { .. } | SessionEvent::DeliveryFailed { .. }
            ) {
                settled += 1;
            }
            self.show(&event);
        }

        self.finish(&mut session).await?;
        if settled < expected {
            return Err(anyhow!(
                "Received {} of {} result(s)",
                settled,
                expected
            ));
        }
        Ok(())
    }

    async fn upload(&self, mode: Mode, file: &Path) -> Result<()> {
        let client = self.api_client(false)?;
        let spinner = self.cli.spinner(format!("Uploading {}", file.display()));
        let response = client.upload(mode, file).await;
        spinner.finish_and_clear();
        let response = response.with_context(|| format!("Upload of {} failed", file.display()))?;
        self.print(&self.output.format_upload(mode, &response)?);
        Ok(())
    }

    async fn toggle(&self, mode: Mode) -> Result<()> {
        let client = self.api_client(false)?;
        let response = client
            .toggle_messenger(mode)
            .await
            .with_context(|| format!("Could not toggle {}", mode))?;
        self.print(&self.output.format_toggle(mode, &response)?);
        Ok(())
    }

    async fn login(&self, username: Option<String>, force: bool) -> Result<()> {
        if !force && storage::load().is_ok() {
            self.cli
                .info("Already logged in. Use --force to log in again.");
            return Ok(());
        }

        let username = match username {
            Some(username) => username,
            None => prompt("Username")?,
        };
        let password = dialoguer::Password::new()
            .with_prompt("Password")
            .interact()
            .context("Could not read password")?;
        let password = SecretString::new(password.into_boxed_str());

        let token = self
            .api_client(false)?
            .login(&username, &password)
            .await
            .context("Login failed")?;

        match storage::store(&token.access_token) {
            Ok(()) => self.cli.success(&format!("Logged in as {}", username)),
            Err(e) => {
                self.cli.warning(&format!("Token not stored: {}", e));
                self.cli
                    .info("Export it for this shell instead: SNAPSIGHT_TOKEN=<token>");
                self.print(&token.access_token);
            }
        }
        Ok(())
    }

    async fn register(
        &self,
        email: Option<String>,
        full_name: Option<String>,
        phone: Option<String>,
        device_id: Option<String>,
    ) -> Result<()> {
        let email = match email {
            Some(email) => email,
            None => prompt("Email")?,
        };
        let full_name = match full_name {
            Some(full_name) => full_name,
            None => prompt("Full name")?,
        };
        let password = dialoguer::Password::new()
            .with_prompt("Password")
            .with_confirmation("Repeat password", "Passwords do not match")
            .interact()
            .context("Could not read password")?;

        let params = RegisterParams {
            email,
            password: SecretString::new(password.into_boxed_str()),
            full_name,
            phone,
            device_id,
        };
        let user = self
            .api_client(false)?
            .register(&params)
            .await
            .context("Registration failed")?;

        self.print(&self.output.format_user(&user)?);
        self.cli
            .success(&format!("Registered {}. Run `snapsight login` next.", user.email));
        Ok(())
    }

    fn logout(&self) -> Result<()> {
        storage::clear().context("Could not remove stored token")?;
        self.cli.success("Logged out");
        Ok(())
    }

    async fn me(&self) -> Result<()> {
        let user = self
            .api_client(true)?
            .current_user()
            .await
            .context("Could not fetch account")?;
        self.print(&self.output.format_user(&user)?);
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let session_config = self.config.session_config();
        let preferences = PreferencesManager::new()?;
        let token = resolve_token(&self.config, storage::load).map(|(_, source)| source);

        let api = self.api_client(false)?;
        self.print(&format!("API:            {}", api.base_url()));
        self.print(&format!(
            "Channels:       {}",
            session_config
                .ws_base
                .as_deref()
                .unwrap_or(snapsight_sdk::constants::urls::WS_BASE)
        ));
        self.print(&format!(
            "Remembered:     {}",
            ModeMemory::load(&preferences)
                .map(|mode| mode.to_string())
                .unwrap_or_else(|| "none".to_string())
        ));
        self.print(&format!(
            "Token:          {}",
            token
                .map(|source| source.to_string())
                .unwrap_or_else(|| "not logged in".to_string())
        ));

        self.probe(Vec::new()).await
    }

    fn reset(&self) -> Result<()> {
        let mut preferences = PreferencesManager::new()?;
        preferences
            .clear()
            .context("Could not clear the remembered mode")?;
        self.cli.success("Forgot the remembered mode");
        Ok(())
    }
}
