//! Account setup and teardown.
//!
//! `BeemEntry` is the context object for one configured account: it owns the
//! running coordinator and is handed to whatever needs the account's data.

use crate::beem_api::BeemApiClient;
use crate::config::Settings;
use crate::coordinator::{CoordinatorHandle, CoordinatorTask, UpdateCoordinator};
use crate::errors::{BeemError, BeemResult};
use crate::sensor::{build_sensors, EntityRegistry};
use crate::storage::{EntryOptions, OptionsStore, SecretStore};
use std::sync::Arc;
use tracing::{error, info};

pub struct BeemEntry {
    account_id: String,
    battery_id: Option<i64>,
    task: CoordinatorTask,
}

impl BeemEntry {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn battery_id(&self) -> Option<i64> {
        self.battery_id
    }

    pub fn coordinator(&self) -> CoordinatorHandle {
        self.task.handle()
    }

    /// Stops polling. Returns false when the polling task had already died.
    pub async fn unload(self) -> bool {
        let unloaded = self.task.shutdown().await.is_some();
        if unloaded {
            info!(account = %self.account_id, "Beem entry unloaded");
        } else {
            error!(account = %self.account_id, "Beem entry did not unload cleanly");
        }
        unloaded
    }
}

/// Sets up one account: credentials, first refresh, sensors, polling.
pub async fn setup_entry(
    settings: &Settings,
    secrets: Arc<dyn SecretStore>,
    options: Arc<dyn OptionsStore>,
    registry: &mut dyn EntityRegistry,
) -> BeemResult<BeemEntry> {
    let mut coordinator = prepare_coordinator(settings, secrets, options).await?;

    if let Err(err) = coordinator.refresh().await {
        error!(error = %err, "First refresh failed");
        return Err(err.into());
    }

    let battery_id = coordinator.battery_id();
    let handle = coordinator.handle();
    registry.add_entities(build_sensors(&handle, battery_id));

    let task = coordinator.spawn(settings.poll_interval());
    let account_id = settings.email.trim().to_string();
    info!(account = %account_id, "Beem entry set up");
    Ok(BeemEntry {
        account_id,
        battery_id,
        task,
    })
}

/// Resolves credentials and the battery, and returns a logged-in coordinator
/// that has not refreshed yet.
///
/// Without a configured `battery_id` the account's first battery is used;
/// accounts without batteries only get BeemBox data.
pub async fn prepare_coordinator(
    settings: &Settings,
    secrets: Arc<dyn SecretStore>,
    options: Arc<dyn OptionsStore>,
) -> BeemResult<UpdateCoordinator> {
    let mut client = logged_in_client(settings, secrets, options.as_ref()).await?;

    let battery_id = match settings.battery_id {
        Some(battery_id) => Some(battery_id),
        None => {
            let token = client.token().map(str::to_string);
            let battery_id = discover_battery(&mut client).await?;
            if client.token() != token.as_deref() {
                save_token(options.as_ref(), &client).await?;
            }
            battery_id
        }
    };

    Ok(UpdateCoordinator::new(client, battery_id, options))
}

async fn discover_battery(client: &mut BeemApiClient) -> BeemResult<Option<i64>> {
    let battery_id = client
        .fetch_devices()
        .await?
        .into_iter()
        .find_map(|battery| battery.id);
    match battery_id {
        Some(id) => info!(battery = id, "Using the account's first battery"),
        None => info!("No battery on the account, polling BeemBoxes only"),
    }
    Ok(battery_id)
}

/// Builds a client for the configured account, logging in when no token is on file.
///
/// A password given in the settings that differs from the stored one is only
/// saved once a login with it succeeds.
pub async fn logged_in_client(
    settings: &Settings,
    secrets: Arc<dyn SecretStore>,
    options: &dyn OptionsStore,
) -> BeemResult<BeemApiClient> {
    let email = settings.email.trim();
    if !is_valid_email(email) {
        error!("Configured email address is invalid");
        return Err(BeemError::InvalidEmail(email.to_string()));
    }

    let stored = secrets.get_password(email).await?.filter(|p| !p.is_empty());
    let supplied = settings
        .password
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let new_password = supplied.is_some() && supplied != stored;

    let password = supplied.or(stored).ok_or_else(|| {
        error!(account = %email, "No password on file");
        BeemError::MissingPassword
    })?;
    let token = if new_password {
        None
    } else {
        options.options(email).await?.token
    };

    let mut client = BeemApiClient::with_timeout(
        &settings.api_base_url,
        email,
        Some(password.clone()),
        token,
        settings.request_timeout(),
    )?;

    if client.token().is_none() {
        client.login().await?;
        if new_password {
            secrets.save_password(email, &password).await?;
            info!(account = %email, "Password verified and saved");
        }
        save_token(options, &client).await?;
        info!(account = %email, "Token obtained from the Beem API");
    }

    Ok(client)
}

async fn save_token(options: &dyn OptionsStore, client: &BeemApiClient) -> BeemResult<()> {
    options
        .update_options(
            client.email(),
            EntryOptions {
                token: client.token().map(str::to_string),
            },
        )
        .await
}

/// `local@domain.tld`, without whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}
