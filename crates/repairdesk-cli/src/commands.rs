//! Command implementations. Each one checks its route guard first, the same
//! way a view would before rendering.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use repairdesk_core::config::interval_from_minutes;
use repairdesk_core::models::ProfileUpdate;
use repairdesk_core::{Access, AuthContext, Config, RouteGuard, Session};
use tracing::warn;

/// Env vars for non-interactive login
const USERNAME_ENV: &str = "REPAIRDESK_USERNAME";
const PASSWORD_ENV: &str = "REPAIRDESK_PASSWORD";

/// How often keep-alive prints its status line
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Fail with a user-facing message unless `guard` lets the session through
fn require(guard: RouteGuard, session: &Session) -> Result<()> {
    match guard.check(session) {
        Access::Allow => Ok(()),
        Access::RedirectLogin => Err(anyhow::anyhow!(
            "Not logged in. Run `repairdesk login` first."
        )),
        Access::RedirectProfile => Err(anyhow::anyhow!("Staff access required.")),
        Access::RedirectHome => Err(anyhow::anyhow!(
            "Already logged in as {}. Run `repairdesk logout` first.",
            session.display_name().unwrap_or_default()
        )),
    }
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

pub async fn login(ctx: &AuthContext, config: &mut Config, username: Option<&str>) -> Result<()> {
    require(RouteGuard::Public, &ctx.current_user())?;

    let username = match username {
        Some(u) => u.to_string(),
        None => match std::env::var(USERNAME_ENV).ok().or_else(|| config.last_username.clone()) {
            Some(u) => u,
            None => prompt_username()?,
        },
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(p) => p,
        Err(_) => prompt_password()?,
    };

    if username.is_empty() || password.is_empty() {
        return Err(anyhow::anyhow!("Username and password required"));
    }

    let session = ctx.login(&username, &password).await?;

    config.last_username = Some(username.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!(
        "Logged in as {}",
        session.display_name().unwrap_or(username)
    );
    Ok(())
}

pub fn logout(ctx: &AuthContext) -> Result<()> {
    let was_logged_in = ctx.current_user().is_authenticated();
    ctx.logout()?;
    if was_logged_in {
        println!("Logged out");
    } else {
        println!("Not logged in");
    }
    Ok(())
}

/// Show the logged-in user. The JSON form never includes the tokens.
pub fn whoami(ctx: &AuthContext, json: bool) -> Result<()> {
    let user = ctx.current_user();
    require(RouteGuard::PRIVATE, &user)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    println!("Name:     {}", user.display_name().unwrap_or_default());
    println!("Username: {}", user.username.as_deref().unwrap_or("-"));
    println!("User ID:  {}", user.user_id.as_deref().unwrap_or("-"));
    println!("Email:    {}", user.email.as_deref().unwrap_or("-"));
    println!("Phone:    {}", user.phone_number.as_deref().unwrap_or("-"));
    println!("Role:     {}", if user.is_staff { "staff" } else { "employee" });
    Ok(())
}

fn profile_user_id(user: &Session) -> Result<&str> {
    user.user_id
        .as_deref()
        .context("User ID not available; please log in again")
}

pub async fn show_profile(ctx: &AuthContext) -> Result<()> {
    let user = ctx.current_user();
    require(RouteGuard::PRIVATE, &user)?;

    let employee = ctx.client().fetch_employee(profile_user_id(&user)?).await?;
    println!("{}", serde_json::to_string_pretty(&employee)?);
    Ok(())
}

pub async fn update_profile(ctx: &AuthContext, field: &str, value: &str) -> Result<()> {
    let user = ctx.current_user();
    require(RouteGuard::PRIVATE, &user)?;
    let user_id = profile_user_id(&user)?;

    let current = ctx.client().fetch_employee(user_id).await?;
    let mut update = ProfileUpdate::from(&current);
    match field {
        "username" => update.username = value.to_string(),
        "first_name" => update.first_name = value.to_string(),
        "last_name" => update.last_name = value.to_string(),
        "email" => update.email = value.to_string(),
        "phone_number" => update.phone_number = value.to_string(),
        other => return Err(anyhow::anyhow!("Unknown profile field: {other}")),
    }

    let updated = ctx.client().update_employee(user_id, &update).await?;
    println!("Profile updated for {}", updated.full_name());
    Ok(())
}

pub async fn employees(ctx: &AuthContext) -> Result<()> {
    require(RouteGuard::STAFF, &ctx.current_user())?;

    let employees = ctx.client().fetch_employees().await?;
    for employee in &employees {
        let role = if employee.is_staff { " (staff)" } else { "" };
        println!("{:>5}  {:<20} {}{}", employee.id, employee.username, employee.full_name(), role);
    }
    println!("{} employee(s)", employees.len());
    Ok(())
}

pub async fn get(ctx: &AuthContext, path: &str) -> Result<()> {
    let value: serde_json::Value = ctx.client().get(path).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn format_refresh(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

pub async fn keep_alive(ctx: &AuthContext, config: &Config, minutes: Option<u64>) -> Result<()> {
    require(RouteGuard::PRIVATE, &ctx.current_user())?;

    let every = match minutes {
        Some(m) => interval_from_minutes(m)?,
        None => config
            .refresh_interval()
            .context("Proactive refresh is disabled in the config")?,
    };

    ctx.keep_alive(every);
    println!(
        "Refreshing the session every {} minute(s). Press Ctrl-C to stop.",
        every.as_secs() / 60
    );

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = status.tick() => {
                if !ctx.current_user().is_authenticated() {
                    println!("Session ended.");
                    break;
                }
                println!("Last refresh: {}", format_refresh(ctx.last_background_refresh()));
            }
        }
    }

    println!("Last refresh: {}", format_refresh(ctx.last_background_refresh()));
    Ok(())
}
