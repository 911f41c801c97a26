use crate::clock::Zone;
use crate::config::{Config, normalize_base_path};
use crate::db::Database;
use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, theme::ColorfulTheme};
use url::Url;

pub fn run_onboarding() -> Result<Config> {
    println!("──────────────────────────────────────────");
    println!("  Welcome to RitualBell onboarding.");
    println!("──────────────────────────────────────────");

    let theme = ColorfulTheme::default();

    println!("\n[1/4] Timezone");
    println!("  Reminders fire by wall-clock time in this zone.");
    let timezone: String = Input::with_theme(&theme)
        .with_prompt("  local, UTC, a zone name like Europe/Moscow or an offset like +03:00")
        .default("local".to_string())
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            Zone::parse(input)
                .map(|_| ())
                .map_err(|_| "Use local, UTC, an IANA name (example: Europe/Moscow) or ±HH:MM")
        })
        .interact_text()
        .context("Failed to read timezone")?;
    println!("  ✓ Timezone: {timezone}");

    println!("\n[2/4] Desktop notifications");
    let notifications_enabled = Confirm::with_theme(&theme)
        .with_prompt("  Allow RitualBell to show desktop notifications?")
        .default(true)
        .interact()
        .context("Failed to read notification permission input")?;
    if notifications_enabled {
        println!("  ✓ Notifications allowed");
    } else {
        println!("  ! Reminders will be tracked but not shown");
    }

    println!("\n[3/4] Web app location");
    let app_origin: String = Input::with_theme(&theme)
        .with_prompt("  Origin the calendar app is served from")
        .default(Config::default().app_origin)
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            Url::parse(input)
                .map(|_| ())
                .map_err(|_| "Use an absolute URL (example: https://example.com)")
        })
        .interact_text()
        .context("Failed to read app origin")?;
    let base_path: String = Input::with_theme(&theme)
        .with_prompt("  Base path of the app (empty for the site root)")
        .default(String::new())
        .allow_empty(true)
        .interact_text()
        .context("Failed to read base path")?;
    let base_path = normalize_base_path(&base_path);
    println!("  ✓ {app_origin}{base_path}/");

    println!("\n[4/4] Server sweep");
    println!("  The sweep pushes reminders to registered devices once per minute.");
    let sweep_enabled = Confirm::with_theme(&theme)
        .with_prompt("  Enable the server sweep in `ritualbell service`?")
        .default(false)
        .interact()
        .context("Failed to read sweep input")?;

    let config = Config {
        timezone,
        notifications_enabled,
        app_origin,
        base_path,
        sweep_enabled,
        ..Config::default()
    };

    config.ensure_bootstrap_files()?;
    config.save()?;
    let _ = Database::open(&config.ledger_db_path)?;
    if config.sweep_enabled {
        let _ = Database::open(&config.sweep_db_path)?;
    }

    println!("\n──────────────────────────────────────────");
    println!("  Onboarding complete!");
    println!("  Add a ritual: ritualbell add daily \"Morning tea\" --time 08:00");
    println!("  Start reminders: ritualbell service");
    println!("──────────────────────────────────────────");

    Ok(config)
}
